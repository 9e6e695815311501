//! SKU resolver: turn a material composition into stock of exactly one SKU.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crystalerp_core::TenantId;
use crystalerp_events::{EventBus, EventEnvelope};
use crystalerp_products::{
    MaterialSignature, MaterialUsageInput, ProduceStock, ProductSku, RegisterSku, SkuCommand,
    SkuCosts, SkuId, SkuSnapshot,
};

use super::restock::assess_recipe;
use super::{Ledger, LedgerReceipt, receipt_for};
use crate::config::PriceMismatchPolicy;
use crate::error::LedgerError;
use crate::event_store::EventStore;
use crate::streams;

/// A production run: what went into one unit, and how many units were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    /// Per-unit material usages. Order does not matter.
    pub usages: Vec<MaterialUsageInput>,
    pub name: String,
    pub selling_price: Decimal,
    pub labor_cost: Decimal,
    pub craft_cost: Decimal,
    pub quantity: i64,
    pub reference_id: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
}

impl ProduceRequest {
    /// One unit, no labor or craft cost.
    pub fn new(name: impl Into<String>, selling_price: Decimal, usages: Vec<MaterialUsageInput>) -> Self {
        Self {
            usages,
            name: name.into(),
            selling_price,
            labor_cost: Decimal::ZERO,
            craft_cost: Decimal::ZERO,
            quantity: 1,
            reference_id: None,
            operator: None,
            notes: None,
        }
    }
}

/// Reported when a reused SKU was offered at a price outside the tolerance.
/// The existing price is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceWarning {
    pub existing_price: Decimal,
    pub proposed_price: Decimal,
    pub deviation_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveOutcome {
    pub sku: SkuSnapshot,
    /// False when the run was added to an existing SKU with the same signature.
    pub is_new: bool,
    pub price_warning: Option<PriceWarning>,
    /// Material cost of this run.
    pub material_cost: Decimal,
    pub receipt: LedgerReceipt,
}

/// Percentage deviation of `proposed` from `existing`. A zero existing price
/// deviates by 100% from anything but zero.
fn price_deviation_pct(existing: Decimal, proposed: Decimal) -> Decimal {
    if existing.is_zero() {
        return if proposed.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED
        };
    }
    ((proposed - existing).abs() / existing * Decimal::ONE_HUNDRED).round_dp(2)
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Resolve the composition to its SKU (registering it on first sight) and
    /// produce `request.quantity` units of it.
    ///
    /// Material usages, SKU registration and the CREATE log entry commit together.
    /// Nothing is written if any material is short.
    pub fn resolve_or_create_sku(
        &self,
        tenant_id: TenantId,
        request: ProduceRequest,
    ) -> Result<ResolveOutcome, LedgerError> {
        if request.quantity <= 0 {
            return Err(LedgerError::Validation("production quantity must be positive".to_string()));
        }

        let signature = MaterialSignature::from_usages(&request.usages)
            .map_err(|e| LedgerError::InvalidComposition(e.to_string()))?;
        let hash = signature
            .hash()
            .map_err(|e| LedgerError::InvalidComposition(e.to_string()))?;
        let sku_id = SkuId::for_signature(tenant_id, &hash);

        let mut uow = self.unit_of_work(tenant_id);
        let mut sku = uow
            .load(sku_id.0, |_, id| ProductSku::empty(SkuId(id)))
            .map_err(|e| LedgerError::for_sku(sku_id, e))?;

        let mut assessed = assess_recipe(&uow, signature.entries(), request.quantity)?;
        if !assessed.shortfalls.is_empty() {
            tracing::warn!(
                sku_id = %sku_id,
                quantity = request.quantity,
                shortfalls = assessed.shortfalls.len(),
                "production refused: insufficient materials"
            );
            return Err(LedgerError::InsufficientMaterials(assessed.shortfalls));
        }

        let is_new = !sku.is_created();
        let mut price_warning = None;

        if is_new {
            let sku_code = self.allocate_sku_code(tenant_id, Utc::now().date_naive())?;
            uow.decide(
                &mut sku,
                sku_id.0,
                streams::PRODUCT_SKU,
                &SkuCommand::RegisterSku(RegisterSku {
                    tenant_id,
                    sku_id,
                    sku_code,
                    name: request.name.clone(),
                    signature,
                    costs: SkuCosts {
                        material_cost: assessed.unit_material_cost(),
                        labor_cost: request.labor_cost,
                        craft_cost: request.craft_cost,
                    },
                    selling_price: request.selling_price,
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|e| LedgerError::for_sku(sku_id, e))?;
        } else {
            let existing = sku.selling_price();
            let deviation_pct = price_deviation_pct(existing, request.selling_price);
            if deviation_pct > self.config.price_tolerance_pct {
                match self.config.price_mismatch_policy {
                    PriceMismatchPolicy::Reject => {
                        return Err(LedgerError::PriceMismatch {
                            sku_id,
                            existing,
                            proposed: request.selling_price,
                        });
                    }
                    PriceMismatchPolicy::Warn => {
                        tracing::warn!(
                            sku_id = %sku_id,
                            existing_price = %existing,
                            proposed_price = %request.selling_price,
                            deviation_pct = %deviation_pct,
                            "reused sku offered at a different price; keeping existing price"
                        );
                        price_warning = Some(PriceWarning {
                            existing_price: existing,
                            proposed_price: request.selling_price,
                            deviation_pct,
                        });
                    }
                }
            }
        }

        assessed.stage_usages(&mut uow, sku_id)?;
        uow.decide(
            &mut sku,
            sku_id.0,
            streams::PRODUCT_SKU,
            &SkuCommand::ProduceStock(ProduceStock {
                tenant_id,
                sku_id,
                quantity: request.quantity,
                reference_id: request.reference_id,
                operator: self.config.operator_or_default(request.operator.as_deref()),
                notes: request.notes,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| LedgerError::for_sku(sku_id, e))?;

        let committed = self.commit(uow)?;
        let receipt = receipt_for(&sku, &committed)?;

        tracing::info!(
            sku_id = %sku_id,
            sku_code = sku.sku_code(),
            is_new,
            quantity = request.quantity,
            quantity_after = receipt.quantity_after,
            "sku resolved"
        );

        Ok(ResolveOutcome {
            sku: sku.snapshot(),
            is_new,
            price_warning,
            material_cost: assessed.material_cost(),
            receipt,
        })
    }
}
