//! Restock planner: produce more of an existing SKU from its frozen recipe.
//!
//! [`Ledger::plan_restock`] is a side-effect-free cost preview. [`Ledger::restock`]
//! rebuilds the same plan inside a unit of work and either commits every usage
//! plus the CREATE log entry, or nothing.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crystalerp_core::TenantId;
use crystalerp_events::{EventBus, EventEnvelope};
use crystalerp_inventory::{Material, MaterialCommand, MaterialId, QuantityUnit, RecordUsage};
use crystalerp_products::{ProduceStock, ProductSku, SignatureEntry, SkuCommand, SkuId};
use crystalerp_purchasing::PurchaseLotId;

use super::{Ledger, LedgerReceipt, load_sku, receipt_for};
use crate::error::LedgerError;
use crate::event_store::EventStore;
use crate::streams;
use crate::unit_of_work::UnitOfWork;

/// What one recipe line needs for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialRequirement {
    pub material_id: MaterialId,
    pub lot_id: PurchaseLotId,
    pub unit: QuantityUnit,
    pub per_unit: i64,
    pub required: i64,
    /// Quantity that can still be consumed (zero once the lot is USED).
    pub available: i64,
    pub unit_cost: Decimal,
    pub cost: Decimal,
}

/// A recipe line that cannot be covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialShortfall {
    pub material_id: MaterialId,
    pub lot_id: PurchaseLotId,
    pub required: i64,
    pub remaining: i64,
    pub shortfall: i64,
    /// Finished units' worth of material missing.
    pub units_short: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestockPlan {
    pub sku_id: SkuId,
    pub quantity: i64,
    pub requirements: Vec<MaterialRequirement>,
    pub shortfalls: Vec<MaterialShortfall>,
    /// Largest batch current stock could cover.
    pub max_producible: i64,
    pub material_cost: Decimal,
    pub labor_cost: Decimal,
    pub craft_cost: Decimal,
    pub total_cost: Decimal,
}

impl RestockPlan {
    pub fn is_feasible(&self) -> bool {
        self.shortfalls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestockRequest {
    pub quantity: i64,
    pub reference_id: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
}

impl RestockRequest {
    pub fn new(quantity: i64) -> Self {
        Self {
            quantity,
            reference_id: None,
            operator: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestockOutcome {
    pub plan: RestockPlan,
    pub receipt: LedgerReceipt,
}

/// Recipe lines resolved against current material state.
pub(crate) struct AssessedRecipe {
    pub(crate) materials: Vec<Material>,
    pub(crate) requirements: Vec<MaterialRequirement>,
    pub(crate) shortfalls: Vec<MaterialShortfall>,
    pub(crate) max_producible: i64,
}

impl AssessedRecipe {
    pub(crate) fn material_cost(&self) -> Decimal {
        self.requirements.iter().map(|r| r.cost).sum()
    }

    /// Material cost of one finished unit.
    pub(crate) fn unit_material_cost(&self) -> Decimal {
        self.requirements
            .iter()
            .map(|r| r.unit_cost * Decimal::from(r.per_unit))
            .sum()
    }

    /// Stage one consumption per recipe line against `sku_id`.
    pub(crate) fn stage_usages<S>(
        &mut self,
        uow: &mut UnitOfWork<'_, S>,
        sku_id: SkuId,
    ) -> Result<(), LedgerError>
    where
        S: EventStore + ?Sized,
    {
        let tenant_id = uow.tenant_id();
        let occurred_at = Utc::now();
        for (material, requirement) in self.materials.iter_mut().zip(&self.requirements) {
            uow.decide(
                material,
                requirement.material_id.0,
                streams::MATERIAL,
                &MaterialCommand::RecordUsage(RecordUsage {
                    tenant_id,
                    material_id: requirement.material_id,
                    usage_id: Uuid::now_v7(),
                    sku_ref: sku_id.0,
                    quantity: requirement.required,
                    occurred_at,
                }),
            )?;
        }
        Ok(())
    }
}

/// Resolve each recipe line to its material and check it can cover `quantity` units.
pub(crate) fn assess_recipe<S>(
    uow: &UnitOfWork<'_, S>,
    recipe: &[SignatureEntry],
    quantity: i64,
) -> Result<AssessedRecipe, LedgerError>
where
    S: EventStore + ?Sized,
{
    let mut assessed = AssessedRecipe {
        materials: Vec::with_capacity(recipe.len()),
        requirements: Vec::with_capacity(recipe.len()),
        shortfalls: Vec::new(),
        max_producible: i64::MAX,
    };

    for entry in recipe {
        let lot_id = entry.purchase_lot_id;
        let material_id = MaterialId::for_lot(lot_id);
        let material = uow.load(material_id.0, |_, id| Material::empty(MaterialId(id)))?;
        if !material.is_created() {
            return Err(LedgerError::NotFound(format!("no material derived for lot {lot_id}")));
        }

        let counted_wrong = match material.unit() {
            QuantityUnit::Beads => entry.quantity_used_pieces > 0,
            QuantityUnit::Pieces => entry.quantity_used_beads > 0,
        };
        if counted_wrong {
            return Err(LedgerError::InvalidComposition(format!(
                "lot {lot_id} is counted in {:?}",
                material.unit()
            )));
        }

        let per_unit = entry.quantity();
        let required = per_unit
            .checked_mul(quantity)
            .ok_or_else(|| LedgerError::Validation("requested quantity overflows".to_string()))?;
        let available = if material.is_source_used() {
            0
        } else {
            material.remaining_quantity().max(0)
        };

        if required > available {
            let shortfall = required - available;
            assessed.shortfalls.push(MaterialShortfall {
                material_id,
                lot_id,
                required,
                remaining: available,
                shortfall,
                units_short: shortfall / per_unit + i64::from(shortfall % per_unit != 0),
            });
        }
        assessed.max_producible = assessed.max_producible.min(available / per_unit);

        assessed.requirements.push(MaterialRequirement {
            material_id,
            lot_id,
            unit: material.unit(),
            per_unit,
            required,
            available,
            unit_cost: material.unit_cost(),
            cost: material.unit_cost() * Decimal::from(required),
        });
        assessed.materials.push(material);
    }

    if assessed.requirements.is_empty() {
        assessed.max_producible = 0;
    }
    Ok(assessed)
}

fn build_plan(sku: &ProductSku, quantity: i64, assessed: &AssessedRecipe) -> RestockPlan {
    let qty = Decimal::from(quantity);
    let material_cost = assessed.material_cost();
    let labor_cost = sku.costs().labor_cost * qty;
    let craft_cost = sku.costs().craft_cost * qty;

    RestockPlan {
        sku_id: sku.id_typed(),
        quantity,
        requirements: assessed.requirements.clone(),
        shortfalls: assessed.shortfalls.clone(),
        max_producible: assessed.max_producible,
        material_cost,
        labor_cost,
        craft_cost,
        total_cost: material_cost + labor_cost + craft_cost,
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Cost preview for restocking `quantity` units. Writes nothing.
    pub fn plan_restock(&self, tenant_id: TenantId, sku_id: SkuId, quantity: i64) -> Result<RestockPlan, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::Validation("restock quantity must be positive".to_string()));
        }
        let uow = self.unit_of_work(tenant_id);
        let sku = load_sku(&uow, sku_id)?;
        let assessed = assess_recipe(&uow, sku.recipe(), quantity)?;
        Ok(build_plan(&sku, quantity, &assessed))
    }

    /// Produce `request.quantity` more units of an existing SKU.
    ///
    /// Refuses with the full shortfall list if any material cannot cover its share.
    pub fn restock(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        request: RestockRequest,
    ) -> Result<RestockOutcome, LedgerError> {
        if request.quantity <= 0 {
            return Err(LedgerError::Validation("restock quantity must be positive".to_string()));
        }

        let mut uow = self.unit_of_work(tenant_id);
        let mut sku = load_sku(&uow, sku_id)?;
        let mut assessed = assess_recipe(&uow, sku.recipe(), request.quantity)?;
        let plan = build_plan(&sku, request.quantity, &assessed);

        if !plan.is_feasible() {
            tracing::warn!(
                sku_id = %sku_id,
                quantity = request.quantity,
                shortfalls = plan.shortfalls.len(),
                "restock refused: insufficient materials"
            );
            return Err(LedgerError::InsufficientMaterials(plan.shortfalls));
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
            quantity = request.quantity,
            quantity_after = receipt.quantity_after,
            total_cost = %plan.total_cost,
            "sku restocked"
        );
        Ok(RestockOutcome { plan, receipt })
    }
}
