//! Quantity-changing operations on existing SKUs: sell, adjust, destroy, status.

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crystalerp_core::TenantId;
use crystalerp_events::{EventBus, EventEnvelope};
use crystalerp_inventory::{Material, MaterialCommand, MaterialId, ReturnUsage};
use crystalerp_products::{
    AdjustStock, DestroyStock, ProductSku, ReferenceType, SellStock, SetSkuStatus, SkuCommand,
    SkuId, SkuSnapshot, SkuStatus,
};

use super::{Ledger, LedgerReceipt, load_material, load_sku, receipt_for};
use crate::error::LedgerError;
use crate::event_store::EventStore;
use crate::streams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRequest {
    pub quantity: i64,
    /// Sales order or receipt number.
    pub reference_id: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
}

impl SaleRequest {
    pub fn new(quantity: i64) -> Self {
        Self {
            quantity,
            reference_id: None,
            operator: None,
            notes: None,
        }
    }
}

/// Stock count correction. Manual corrections use [`ReferenceType::Product`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustRequest {
    pub new_quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
}

impl AdjustRequest {
    pub fn new(new_quantity: i64) -> Self {
        Self {
            new_quantity,
            reference_type: ReferenceType::Product,
            reference_id: None,
            operator: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyRequest {
    pub quantity: i64,
    pub reason: String,
    /// Give the recipe's share of raw material back to the lots it came from.
    pub return_to_material: bool,
    /// Materials to return to. Empty means every material in the recipe.
    pub selected_materials: Vec<MaterialId>,
    /// Breakage report or write-off ticket.
    pub reference_id: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
}

impl DestroyRequest {
    pub fn new(quantity: i64, reason: impl Into<String>) -> Self {
        Self {
            quantity,
            reason: reason.into(),
            return_to_material: false,
            selected_materials: Vec::new(),
            reference_id: None,
            operator: None,
            notes: None,
        }
    }

    pub fn returning_materials(mut self) -> Self {
        self.return_to_material = true;
        self
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// SELL: rejected with `InsufficientStock` if it would take the SKU below zero.
    pub fn sell(&self, tenant_id: TenantId, sku_id: SkuId, request: SaleRequest) -> Result<LedgerReceipt, LedgerError> {
        let command = SkuCommand::SellStock(SellStock {
            tenant_id,
            sku_id,
            quantity: request.quantity,
            reference_id: request.reference_id,
            operator: self.config.operator_or_default(request.operator.as_deref()),
            notes: request.notes,
            occurred_at: Utc::now(),
        });
        let receipt = self.dispatch_sku(tenant_id, sku_id, command)?;

        tracing::info!(
            sku_id = %sku_id,
            quantity = request.quantity,
            quantity_after = receipt.quantity_after,
            "sku sold"
        );
        Ok(receipt)
    }

    /// ADJUST: set available quantity directly. Raw materials are not checked.
    pub fn adjust(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        request: AdjustRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        let command = SkuCommand::AdjustStock(AdjustStock {
            tenant_id,
            sku_id,
            new_quantity: request.new_quantity,
            reference_type: request.reference_type,
            reference_id: request.reference_id,
            operator: self.config.operator_or_default(request.operator.as_deref()),
            notes: request.notes,
            occurred_at: Utc::now(),
        });
        let receipt = self.dispatch_sku(tenant_id, sku_id, command)?;

        tracing::info!(
            sku_id = %sku_id,
            quantity_before = receipt.quantity_before,
            quantity_after = receipt.quantity_after,
            "sku adjusted"
        );
        Ok(receipt)
    }

    /// DESTROY: write off stock, optionally returning the recipe's material share.
    ///
    /// Returns are capped at what the SKU still holds on each material. USED
    /// lots are frozen and receive nothing back.
    pub fn destroy(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        request: DestroyRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        let mut uow = self.unit_of_work(tenant_id);
        let mut sku = load_sku(&uow, sku_id)?;

        let lines: Vec<_> = sku
            .recipe()
            .iter()
            .map(|entry| (MaterialId::for_lot(entry.purchase_lot_id), entry.quantity()))
            .collect();
        if let Some(stray) = request
            .selected_materials
            .iter()
            .find(|m| !lines.iter().any(|(id, _)| id == *m))
        {
            return Err(LedgerError::Validation(format!(
                "material {stray} is not part of sku {sku_id}'s recipe"
            )));
        }

        uow.decide(
            &mut sku,
            sku_id.0,
            streams::PRODUCT_SKU,
            &SkuCommand::DestroyStock(DestroyStock {
                tenant_id,
                sku_id,
                quantity: request.quantity,
                reason: request.reason.clone(),
                return_to_material: request.return_to_material,
                reference_id: request.reference_id.clone(),
                operator: self.config.operator_or_default(request.operator.as_deref()),
                notes: request.notes.clone(),
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| LedgerError::for_sku(sku_id, e))?;

        if request.return_to_material {
            let selected = lines.iter().filter(|(id, _)| {
                request.selected_materials.is_empty() || request.selected_materials.contains(id)
            });
            for (material_id, per_unit) in selected {
                let mut material: Material = load_material(&uow, *material_id)?;
                if material.is_source_used() {
                    tracing::warn!(material_id = %material_id, "source lot is USED; skipping material return");
                    continue;
                }
                let quantity = per_unit.saturating_mul(request.quantity).min(material.net_usage_by(sku_id.0));
                if quantity <= 0 {
                    continue;
                }
                uow.decide(
                    &mut material,
                    material_id.0,
                    streams::MATERIAL,
                    &MaterialCommand::ReturnUsage(ReturnUsage {
                        tenant_id,
                        material_id: *material_id,
                        usage_id: Uuid::now_v7(),
                        sku_ref: sku_id.0,
                        quantity,
                        occurred_at: Utc::now(),
                    }),
                )?;
                tracing::debug!(material_id = %material_id, quantity, "material returned");
            }
        }

        let committed = self.commit(uow)?;
        let receipt = receipt_for(&sku, &committed)?;

        tracing::info!(
            sku_id = %sku_id,
            quantity = request.quantity,
            reason = %request.reason,
            return_to_material = request.return_to_material,
            quantity_after = receipt.quantity_after,
            "sku stock destroyed"
        );
        Ok(receipt)
    }

    /// Deactivate or reactivate a SKU. Inactive SKUs cannot be sold.
    pub fn set_status(&self, tenant_id: TenantId, sku_id: SkuId, status: SkuStatus) -> Result<SkuSnapshot, LedgerError> {
        let (sku, committed) = self
            .dispatcher
            .dispatch(
                tenant_id,
                sku_id.0,
                streams::PRODUCT_SKU,
                SkuCommand::SetSkuStatus(SetSkuStatus {
                    tenant_id,
                    sku_id,
                    status,
                    occurred_at: Utc::now(),
                }),
                |_, id| ProductSku::empty(SkuId(id)),
            )
            .map_err(|e| LedgerError::for_sku(sku_id, e))?;
        self.project(&committed);

        tracing::info!(sku_id = %sku_id, status = ?status, "sku status changed");
        Ok(sku.snapshot())
    }

    fn dispatch_sku(&self, tenant_id: TenantId, sku_id: SkuId, command: SkuCommand) -> Result<LedgerReceipt, LedgerError> {
        let (sku, committed) = self
            .dispatcher
            .dispatch(tenant_id, sku_id.0, streams::PRODUCT_SKU, command, |_, id| {
                ProductSku::empty(SkuId(id))
            })
            .map_err(|e| LedgerError::for_sku(sku_id, e))?;
        self.project(&committed);
        receipt_for(&sku, &committed)
    }
}
