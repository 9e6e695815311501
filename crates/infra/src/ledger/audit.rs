//! Consistency audits.
//!
//! `audit_sku` checks the one property that must never break: replaying a
//! SKU's inventory log from zero lands exactly on its available quantity, in
//! the event stream, the aggregate and both read models. `audit_material`
//! re-aggregates a material's usages.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crystalerp_core::{Aggregate, TenantId};
use crystalerp_events::{EventBus, EventEnvelope};
use crystalerp_inventory::MaterialId;
use crystalerp_products::{InventoryAction, ProductSku, SkuEvent, SkuId};

use super::{Ledger, load_material};
use crate::command_dispatcher::{DispatchError, decode_stream};
use crate::error::LedgerError;
use crate::event_store::EventStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkuAudit {
    pub sku_id: SkuId,
    pub log_entries: usize,
    pub replayed_quantity: i64,
    pub available_quantity: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialAudit {
    pub material_id: MaterialId,
    pub original_quantity: i64,
    pub used_quantity: i64,
    pub remaining_quantity: i64,
    pub usage_records: usize,
    pub source_used: bool,
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Replay the SKU's log from the store and cross-check every view of it.
    pub fn audit_sku(&self, tenant_id: TenantId, sku_id: SkuId) -> Result<SkuAudit, LedgerError> {
        let history = self
            .store()
            .load_stream(tenant_id, sku_id.0)
            .map_err(DispatchError::from)?;
        if history.is_empty() {
            return Err(LedgerError::NotFound(format!("sku {sku_id}")));
        }
        let events: Vec<SkuEvent> = decode_stream(&history)?;

        let diverged = |detail: String| {
            tracing::error!(sku_id = %sku_id, detail = %detail, "ledger divergence");
            LedgerError::LedgerDivergence { sku_id, detail }
        };

        let mut sku = ProductSku::empty(sku_id);
        let mut replayed = 0i64;
        let mut produced = 0i64;
        let mut log_entries = 0usize;
        for event in &events {
            if let Some(entry) = event.log_entry() {
                if entry.quantity_before != replayed {
                    return Err(diverged(format!(
                        "log entry {} starts at {} but replay is at {replayed}",
                        log_entries + 1,
                        entry.quantity_before
                    )));
                }
                if entry.quantity_before + entry.quantity_change != entry.quantity_after {
                    return Err(diverged(format!(
                        "log entry {} does not add up: {} + {} != {}",
                        log_entries + 1,
                        entry.quantity_before,
                        entry.quantity_change,
                        entry.quantity_after
                    )));
                }
                if entry.quantity_after < 0 {
                    return Err(diverged(format!(
                        "log entry {} leaves quantity at {}",
                        log_entries + 1,
                        entry.quantity_after
                    )));
                }
                replayed = entry.quantity_after;
                if entry.action == InventoryAction::Create {
                    produced += entry.quantity_change;
                }
                log_entries += 1;
            }
            sku.apply(event);
        }

        if sku.available_quantity() != replayed {
            return Err(diverged(format!(
                "available quantity {} but log replays to {replayed}",
                sku.available_quantity()
            )));
        }
        if sku.total_quantity() != produced {
            return Err(diverged(format!(
                "total quantity {} but log produced {produced}",
                sku.total_quantity()
            )));
        }

        match self.catalog.get(tenant_id, &sku_id) {
            Some(row) if row.available_quantity != replayed || row.total_quantity != produced => {
                return Err(diverged(format!(
                    "catalog row shows {}/{} but log replays to {replayed}/{produced}",
                    row.available_quantity, row.total_quantity
                )));
            }
            Some(_) => {}
            None => return Err(diverged("sku missing from catalog".to_string())),
        }

        let projected = self.inventory_log.entries(tenant_id, &sku_id);
        if projected.len() != log_entries || self.inventory_log.replayed_quantity(tenant_id, &sku_id) != replayed {
            return Err(diverged(format!(
                "inventory log read model has {} entries, stream has {log_entries}",
                projected.len()
            )));
        }

        tracing::debug!(sku_id = %sku_id, log_entries, replayed, "sku audit passed");
        Ok(SkuAudit {
            sku_id,
            log_entries,
            replayed_quantity: replayed,
            available_quantity: sku.available_quantity(),
            total_quantity: sku.total_quantity(),
        })
    }

    /// Re-aggregate a material's usages. A negative remainder is a data
    /// integrity violation: the material is flagged and the caller told.
    pub fn audit_material(&self, tenant_id: TenantId, material_id: MaterialId) -> Result<MaterialAudit, LedgerError> {
        let uow = self.unit_of_work(tenant_id);
        let material = load_material(&uow, material_id)?;

        let used: i64 = material.usages().iter().map(|u| u.quantity).sum();
        let remaining = material.original_quantity() - used;
        if remaining < 0 {
            tracing::warn!(
                material_id = %material_id,
                original_quantity = material.original_quantity(),
                used_quantity = used,
                remaining_quantity = remaining,
                "material needs review: usage exceeds original quantity"
            );
            return Err(LedgerError::DataIntegrityViolation {
                material_id,
                remaining_quantity: remaining,
            });
        }

        Ok(MaterialAudit {
            material_id,
            original_quantity: material.original_quantity(),
            used_quantity: used,
            remaining_quantity: remaining,
            usage_records: material.usages().len(),
            source_used: material.is_source_used(),
        })
    }
}
