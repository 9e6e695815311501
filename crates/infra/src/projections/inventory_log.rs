use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crystalerp_core::TenantId;
use crystalerp_events::EventEnvelope;
use crystalerp_products::{LogEntry, SkuId};

use super::cursor::{ProjectionError, StreamCursors, replay_order};
use super::decode_sku_event;
use crate::read_model::TenantStore;
use crate::streams;

/// One row of the SKU inventory log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLogRecord {
    /// Id of the event that carried the entry.
    pub log_entry_id: Uuid,
    pub sku_id: SkuId,
    pub sequence_number: u64,
    pub entry: LogEntry,
}

/// Queryable SkuInventoryLog: every quantity-changing SKU event, in stream order.
#[derive(Debug)]
pub struct InventoryLogProjection<S>
where
    S: TenantStore<SkuId, Vec<InventoryLogRecord>>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InventoryLogProjection<S>
where
    S: TenantStore<SkuId, Vec<InventoryLogRecord>>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Highest stream sequence folded into the log for this SKU.
    pub fn last_applied(&self, tenant_id: TenantId, sku_id: &SkuId) -> u64 {
        self.cursors.last_applied(tenant_id, sku_id.0)
    }

    pub fn entries(&self, tenant_id: TenantId, sku_id: &SkuId) -> Vec<InventoryLogRecord> {
        self.store.get(tenant_id, sku_id).unwrap_or_default()
    }

    /// Fold the log from zero. Equals the SKU's available quantity when consistent.
    pub fn replayed_quantity(&self, tenant_id: TenantId, sku_id: &SkuId) -> i64 {
        self.entries(tenant_id, sku_id)
            .iter()
            .map(|r| r.entry.quantity_change)
            .sum()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != streams::PRODUCT_SKU {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        self.cursors.advance_with(envelope, || {
            let Some(event) = decode_sku_event(envelope)? else {
                return Ok(());
            };
            let Some(entry) = event.log_entry() else {
                return Ok(());
            };

            let sku_id = event.sku_id();
            let record = InventoryLogRecord {
                log_entry_id: envelope.event_id(),
                sku_id,
                sequence_number: envelope.sequence_number(),
                entry: entry.clone(),
            };
            let mut pending = Some(record);
            self.store.modify(tenant_id, sku_id, &mut |row: &mut Option<Vec<InventoryLogRecord>>| {
                if let Some(record) = pending.take() {
                    row.get_or_insert_with(Vec::new).push(record);
                }
            });
            Ok(())
        })?;

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear();

        let (tenants, envs) = replay_order(envelopes);
        for t in tenants {
            self.store.clear_tenant(t);
        }
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
