use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crystalerp_core::TenantId;
use crystalerp_events::{Event, EventEnvelope};
use crystalerp_products::{SignatureHash, SkuCosts, SkuEvent, SkuId, SkuStatus, parse_sku_code_sequence};

use super::cursor::{ProjectionError, StreamCursors, replay_order};
use super::decode_sku_event;
use crate::read_model::TenantStore;
use crate::streams;

/// Denormalized SKU row, the queryable face of the `ProductSku` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuCatalogRow {
    pub sku_id: SkuId,
    pub sku_code: String,
    pub sku_name: String,
    pub signature_hash: SignatureHash,
    pub costs: SkuCosts,
    pub selling_price: Decimal,
    pub total_quantity: i64,
    pub available_quantity: i64,
    pub total_value: Decimal,
    pub status: SkuStatus,
    pub updated_at: DateTime<Utc>,
}

impl SkuCatalogRow {
    fn refresh_value(&mut self) {
        self.total_value = Decimal::from(self.available_quantity) * self.selling_price;
    }
}

/// SKU catalog projection.
///
/// Answers lookups by signature hash and SKU code, and tells the code allocator
/// which sequence numbers a day has already used.
#[derive(Debug)]
pub struct SkuCatalogProjection<S>
where
    S: TenantStore<SkuId, SkuCatalogRow>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SkuCatalogProjection<S>
where
    S: TenantStore<SkuId, SkuCatalogRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Highest stream sequence folded into the SKU's row.
    pub fn last_applied(&self, tenant_id: TenantId, sku_id: &SkuId) -> u64 {
        self.cursors.last_applied(tenant_id, sku_id.0)
    }

    pub fn get(&self, tenant_id: TenantId, sku_id: &SkuId) -> Option<SkuCatalogRow> {
        self.store.get(tenant_id, sku_id)
    }

    /// All SKUs of a tenant, ordered by code.
    pub fn list(&self, tenant_id: TenantId) -> Vec<SkuCatalogRow> {
        let mut rows = self.store.values(tenant_id);
        rows.sort_by(|a, b| a.sku_code.cmp(&b.sku_code));
        rows
    }

    pub fn find_by_hash(&self, tenant_id: TenantId, hash: &SignatureHash) -> Option<SkuCatalogRow> {
        self.store.find(tenant_id, &|row: &SkuCatalogRow| &row.signature_hash == hash)
    }

    pub fn find_by_code(&self, tenant_id: TenantId, code: &str) -> Option<SkuCatalogRow> {
        self.store.find(tenant_id, &|row: &SkuCatalogRow| row.sku_code == code)
    }

    /// Highest sequence number already used for `prefix` on `date` (0 if none).
    pub fn max_code_sequence(&self, tenant_id: TenantId, prefix: &str, date: NaiveDate) -> u32 {
        self.store
            .values(tenant_id)
            .iter()
            .filter_map(|row| parse_sku_code_sequence(&row.sku_code, prefix, date))
            .max()
            .unwrap_or(0)
    }

    /// Apply a published envelope. Non-SKU envelopes are ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != streams::PRODUCT_SKU {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        self.cursors.advance_with(envelope, || {
            let Some(event) = decode_sku_event(envelope)? else {
                return Ok(());
            };
            let updated_at = event.occurred_at();

            let mut row = match event {
                SkuEvent::SkuRegistered(e) => SkuCatalogRow {
                    sku_id: e.sku_id,
                    sku_code: e.sku_code,
                    sku_name: e.sku_name,
                    signature_hash: e.signature_hash,
                    costs: e.costs,
                    selling_price: e.selling_price,
                    total_quantity: 0,
                    available_quantity: 0,
                    total_value: Decimal::ZERO,
                    status: SkuStatus::Active,
                    updated_at,
                },
                other => {
                    let sku_id = other.sku_id();
                    let mut row = self.store.get(tenant_id, &sku_id).ok_or_else(|| {
                        ProjectionError::NonMonotonicSequence {
                            last: 0,
                            found: envelope.sequence_number(),
                        }
                    })?;
                    match &other {
                        SkuEvent::StockProduced(e) => {
                            row.total_quantity += e.entry.quantity_change;
                            row.available_quantity = e.entry.quantity_after;
                        }
                        SkuEvent::StockSold(e) | SkuEvent::StockAdjusted(e) => {
                            row.available_quantity = e.entry.quantity_after;
                        }
                        SkuEvent::StockDestroyed(e) => {
                            row.available_quantity = e.entry.quantity_after;
                        }
                        SkuEvent::SkuStatusChanged(e) => row.status = e.status,
                        SkuEvent::SkuRegistered(_) => {}
                    }
                    row.updated_at = updated_at;
                    row
                }
            };

            row.refresh_value();
            self.store.upsert(tenant_id, row.sku_id, row);
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
