//! SKU read models fed from published `products.sku` envelopes.
//!
//! Both are disposable: `Ledger::rebuild_read_models` wipes and replays them.
//! Redelivered events are skipped by the per-stream cursor.

pub mod cursor;
pub mod inventory_log;
pub mod sku_catalog;

pub use cursor::{ProjectionError, StreamCursors};
pub use inventory_log::{InventoryLogProjection, InventoryLogRecord};
pub use sku_catalog::{SkuCatalogProjection, SkuCatalogRow};

use serde_json::Value as JsonValue;

use crystalerp_events::EventEnvelope;
use crystalerp_products::SkuEvent;

use crate::streams;

/// Decode a SKU event from an envelope, checking it belongs to the envelope's stream.
///
/// Envelopes from other aggregate types yield `None`.
pub(crate) fn decode_sku_event(envelope: &EventEnvelope<JsonValue>) -> Result<Option<SkuEvent>, ProjectionError> {
    if envelope.aggregate_type() != streams::PRODUCT_SKU {
        return Ok(None);
    }

    let event: SkuEvent = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

    if event.tenant_id() != envelope.tenant_id() {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    if event.sku_id().0 != envelope.aggregate_id() {
        return Err(ProjectionError::TenantIsolation(
            "event sku_id does not match envelope aggregate_id".to_string(),
        ));
    }

    Ok(Some(event))
}
