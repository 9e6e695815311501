//! Per-stream cursors shared by the SKU projections.
//!
//! The bus is at-least-once, so every projection remembers the last sequence
//! number it applied per (tenant, aggregate) stream. Replays at or below the
//! cursor are ignored; gaps are errors.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crystalerp_core::{AggregateId, TenantId};
use crystalerp_events::EventEnvelope;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` if `envelope` is the next position of its stream.
    ///
    /// Returns `Ok(false)` for duplicates. The cursor only advances when
    /// `apply` succeeds, and the lock is held throughout so concurrent
    /// deliveries of the same stream serialize.
    pub fn advance_with<E, F>(&self, envelope: &EventEnvelope<E>, apply: F) -> Result<bool, ProjectionError>
    where
        F: FnOnce() -> Result<(), ProjectionError>,
    {
        let mut cursors = self.inner.write().map_err(|_| ProjectionError::Poisoned)?;
        let key = CursorKey {
            tenant_id: envelope.tenant_id(),
            aggregate_id: envelope.aggregate_id(),
        };
        let last = cursors.get(&key).copied().unwrap_or(0);
        let seq = envelope.sequence_number();

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(key, seq);
        Ok(true)
    }

    pub fn last_applied(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&CursorKey { tenant_id, aggregate_id }).copied())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

/// Deterministic replay order (tenant, aggregate, sequence) plus the tenants involved.
pub(crate) fn replay_order(
    envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
) -> (Vec<TenantId>, Vec<EventEnvelope<JsonValue>>) {
    let mut envs: Vec<_> = envelopes.into_iter().collect();

    let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
    tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
    tenants.dedup();

    envs.sort_by_key(|e| {
        (
            *e.tenant_id().as_uuid().as_bytes(),
            *e.aggregate_id().as_uuid().as_bytes(),
            e.sequence_number(),
        )
    });

    (tenants, envs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn envelope(tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) -> EventEnvelope<()> {
        EventEnvelope::new(Uuid::now_v7(), tenant_id, aggregate_id, "products.sku", seq, ())
    }

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        assert!(cursors.advance_with(&envelope(t, a, 1), || Ok(())).unwrap());
        assert!(!cursors.advance_with(&envelope(t, a, 1), || Ok(())).unwrap());
        assert!(matches!(
            cursors.advance_with(&envelope(t, a, 3), || Ok(())),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 3 })
        ));
        assert_eq!(cursors.last_applied(t, a), 1);
    }

    #[test]
    fn failed_apply_does_not_advance() {
        let cursors = StreamCursors::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        let res = cursors.advance_with(&envelope(t, a, 1), || {
            Err(ProjectionError::Deserialize("bad payload".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(cursors.last_applied(t, a), 0);
    }
}
