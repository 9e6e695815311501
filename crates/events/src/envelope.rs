use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crystalerp_core::{AggregateId, TenantId};

/// Where a committed event sits: tenant, stream and position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamPosition {
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    /// Stream kind, e.g. `products.sku` or `inventory.material`.
    pub aggregate_type: String,
    /// 1-based; the first event of a stream is 1.
    pub sequence_number: u64,
}

impl StreamPosition {
    /// True when `next` is the event that must follow this one in the same stream.
    pub fn is_followed_by(&self, next: &StreamPosition) -> bool {
        self.tenant_id == next.tenant_id
            && self.aggregate_id == next.aggregate_id
            && next.sequence_number == self.sequence_number + 1
    }
}

/// A committed event as published to subscribers.
///
/// `event_id` doubles as the inventory log entry id handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    position: StreamPosition,
    event_type: Option<String>,
    recorded_at: Option<DateTime<Utc>>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            position: StreamPosition {
                tenant_id,
                aggregate_id,
                aggregate_type: aggregate_type.into(),
                sequence_number,
            },
            event_type: None,
            recorded_at: None,
            payload,
        }
    }

    /// Tag the envelope with the event's type name and commit time.
    pub fn recorded(mut self, event_type: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        self.event_type = Some(event_type.into());
        self.recorded_at = Some(recorded_at);
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn position(&self) -> &StreamPosition {
        &self.position
    }

    pub fn tenant_id(&self) -> TenantId {
        self.position.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.position.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.position.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.position.sequence_number
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Swap the payload, keeping id and position. Used to decode JSON payloads
    /// into typed events.
    pub fn map_payload<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            position: self.position,
            event_type: self.event_type,
            recorded_at: self.recorded_at,
            payload: f(self.payload),
        }
    }
}
