use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crystalerp_core::{AggregateId, ExpectedVersion, TenantId};
use std::sync::Arc;

/// A decided lot, material or SKU event, serialized and waiting for a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A committed event. `sequence_number` runs 1, 2, 3... per `(tenant_id, aggregate_id)`.
/// On SKU streams a quantity-changing event's `event_id` is its log entry id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// The envelope subscribers and projections receive for this event.
    pub fn to_envelope(&self) -> crystalerp_events::EventEnvelope<JsonValue> {
        crystalerp_events::EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
        .recorded(self.event_type.clone(), self.occurred_at)
    }
}

/// One stream's share of an atomic multi-stream append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl StreamAppend {
    pub fn new(expected_version: ExpectedVersion, events: Vec<UncommittedEvent>) -> Self {
        Self {
            expected_version,
            events,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer appended to the stream since it was loaded.
    #[error("stream version conflict: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// The ledger's source of truth. Every lot, material and SKU figure is a fold
/// over one of its streams.
///
/// An append either lands whole at the expected revision or not at all. Events
/// of one call must share a tenant and stream.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// All-or-nothing append across streams: a SKU production plus the usage
    /// records it draws from each material. Every expected version is checked
    /// before anything is written. Returns events in batch order.
    fn append_streams(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Empty when the stream does not exist.
    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        S::append(self, events, expected_version)
    }

    fn append_streams(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        S::append_streams(self, batches)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        S::load_stream(self, tenant_id, aggregate_id)
    }
}

impl UncommittedEvent {
    pub fn from_typed<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: crystalerp_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
