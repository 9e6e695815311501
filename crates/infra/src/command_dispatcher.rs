//! Load, decide, append, publish.
//!
//! `CommandDispatcher` does this for commands that touch one stream (a sale,
//! an adjustment, a material note). Operations that must move several streams
//! together go through [`crate::unit_of_work::UnitOfWork`], which shares the
//! loading and encoding helpers below.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crystalerp_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use crystalerp_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// A loaded stream held another tenant's or another aggregate's events.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found")]
    NotFound,
    #[error("insufficient quantity (requested: {requested}, available: {available})")]
    InsufficientQuantity { requested: i64, available: i64 },
    /// A stored payload no longer decodes into the aggregate's event type.
    #[error("undecodable event payload: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// The append succeeded; only fan-out failed.
    #[error("publish failed after commit: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InsufficientQuantity {
                requested,
                available,
            } => DispatchError::InsufficientQuantity {
                requested,
                available,
            },
        }
    }
}

/// Single-stream command runner. Nothing is published unless the append
/// succeeded. A lost race comes back as `DispatchError::Concurrency` and is not
/// retried here: re-running a sale could sell twice.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// Returns the aggregate with the new events applied, plus the committed
    /// `StoredEvent`s (with assigned sequence numbers). A command that decides
    /// no events returns the rehydrated aggregate and an empty list.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<(A, Vec<StoredEvent>), DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: crystalerp_events::Event + Serialize + DeserializeOwned,
    {
        // Rehydrate.
        let mut aggregate = load_aggregate(&self.store, tenant_id, aggregate_id, make_aggregate)?;
        let expected = ExpectedVersion::of(&aggregate);

        // Decide without mutating.
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok((aggregate, vec![]));
        }

        // Append at the loaded revision.
        let aggregate_type: String = aggregate_type.into();
        let uncommitted = to_uncommitted(tenant_id, aggregate_id, &aggregate_type, &decided)?;
        let committed = self.store.append(uncommitted, expected)?;

        aggregate.apply_all(&decided);

        // Publish only what the store accepted.
        publish_all(&self.bus, &committed)?;

        Ok((aggregate, committed))
    }
}

/// Load a stream, validate it, and rehydrate a fresh aggregate from it.
pub(crate) fn load_aggregate<A, S>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
) -> Result<A, DispatchError>
where
    S: EventStore + ?Sized,
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let history = store.load_stream(tenant_id, aggregate_id)?;
    validate_loaded_stream(tenant_id, aggregate_id, &history)?;

    let mut aggregate = make_aggregate(tenant_id, aggregate_id);
    aggregate.apply_all(&decode_stream::<A::Event>(&history)?);
    Ok(aggregate)
}

/// Decode a loaded stream's payloads into typed events, in sequence order.
pub(crate) fn decode_stream<E>(history: &[StoredEvent]) -> Result<Vec<E>, DispatchError>
where
    E: DeserializeOwned,
{
    let mut sorted: Vec<&StoredEvent> = history.iter().collect();
    sorted.sort_by_key(|e| e.sequence_number);

    sorted
        .into_iter()
        .map(|stored| {
            serde_json::from_value(stored.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()))
        })
        .collect()
}

pub(crate) fn to_uncommitted<E>(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, DispatchError>
where
    E: crystalerp_events::Event + Serialize,
{
    events
        .iter()
        .map(|ev| {
            UncommittedEvent::from_typed(tenant_id, aggregate_id, aggregate_type, Uuid::now_v7(), ev)
                .map_err(DispatchError::from)
        })
        .collect()
}

pub(crate) fn publish_all<B>(bus: &B, committed: &[StoredEvent]) -> Result<(), DispatchError>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    bus.publish_all(committed.iter().map(StoredEvent::to_envelope))
        .map_err(|e| DispatchError::Publish(format!("{e:?}")))
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use crystalerp_events::InMemoryEventBus;
    use crystalerp_purchasing::{
        LotSpec, MarkLotUsed, MaterialCategory, PurchaseLot, PurchaseLotCommand, PurchaseLotId,
        RegisterLot,
    };

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn dispatcher() -> (CommandDispatcher<crate::event_store::InMemoryEventStore, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (
            CommandDispatcher::new(crate::event_store::InMemoryEventStore::new(), bus.clone()),
            bus,
        )
    }

    fn register(tenant_id: TenantId, lot_id: PurchaseLotId) -> PurchaseLotCommand {
        PurchaseLotCommand::RegisterLot(RegisterLot {
            tenant_id,
            lot_id,
            spec: LotSpec::new("Clear quartz", MaterialCategory::LooseBeads),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_publishes_and_returns_new_state() {
        let (dispatcher, bus) = dispatcher();
        let sub = bus.subscribe();
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());

        let (lot, committed) = dispatcher
            .dispatch(tenant_id, lot_id.0, "purchasing.lot", register(tenant_id, lot_id), |_, id| {
                PurchaseLot::empty(PurchaseLotId::new(id))
            })
            .unwrap();

        assert!(lot.is_created());
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(sub.try_recv().unwrap().event_id(), committed[0].event_id);
    }

    #[test]
    fn domain_conflicts_are_not_reported_as_races() {
        let (dispatcher, _bus) = dispatcher();
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());
        let make = |_: TenantId, id: AggregateId| PurchaseLot::empty(PurchaseLotId::new(id));

        dispatcher
            .dispatch(tenant_id, lot_id.0, "purchasing.lot", register(tenant_id, lot_id), make)
            .unwrap();
        let err = dispatcher
            .dispatch(tenant_id, lot_id.0, "purchasing.lot", register(tenant_id, lot_id), make)
            .unwrap_err();

        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[test]
    fn missing_aggregate_is_not_found() {
        let (dispatcher, _bus) = dispatcher();
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());

        let err = dispatcher
            .dispatch(
                tenant_id,
                lot_id.0,
                "purchasing.lot",
                PurchaseLotCommand::MarkLotUsed(MarkLotUsed {
                    tenant_id,
                    lot_id,
                    occurred_at: Utc::now(),
                }),
                |_, id| PurchaseLot::empty(PurchaseLotId::new(id)),
            )
            .unwrap_err();

        assert!(matches!(err, DispatchError::NotFound));
    }
}
