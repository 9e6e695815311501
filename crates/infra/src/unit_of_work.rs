//! Multi-stream unit of work.
//!
//! Ledger operations touch several aggregates at once (a SKU plus every
//! material in its recipe). A `UnitOfWork` loads them, runs their commands in
//! memory, and stages the resulting events per stream. `commit` hands everything
//! to [`EventStore::append_streams`], so either all streams advance or none do.
//!
//! Each stream is staged with the version it had when loaded. If another writer
//! got there first, the commit fails with `DispatchError::Concurrency` and
//! nothing is written.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crystalerp_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use crystalerp_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{DispatchError, load_aggregate, publish_all, to_uncommitted};
use crate::event_store::{EventStore, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug)]
struct StagedStream {
    aggregate_id: AggregateId,
    expected_version: u64,
    events: Vec<UncommittedEvent>,
}

#[derive(Debug)]
pub struct UnitOfWork<'s, S: ?Sized> {
    store: &'s S,
    tenant_id: TenantId,
    staged: Vec<StagedStream>,
}

impl<'s, S> UnitOfWork<'s, S>
where
    S: EventStore + ?Sized,
{
    pub fn new(store: &'s S, tenant_id: TenantId) -> Self {
        Self {
            store,
            tenant_id,
            staged: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Load and rehydrate an aggregate for this unit's tenant.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        load_aggregate(self.store, self.tenant_id, aggregate_id, make_aggregate)
    }

    /// Run a command against `aggregate`, stage its events and apply them in place.
    ///
    /// Later commands on the same aggregate see the staged state. Nothing is
    /// persisted until [`UnitOfWork::commit`].
    pub fn decide<A>(
        &mut self,
        aggregate: &mut A,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: crystalerp_events::Event + Serialize,
    {
        let version_before = aggregate.version();
        let decided = aggregate.handle(command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(decided);
        }

        let uncommitted = to_uncommitted(self.tenant_id, aggregate_id, aggregate_type, &decided)?;
        match self.staged.iter_mut().find(|s| s.aggregate_id == aggregate_id) {
            Some(stream) => stream.events.extend(uncommitted),
            None => self.staged.push(StagedStream {
                aggregate_id,
                expected_version: version_before,
                events: uncommitted,
            }),
        }

        aggregate.apply_all(&decided);
        Ok(decided)
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Number of streams with staged events.
    pub fn stream_count(&self) -> usize {
        self.staged.len()
    }

    /// Atomically append every staged stream, then publish the committed events.
    pub fn commit<B>(self, bus: &B) -> Result<Vec<StoredEvent>, DispatchError>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        if self.staged.is_empty() {
            return Ok(vec![]);
        }

        let batches = self
            .staged
            .into_iter()
            .map(|s| StreamAppend::new(ExpectedVersion::Exact(s.expected_version), s.events))
            .collect();
        let committed = self.store.append_streams(batches)?;

        publish_all(bus, &committed)?;
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crystalerp_events::InMemoryEventBus;
    use crystalerp_purchasing::{
        CorrectLot, LotSpec, MaterialCategory, PurchaseLot, PurchaseLotCommand, PurchaseLotId,
        RegisterLot,
    };

    use crate::event_store::InMemoryEventStore;

    fn spec(pieces: i64) -> LotSpec {
        LotSpec {
            piece_count: Some(pieces),
            ..LotSpec::new("Rose quartz", MaterialCategory::LooseBeads)
        }
    }

    fn register(tenant_id: TenantId, lot_id: PurchaseLotId) -> PurchaseLotCommand {
        PurchaseLotCommand::RegisterLot(RegisterLot {
            tenant_id,
            lot_id,
            spec: spec(10),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn staged_events_are_invisible_until_commit() {
        let store = InMemoryEventStore::new();
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let tenant_id = TenantId::new();
        let (a, b) = (PurchaseLotId::new(AggregateId::new()), PurchaseLotId::new(AggregateId::new()));

        let mut uow = UnitOfWork::new(&store, tenant_id);
        for lot_id in [a, b] {
            let mut lot: PurchaseLot = uow.load(lot_id.0, |_, id| PurchaseLot::empty(PurchaseLotId::new(id))).unwrap();
            uow.decide(&mut lot, lot_id.0, "purchasing.lot", &register(tenant_id, lot_id))
                .unwrap();
            assert!(lot.is_created());
        }
        assert_eq!(uow.stream_count(), 2);
        assert!(store.load_stream(tenant_id, a.0).unwrap().is_empty());

        let committed = uow.commit(&bus).unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(store.load_stream(tenant_id, b.0).unwrap().len(), 1);
    }

    #[test]
    fn repeated_decisions_on_one_aggregate_share_a_stream() {
        let store = InMemoryEventStore::new();
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());

        let mut uow = UnitOfWork::new(&store, tenant_id);
        let mut lot: PurchaseLot = uow.load(lot_id.0, |_, id| PurchaseLot::empty(PurchaseLotId::new(id))).unwrap();
        uow.decide(&mut lot, lot_id.0, "purchasing.lot", &register(tenant_id, lot_id))
            .unwrap();
        uow.decide(
            &mut lot,
            lot_id.0,
            "purchasing.lot",
            &PurchaseLotCommand::CorrectLot(CorrectLot {
                tenant_id,
                lot_id,
                spec: spec(12),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(uow.stream_count(), 1);
        let committed = uow.commit(&bus).unwrap();
        assert_eq!(
            committed.iter().map(|e| e.sequence_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn stale_unit_of_work_writes_nothing() {
        let store = InMemoryEventStore::new();
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());
        let other = PurchaseLotId::new(AggregateId::new());

        // Two writers load the same empty stream.
        let mut first = UnitOfWork::new(&store, tenant_id);
        let mut second = UnitOfWork::new(&store, tenant_id);
        let mut lot_1: PurchaseLot = first.load(lot_id.0, |_, id| PurchaseLot::empty(PurchaseLotId::new(id))).unwrap();
        let mut lot_2: PurchaseLot = second.load(lot_id.0, |_, id| PurchaseLot::empty(PurchaseLotId::new(id))).unwrap();
        first
            .decide(&mut lot_1, lot_id.0, "purchasing.lot", &register(tenant_id, lot_id))
            .unwrap();
        second
            .decide(&mut lot_2, lot_id.0, "purchasing.lot", &register(tenant_id, lot_id))
            .unwrap();
        let mut other_lot: PurchaseLot = second.load(other.0, |_, id| PurchaseLot::empty(PurchaseLotId::new(id))).unwrap();
        second
            .decide(&mut other_lot, other.0, "purchasing.lot", &register(tenant_id, other))
            .unwrap();

        first.commit(&bus).unwrap();
        let err = second.commit(&bus).unwrap_err();

        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert!(store.load_stream(tenant_id, other.0).unwrap().is_empty());
    }
}
