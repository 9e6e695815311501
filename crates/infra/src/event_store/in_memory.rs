use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crystalerp_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. A single write lock covers a whole multi-stream
/// append, which is what makes it atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// All events of one batch must target the same tenant + aggregate stream.
    fn batch_key(events: &[UncommittedEvent]) -> Result<(StreamKey, String), EventStoreError> {
        let first = events
            .first()
            .ok_or_else(|| EventStoreError::InvalidAppend("empty stream batch".to_string()))?;

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != first.tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok((
            StreamKey {
                tenant_id: first.tenant_id,
                aggregate_id: first.aggregate_id,
            },
            first.aggregate_type.clone(),
        ))
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        self.append_streams(vec![StreamAppend::new(expected_version, events)])
    }

    fn append_streams(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batches: Vec<_> = batches.into_iter().filter(|b| !b.events.is_empty()).collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        let mut keyed = Vec::with_capacity(batches.len());
        let mut seen = HashSet::new();
        for batch in batches {
            let (key, aggregate_type) = Self::batch_key(&batch.events)?;
            if !seen.insert(key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one append",
                    key.aggregate_id
                )));
            }
            keyed.push((key, aggregate_type, batch));
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Phase 1: check every stream before touching any of them.
        for (key, aggregate_type, batch) in &keyed {
            let stream = streams.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);
            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    key.aggregate_id, batch.expected_version
                )));
            }
            if let Some(existing) = stream.first() {
                if &existing.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        // Phase 2: assign sequence numbers and append.
        let mut committed = Vec::new();
        for (key, _, batch) in keyed {
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_continue() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        let first = store
            .append(vec![event(t, a, "x"), event(t, a, "x")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(2)).unwrap();

        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second[0].sequence_number, 3);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());
        store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(0)).unwrap();

        let err = store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn multi_stream_append_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let t = TenantId::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        store.append(vec![event(t, b, "y")], ExpectedVersion::Exact(0)).unwrap();

        // Stream `a` would succeed, stream `b` is stale.
        let err = store
            .append_streams(vec![
                StreamAppend::new(ExpectedVersion::Exact(0), vec![event(t, a, "x")]),
                StreamAppend::new(ExpectedVersion::Exact(0), vec![event(t, b, "y")]),
            ])
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(t, a).unwrap().is_empty());
        assert_eq!(store.load_stream(t, b).unwrap().len(), 1);
    }

    #[test]
    fn multi_stream_append_rejects_duplicate_streams() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());
        let err = store
            .append_streams(vec![
                StreamAppend::new(ExpectedVersion::Exact(0), vec![event(t, a, "x")]),
                StreamAppend::new(ExpectedVersion::Exact(0), vec![event(t, a, "x")]),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn streams_are_tenant_scoped() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        store.append(vec![event(t1, a, "x")], ExpectedVersion::Exact(0)).unwrap();

        assert!(store.load_stream(t2, a).unwrap().is_empty());
        let err = store
            .append(vec![event(t1, a, "x"), event(t2, a, "x")], ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());
        store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(0)).unwrap();
        let err = store.append(vec![event(t, a, "y")], ExpectedVersion::Exact(1)).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }
}
