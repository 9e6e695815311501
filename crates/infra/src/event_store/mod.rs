//! Append-only event store boundary.
//!
//! Tenant-scoped event streams with no storage assumptions. The ledger commits
//! every operation through one [`EventStore::append_streams`] call, so a SKU's
//! log entry and the material usages it implies land together or not at all.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
