//! Event contracts and pub/sub mechanics shared by every ledger module.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, StreamPosition};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
