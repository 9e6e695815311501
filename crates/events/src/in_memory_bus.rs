//! Process-local bus backing the ledger in tests and single-node setups.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// A publisher panicked while holding the subscriber list.
    Poisoned,
}

impl std::fmt::Display for InMemoryBusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poisoned => f.write_str("event bus subscriber list poisoned"),
        }
    }
}

impl std::error::Error for InMemoryBusError {}

/// Clones each message to every live subscriber. Subscribers whose receiving
/// end is gone are pruned during publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Subscribers still attached as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // On a poisoned list `tx` drops here and the subscription reads as disconnected.
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        Subscription::new(rx)
    }
}
