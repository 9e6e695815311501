//! Post-commit fan-out of ledger events.
//!
//! Only committed events are published, so a subscriber may see an event twice
//! (republish after a failed publish) but never one the store rejected.
//! Read models dedupe by stream position.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// One subscriber's queue. Every subscription sees every published message.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything queued right now, oldest first. Does not block.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Publisher side used by the ledger after each commit.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    /// Publish a commit's events in order, stopping at the first failure.
    fn publish_all<I>(&self, messages: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = M>,
        Self: Sized,
    {
        messages.into_iter().try_for_each(|m| self.publish(m))
    }

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        B::publish(self, message)
    }

    fn subscribe(&self) -> Subscription<M> {
        B::subscribe(self)
    }
}
