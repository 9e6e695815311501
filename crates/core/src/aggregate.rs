//! The decide/evolve contract shared by `PurchaseLot`, `Material` and `ProductSku`.

use crate::error::{DomainError, DomainResult};

pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Events applied so far; equals the stream revision after rehydration.
    fn version(&self) -> u64;

    /// True until the stream's creation event has been applied.
    fn is_new(&self) -> bool {
        self.version() == 0
    }
}

/// Revision a stream must be at for an append to go through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check. Only for streams with a single writer.
    Any,
    /// Exactly this revision. `Exact(0)` means the stream must not exist, which
    /// is how two first productions of one recipe are told apart.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn of<A: AggregateRoot>(aggregate: &A) -> Self {
        Self::Exact(aggregate.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            return Ok(());
        }
        Err(DomainError::conflict(format!(
            "stream moved (expected: {self:?}, actual: {actual})"
        )))
    }
}

/// `handle` decides, `apply` evolves. Neither does IO.
///
/// Quantities (lot figures, material usage, SKU stock) change only inside
/// `apply`, so replaying a stream always reproduces them.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Fold one event into state. Bumps the version by one.
    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn apply_all<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }
}
