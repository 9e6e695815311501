//! Logging setup for anything embedding the ledger.

pub mod tracing;

pub use self::tracing::{DEFAULT_FILTER, init, init_with_filter};
