//! Infrastructure layer: event store, dispatch, read models and the ledger service.

pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod event_store;
pub mod ledger;
pub mod projections;
pub mod read_model;
pub mod streams;
pub mod unit_of_work;


pub use config::{LedgerConfig, PriceMismatchPolicy};
pub use error::LedgerError;
pub use ledger::{Ledger, LedgerReceipt};
