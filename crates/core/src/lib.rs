//! Building blocks for the lot, material and SKU aggregates: ids, the
//! decide/apply contract and business-rule errors. No IO lives here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId};
pub use value_object::ValueObject;
