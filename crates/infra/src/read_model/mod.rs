//! Storage behind the SKU catalog and inventory log projections.

mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
