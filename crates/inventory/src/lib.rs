//! Inventory domain module: raw-material stock derived from purchase lots.
//!
//! - [`derivation`]: category-specific rules turning a lot into an original quantity and unit cost.
//! - [`material`]: the `Material` aggregate, 1:1 with a lot, tracking used/remaining
//!   quantity by re-aggregating its usage records on every change.

pub mod derivation;
pub mod material;

pub use derivation::{BeadConversionTable, DerivedStock, QuantityUnit, derive_stock};
pub use material::{
    AnnotateMaterial, DeriveMaterial, Material, MaterialAnnotated, MaterialCommand,
    MaterialDerived, MaterialEvent, MaterialId, MaterialResynced, MaterialSnapshot, RecordUsage,
    ResyncMaterial, ReturnUsage, UsageKind, UsageRecord, UsageRecorded, UsageReturned,
};
