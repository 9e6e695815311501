//! Products domain module: finished-good SKUs and their inventory log.
//!
//! A SKU is identified by its material signature (the exact multiset of lots and
//! quantities consumed to make one unit). Every quantity change on a SKU is an
//! event carrying a full log entry, so the event stream *is* the inventory log.

pub mod signature;
pub mod sku;

pub use signature::{MaterialSignature, MaterialUsageInput, SignatureEntry, SignatureHash};
pub use sku::{
    AdjustStock, DestroyStock, InventoryAction, LogEntry, ProduceStock, ProductSku, ReferenceType,
    RegisterSku, SellStock, SetSkuStatus, SkuCosts, SkuEvent, SkuCommand, SkuId, SkuRegistered,
    SkuSnapshot, SkuStatus, SkuStatusChanged, StockDestroyed, StockMovement, base_sku_name,
    format_sku_code, parse_sku_code_sequence,
};
