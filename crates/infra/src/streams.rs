//! Aggregate type names stamped on every stored event.

pub const PURCHASE_LOT: &str = "purchasing.lot";
pub const MATERIAL: &str = "inventory.material";
pub const PRODUCT_SKU: &str = "products.sku";
