//! Stock derivation rules: purchase lot → original quantity + costs.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crystalerp_purchasing::{LotSpec, MaterialCategory};

/// What one unit of a material's quantity means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityUnit {
    Beads,
    Pieces,
}

impl From<MaterialCategory> for QuantityUnit {
    fn from(category: MaterialCategory) -> Self {
        if category.is_bead_counted() {
            QuantityUnit::Beads
        } else {
            QuantityUnit::Pieces
        }
    }
}

/// Beads-per-gram rates indexed by bead diameter (mm).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadConversionTable {
    rates: Vec<(Decimal, Decimal)>,
    default_rate: Decimal,
}

impl Default for BeadConversionTable {
    fn default() -> Self {
        Self {
            rates: vec![
                (Decimal::from(4), Decimal::from(25)),
                (Decimal::from(6), Decimal::from(11)),
                (Decimal::from(8), Decimal::from(6)),
                (Decimal::from(10), Decimal::from(4)),
                (Decimal::from(12), Decimal::from(3)),
            ],
            default_rate: Decimal::from(5),
        }
    }
}

impl BeadConversionTable {
    pub fn new(rates: Vec<(Decimal, Decimal)>, default_rate: Decimal) -> Self {
        Self {
            rates,
            default_rate,
        }
    }

    /// Rate for an exact diameter match, else the default rate.
    pub fn beads_per_gram(&self, diameter_mm: Option<Decimal>) -> Decimal {
        diameter_mm
            .and_then(|d| self.rates.iter().find(|(size, _)| *size == d))
            .map(|(_, rate)| *rate)
            .unwrap_or(self.default_rate)
    }
}

/// Figures derived from a lot. Recomputed wholesale whenever the lot changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedStock {
    pub unit: QuantityUnit,
    pub original_quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
}

/// Derive stock figures from a lot spec.
///
/// - Bead-counted categories prefer the explicit count, else `floor(weight × beads_per_gram)`,
///   else zero.
/// - Piece-counted categories use the explicit count, defaulting to one piece.
/// - Total cost is the lot's total price, else `unit_price × quantity`.
///   Unit cost is `total_cost / max(quantity, 1)`.
pub fn derive_stock(spec: &LotSpec, table: &BeadConversionTable) -> DerivedStock {
    let unit = QuantityUnit::from(spec.category);

    let original_quantity = match unit {
        QuantityUnit::Beads => spec.piece_count.unwrap_or_else(|| {
            spec.weight_grams
                .map(|w| (w * table.beads_per_gram(spec.diameter_mm)).floor())
                .and_then(|beads| beads.to_i64())
                .unwrap_or(0)
        }),
        QuantityUnit::Pieces => spec.piece_count.unwrap_or(1),
    };

    let total_cost = spec
        .total_price
        .or_else(|| spec.unit_price.map(|p| p * Decimal::from(original_quantity)))
        .unwrap_or(Decimal::ZERO);
    let unit_cost = (total_cost / Decimal::from(original_quantity.max(1))).round_dp(4);

    DerivedStock {
        unit,
        original_quantity,
        unit_cost,
        total_cost,
    }
}
