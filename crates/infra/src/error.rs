//! Caller-facing ledger errors.

use rust_decimal::Decimal;
use thiserror::Error;

use crystalerp_inventory::MaterialId;
use crystalerp_products::SkuId;

use crate::command_dispatcher::DispatchError;
use crate::ledger::MaterialShortfall;

/// Every failure a ledger operation can report. None of them leave partial effects.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Empty or malformed material usage list.
    #[error("invalid material composition: {0}")]
    InvalidComposition(String),

    #[error("insufficient stock for sku {sku_id} (requested: {requested}, available: {available})")]
    InsufficientStock {
        sku_id: SkuId,
        requested: i64,
        available: i64,
    },

    #[error("insufficient materials: {}", describe_shortfalls(.0))]
    InsufficientMaterials(Vec<MaterialShortfall>),

    /// Another writer changed one of the streams first. Safe to retry from scratch.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("data integrity violation on material {material_id}: remaining quantity is {remaining_quantity}")]
    DataIntegrityViolation {
        material_id: MaterialId,
        remaining_quantity: i64,
    },

    /// The inventory log and the SKU's quantity disagree.
    #[error("ledger divergence on sku {sku_id}: {detail}")]
    LedgerDivergence { sku_id: SkuId, detail: String },

    #[error("price mismatch on sku {sku_id}: existing {existing}, proposed {proposed}")]
    PriceMismatch {
        sku_id: SkuId,
        existing: Decimal,
        proposed: Decimal,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store failure: {0}")]
    Store(String),
}

impl LedgerError {
    /// Only lost races may be retried; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification(_))
    }

    /// Map a dispatch failure on a SKU stream, where a shortfall means not enough stock.
    pub(crate) fn for_sku(sku_id: SkuId, err: DispatchError) -> Self {
        match err {
            DispatchError::InsufficientQuantity {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                sku_id,
                requested,
                available,
            },
            DispatchError::NotFound => LedgerError::NotFound(format!("sku {sku_id}")),
            other => LedgerError::from(other),
        }
    }
}

impl From<DispatchError> for LedgerError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => LedgerError::ConcurrentModification(msg),
            DispatchError::Validation(msg)
            | DispatchError::InvariantViolation(msg)
            | DispatchError::Conflict(msg) => LedgerError::Validation(msg),
            DispatchError::NotFound => LedgerError::NotFound("aggregate".to_string()),
            DispatchError::InsufficientQuantity {
                requested,
                available,
            } => LedgerError::Validation(format!(
                "insufficient quantity (requested: {requested}, available: {available})"
            )),
            DispatchError::TenantIsolation(msg) | DispatchError::Deserialize(msg) => {
                LedgerError::Store(msg)
            }
            DispatchError::Store(e) => LedgerError::Store(e.to_string()),
            publish @ DispatchError::Publish(_) => LedgerError::Store(publish.to_string()),
        }
    }
}

fn describe_shortfalls(shortfalls: &[MaterialShortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| {
            format!(
                "material {} needs {} but has {} (short {}, {} units)",
                s.material_id, s.required, s.remaining, s.shortfall, s.units_short
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crystalerp_core::AggregateId;

    #[test]
    fn only_races_are_retryable() {
        assert!(LedgerError::from(DispatchError::Concurrency("stale".into())).is_retryable());
        assert!(!LedgerError::Validation("bad".into()).is_retryable());
        assert!(!LedgerError::InsufficientMaterials(vec![]).is_retryable());
    }

    #[test]
    fn sku_shortfalls_become_insufficient_stock() {
        let sku_id = SkuId(AggregateId::new());
        let err = LedgerError::for_sku(
            sku_id,
            DispatchError::InsufficientQuantity {
                requested: 12,
                available: 10,
            },
        );
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 12,
                available: 10,
                ..
            }
        ));
    }
}
