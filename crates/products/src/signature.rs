//! Material signature: canonical, order-independent recipe of a SKU.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crystalerp_core::{DomainError, ValueObject};
use crystalerp_purchasing::PurchaseLotId;

/// Length (in bytes) of the truncated digest used as the dedup key.
const HASH_BYTES: usize = 16;

/// One line of a proposed recipe, as supplied by the caller (per produced unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialUsageInput {
    pub lot_id: PurchaseLotId,
    pub quantity_beads: i64,
    pub quantity_pieces: i64,
}

impl MaterialUsageInput {
    pub fn beads(lot_id: PurchaseLotId, quantity: i64) -> Self {
        Self {
            lot_id,
            quantity_beads: quantity,
            quantity_pieces: 0,
        }
    }

    pub fn pieces(lot_id: PurchaseLotId, quantity: i64) -> Self {
        Self {
            lot_id,
            quantity_beads: 0,
            quantity_pieces: quantity,
        }
    }
}

/// Normalized signature line. Field order is the serialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub purchase_lot_id: PurchaseLotId,
    pub quantity_used_beads: i64,
    pub quantity_used_pieces: i64,
}

impl SignatureEntry {
    /// Per-unit quantity drawn from the lot, in whichever unit the lot is counted in.
    pub fn quantity(&self) -> i64 {
        self.quantity_used_beads + self.quantity_used_pieces
    }
}

/// Content hash of a signature (truncated SHA-256, lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureHash(String);

impl SignatureHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SignatureHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical recipe: entries merged per lot and sorted by lot id (lexicographic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialSignature {
    entries: Vec<SignatureEntry>,
}

impl ValueObject for MaterialSignature {}

impl MaterialSignature {
    /// Normalize a list of usages into a signature.
    ///
    /// Duplicate lots are merged by summing their quantities. Empty lists,
    /// negative quantities and lines that consume nothing are rejected.
    pub fn from_usages(usages: &[MaterialUsageInput]) -> Result<Self, DomainError> {
        if usages.is_empty() {
            return Err(DomainError::validation("material usage list is empty"));
        }

        let mut merged: BTreeMap<String, SignatureEntry> = BTreeMap::new();
        for usage in usages {
            if usage.quantity_beads < 0 || usage.quantity_pieces < 0 {
                return Err(DomainError::validation(format!(
                    "negative quantity for lot {}",
                    usage.lot_id
                )));
            }
            let entry = merged
                .entry(usage.lot_id.to_string())
                .or_insert(SignatureEntry {
                    purchase_lot_id: usage.lot_id,
                    quantity_used_beads: 0,
                    quantity_used_pieces: 0,
                });
            let overflow = || DomainError::validation(format!("quantity for lot {} overflows", usage.lot_id));
            entry.quantity_used_beads = entry
                .quantity_used_beads
                .checked_add(usage.quantity_beads)
                .ok_or_else(overflow)?;
            entry.quantity_used_pieces = entry
                .quantity_used_pieces
                .checked_add(usage.quantity_pieces)
                .ok_or_else(overflow)?;
        }

        if let Some(mixed) = merged.values().find(|e| e.quantity_used_beads.checked_add(e.quantity_used_pieces).is_none()) {
            return Err(DomainError::validation(format!(
                "quantity for lot {} overflows",
                mixed.purchase_lot_id
            )));
        }
        if let Some(empty) = merged.values().find(|e| e.quantity() == 0) {
            return Err(DomainError::validation(format!(
                "lot {} is listed but nothing is consumed",
                empty.purchase_lot_id
            )));
        }

        Ok(Self {
            entries: merged.into_values().collect(),
        })
    }

    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    /// Deterministic serialized form (the hash input).
    pub fn canonical_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(&self.entries)
            .map_err(|e| DomainError::validation(format!("signature serialization failed: {e}")))
    }

    pub fn hash(&self) -> Result<SignatureHash, DomainError> {
        let canonical = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Ok(SignatureHash(hex::encode(&digest[..HASH_BYTES])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crystalerp_core::AggregateId;

    fn lot() -> PurchaseLotId {
        PurchaseLotId::new(AggregateId::new())
    }

    #[test]
    fn reordered_usages_hash_identically() {
        let (a, b) = (lot(), lot());
        let first = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(a, 5),
            MaterialUsageInput::beads(b, 3),
        ])
        .unwrap();
        let second = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(b, 3),
            MaterialUsageInput::beads(a, 5),
        ])
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.hash().unwrap(), second.hash().unwrap());
    }

    #[test]
    fn changing_a_quantity_changes_the_hash() {
        let (a, b) = (lot(), lot());
        let base = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(a, 5),
            MaterialUsageInput::beads(b, 3),
        ])
        .unwrap();
        let bumped = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(a, 5),
            MaterialUsageInput::beads(b, 4),
        ])
        .unwrap();
        assert_ne!(base.hash().unwrap(), bumped.hash().unwrap());
    }

    #[test]
    fn beads_and_pieces_are_distinct() {
        let a = lot();
        let beads = MaterialSignature::from_usages(&[MaterialUsageInput::beads(a, 2)]).unwrap();
        let pieces = MaterialSignature::from_usages(&[MaterialUsageInput::pieces(a, 2)]).unwrap();
        assert_ne!(beads.hash().unwrap(), pieces.hash().unwrap());
    }

    #[test]
    fn merging_duplicates_past_i64_max_is_rejected() {
        let a = lot();
        let err = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(a, i64::MAX - 1),
            MaterialUsageInput::beads(a, 2),
        ])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("overflows")));

        let err = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(a, i64::MAX),
            MaterialUsageInput::pieces(a, 1),
        ])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn duplicate_lots_are_merged() {
        let a = lot();
        let split = MaterialSignature::from_usages(&[
            MaterialUsageInput::beads(a, 2),
            MaterialUsageInput::beads(a, 3),
        ])
        .unwrap();
        let whole = MaterialSignature::from_usages(&[MaterialUsageInput::beads(a, 5)]).unwrap();

        assert_eq!(split.entries().len(), 1);
        assert_eq!(split.entries()[0].quantity(), 5);
        assert_eq!(split.hash().unwrap(), whole.hash().unwrap());
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(matches!(
            MaterialSignature::from_usages(&[]),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn zero_and_negative_lines_are_rejected() {
        let a = lot();
        assert!(MaterialSignature::from_usages(&[MaterialUsageInput::beads(a, 0)]).is_err());
        assert!(MaterialSignature::from_usages(&[MaterialUsageInput::beads(a, -1)]).is_err());
    }

    #[test]
    fn hash_is_fixed_length_hex() {
        let sig = MaterialSignature::from_usages(&[MaterialUsageInput::beads(lot(), 1)]).unwrap();
        let hash = sig.hash().unwrap();
        assert_eq!(hash.as_str().len(), HASH_BYTES * 2);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn entries_are_sorted_by_lot_id_string() {
        let lots: Vec<_> = (0..6).map(|_| lot()).collect();
        let usages: Vec<_> = lots.iter().rev().map(|l| MaterialUsageInput::beads(*l, 1)).collect();
        let sig = MaterialSignature::from_usages(&usages).unwrap();

        let ids: Vec<String> = sig.entries().iter().map(|e| e.purchase_lot_id.to_string()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: any permutation of the same usage list yields the same hash.
            #[test]
            fn hash_is_order_independent(
                quantities in prop::collection::vec(1i64..500, 1..8),
                seed in any::<u64>()
            ) {
                let usages: Vec<_> = quantities
                    .iter()
                    .map(|q| MaterialUsageInput::beads(lot(), *q))
                    .collect();

                let mut shuffled = usages.clone();
                // Deterministic rotation + reversal driven by the seed.
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
                if seed % 2 == 0 {
                    shuffled.reverse();
                }

                let a = MaterialSignature::from_usages(&usages).unwrap().hash().unwrap();
                let b = MaterialSignature::from_usages(&shuffled).unwrap().hash().unwrap();
                prop_assert_eq!(a, b);
            }
        }
    }
}
