use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crystalerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use crystalerp_events::Event;
use crystalerp_purchasing::{MaterialCategory, PurchaseLotId};

use crate::derivation::{DerivedStock, QuantityUnit};

const MATERIAL_NAMESPACE: Uuid = Uuid::from_u128(0x6d61_7465_7269_616c_8c1a_4b2e_9f30_1d7e);

/// Material identifier. Always derived from the source lot, so a lot has exactly one material.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(pub AggregateId);

impl MaterialId {
    pub fn for_lot(lot_id: PurchaseLotId) -> Self {
        Self(AggregateId::derived(
            &MATERIAL_NAMESPACE,
            lot_id.0.as_uuid().as_bytes(),
        ))
    }
}

impl core::fmt::Display for MaterialId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Consumption,
    Return,
}

/// One consumption edge between this material and a SKU.
///
/// Returns are recorded as separate records with a negative quantity; existing
/// records are never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub usage_id: Uuid,
    pub sku_ref: AggregateId,
    pub kind: UsageKind,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: Material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    id: MaterialId,
    tenant_id: Option<TenantId>,
    lot_id: Option<PurchaseLotId>,
    category: MaterialCategory,
    unit: QuantityUnit,
    original_quantity: i64,
    used_quantity: i64,
    remaining_quantity: i64,
    unit_cost: Decimal,
    total_cost: Decimal,
    usages: Vec<UsageRecord>,
    notes: Vec<String>,
    source_used: bool,
    version: u64,
    created: bool,
}

/// Serializable point-in-time view of a material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSnapshot {
    pub material_id: MaterialId,
    pub lot_id: Option<PurchaseLotId>,
    pub category: MaterialCategory,
    pub unit: QuantityUnit,
    pub original_quantity: i64,
    pub used_quantity: i64,
    pub remaining_quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub source_used: bool,
    pub needs_review: bool,
    pub notes: Vec<String>,
}

impl Material {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: MaterialId) -> Self {
        Self {
            id,
            tenant_id: None,
            lot_id: None,
            category: MaterialCategory::LooseBeads,
            unit: QuantityUnit::Beads,
            original_quantity: 0,
            used_quantity: 0,
            remaining_quantity: 0,
            unit_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            usages: Vec::new(),
            notes: Vec::new(),
            source_used: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> MaterialId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn lot_id(&self) -> Option<PurchaseLotId> {
        self.lot_id
    }

    pub fn unit(&self) -> QuantityUnit {
        self.unit
    }

    pub fn original_quantity(&self) -> i64 {
        self.original_quantity
    }

    pub fn used_quantity(&self) -> i64 {
        self.used_quantity
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.remaining_quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn usages(&self) -> &[UsageRecord] {
        &self.usages
    }

    pub fn is_source_used(&self) -> bool {
        self.source_used
    }

    /// Usage exceeds what was ever purchased. Upstream data error; flagged for review.
    pub fn needs_review(&self) -> bool {
        self.remaining_quantity < 0
    }

    /// Net quantity a SKU still holds of this material (consumptions minus returns).
    pub fn net_usage_by(&self, sku_ref: AggregateId) -> i64 {
        self.usages
            .iter()
            .filter(|u| u.sku_ref == sku_ref)
            .map(|u| u.quantity)
            .sum()
    }

    pub fn snapshot(&self) -> MaterialSnapshot {
        MaterialSnapshot {
            material_id: self.id,
            lot_id: self.lot_id,
            category: self.category,
            unit: self.unit,
            original_quantity: self.original_quantity,
            used_quantity: self.used_quantity,
            remaining_quantity: self.remaining_quantity,
            unit_cost: self.unit_cost,
            total_cost: self.total_cost,
            source_used: self.source_used,
            needs_review: self.needs_review(),
            notes: self.notes.clone(),
        }
    }

    /// Full re-aggregation over every usage record. Never an incremental delta.
    fn recompute(&mut self) {
        self.used_quantity = self.usages.iter().map(|u| u.quantity).sum();
        self.remaining_quantity = self.original_quantity - self.used_quantity;
    }
}

impl AggregateRoot for Material {
    type Id = MaterialId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DeriveMaterial (lot became ACTIVE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveMaterial {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub lot_id: PurchaseLotId,
    pub category: MaterialCategory,
    pub stock: DerivedStock,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResyncMaterial (lot fields were corrected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncMaterial {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub category: MaterialCategory,
    pub stock: DerivedStock,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordUsage (consume `quantity` for a SKU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUsage {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub usage_id: Uuid,
    pub sku_ref: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnUsage (give back material a SKU consumed, e.g. on destroy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnUsage {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub usage_id: Uuid,
    pub sku_ref: AggregateId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AnnotateMaterial. `source_used` freezes lot-driven resyncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotateMaterial {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub note: String,
    pub source_used: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialCommand {
    DeriveMaterial(DeriveMaterial),
    ResyncMaterial(ResyncMaterial),
    RecordUsage(RecordUsage),
    ReturnUsage(ReturnUsage),
    AnnotateMaterial(AnnotateMaterial),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialDerived {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub lot_id: PurchaseLotId,
    pub category: MaterialCategory,
    pub stock: DerivedStock,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialResynced {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub category: MaterialCategory,
    pub stock: DerivedStock,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecorded {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub usage: UsageRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReturned {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub usage: UsageRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialAnnotated {
    pub tenant_id: TenantId,
    pub material_id: MaterialId,
    pub note: String,
    pub source_used: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialEvent {
    MaterialDerived(MaterialDerived),
    MaterialResynced(MaterialResynced),
    UsageRecorded(UsageRecorded),
    UsageReturned(UsageReturned),
    MaterialAnnotated(MaterialAnnotated),
}

impl Event for MaterialEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MaterialEvent::MaterialDerived(_) => "inventory.material.derived",
            MaterialEvent::MaterialResynced(_) => "inventory.material.resynced",
            MaterialEvent::UsageRecorded(_) => "inventory.material.usage_recorded",
            MaterialEvent::UsageReturned(_) => "inventory.material.usage_returned",
            MaterialEvent::MaterialAnnotated(_) => "inventory.material.annotated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MaterialEvent::MaterialDerived(e) => e.occurred_at,
            MaterialEvent::MaterialResynced(e) => e.occurred_at,
            MaterialEvent::UsageRecorded(e) => e.usage.occurred_at,
            MaterialEvent::UsageReturned(e) => e.usage.occurred_at,
            MaterialEvent::MaterialAnnotated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Material {
    type Command = MaterialCommand;
    type Event = MaterialEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MaterialEvent::MaterialDerived(e) => {
                self.id = e.material_id;
                self.tenant_id = Some(e.tenant_id);
                self.lot_id = Some(e.lot_id);
                self.category = e.category;
                self.unit = e.stock.unit;
                self.original_quantity = e.stock.original_quantity;
                self.unit_cost = e.stock.unit_cost;
                self.total_cost = e.stock.total_cost;
                self.created = true;
            }
            MaterialEvent::MaterialResynced(e) => {
                self.category = e.category;
                self.unit = e.stock.unit;
                self.original_quantity = e.stock.original_quantity;
                self.unit_cost = e.stock.unit_cost;
                self.total_cost = e.stock.total_cost;
            }
            MaterialEvent::UsageRecorded(e) => self.usages.push(e.usage.clone()),
            MaterialEvent::UsageReturned(e) => self.usages.push(e.usage.clone()),
            MaterialEvent::MaterialAnnotated(e) => {
                self.notes.push(e.note.clone());
                self.source_used |= e.source_used;
            }
        }

        self.recompute();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MaterialCommand::DeriveMaterial(cmd) => self.handle_derive(cmd),
            MaterialCommand::ResyncMaterial(cmd) => self.handle_resync(cmd),
            MaterialCommand::RecordUsage(cmd) => self.handle_record_usage(cmd),
            MaterialCommand::ReturnUsage(cmd) => self.handle_return_usage(cmd),
            MaterialCommand::AnnotateMaterial(cmd) => self.handle_annotate(cmd),
        }
    }
}

impl Material {
    fn ensure_target(&self, tenant_id: TenantId, material_id: MaterialId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != material_id {
            return Err(DomainError::invariant("material_id mismatch"));
        }
        Ok(())
    }

    fn handle_derive(&self, cmd: &DeriveMaterial) -> Result<Vec<MaterialEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("material already derived for this lot"));
        }
        if cmd.material_id != MaterialId::for_lot(cmd.lot_id) {
            return Err(DomainError::invariant("material_id is not derived from lot_id"));
        }
        DomainError::require_non_negative("original_quantity", cmd.stock.original_quantity)?;

        Ok(vec![MaterialEvent::MaterialDerived(MaterialDerived {
            tenant_id: cmd.tenant_id,
            material_id: cmd.material_id,
            lot_id: cmd.lot_id,
            category: cmd.category,
            stock: cmd.stock.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resync(&self, cmd: &ResyncMaterial) -> Result<Vec<MaterialEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.material_id)?;
        if self.source_used {
            // Figures are frozen once the lot is USED.
            return Ok(vec![]);
        }
        if cmd.stock.unit != self.unit && !self.usages.is_empty() {
            return Err(DomainError::invariant(
                "cannot change counting unit of a material that has usages",
            ));
        }
        let unchanged = cmd.category == self.category
            && cmd.stock.unit == self.unit
            && cmd.stock.original_quantity == self.original_quantity
            && cmd.stock.unit_cost == self.unit_cost
            && cmd.stock.total_cost == self.total_cost;
        if unchanged {
            return Ok(vec![]);
        }

        Ok(vec![MaterialEvent::MaterialResynced(MaterialResynced {
            tenant_id: cmd.tenant_id,
            material_id: cmd.material_id,
            category: cmd.category,
            stock: cmd.stock.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_usage(&self, cmd: &RecordUsage) -> Result<Vec<MaterialEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.material_id)?;
        DomainError::require_positive("usage quantity", cmd.quantity)?;
        if self.source_used {
            return Err(DomainError::invariant("source lot is USED; material is frozen"));
        }
        if cmd.quantity > self.remaining_quantity {
            return Err(DomainError::insufficient(
                cmd.quantity,
                self.remaining_quantity.max(0),
            ));
        }

        Ok(vec![MaterialEvent::UsageRecorded(UsageRecorded {
            tenant_id: cmd.tenant_id,
            material_id: cmd.material_id,
            usage: UsageRecord {
                usage_id: cmd.usage_id,
                sku_ref: cmd.sku_ref,
                kind: UsageKind::Consumption,
                quantity: cmd.quantity,
                unit_cost: self.unit_cost,
                total_cost: self.unit_cost * Decimal::from(cmd.quantity),
                occurred_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_return_usage(&self, cmd: &ReturnUsage) -> Result<Vec<MaterialEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.material_id)?;
        DomainError::require_positive("return quantity", cmd.quantity)?;
        let held = self.net_usage_by(cmd.sku_ref);
        if cmd.quantity > held {
            return Err(DomainError::invariant(format!(
                "cannot return {} to material {}: sku only holds {held}",
                cmd.quantity, self.id
            )));
        }

        Ok(vec![MaterialEvent::UsageReturned(UsageReturned {
            tenant_id: cmd.tenant_id,
            material_id: cmd.material_id,
            usage: UsageRecord {
                usage_id: cmd.usage_id,
                sku_ref: cmd.sku_ref,
                kind: UsageKind::Return,
                quantity: -cmd.quantity,
                unit_cost: self.unit_cost,
                total_cost: -(self.unit_cost * Decimal::from(cmd.quantity)),
                occurred_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_annotate(&self, cmd: &AnnotateMaterial) -> Result<Vec<MaterialEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.material_id)?;
        if cmd.note.trim().is_empty() {
            return Err(DomainError::validation("note cannot be empty"));
        }

        Ok(vec![MaterialEvent::MaterialAnnotated(MaterialAnnotated {
            tenant_id: cmd.tenant_id,
            material_id: cmd.material_id,
            note: cmd.note.clone(),
            source_used: cmd.source_used,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stock(original_quantity: i64) -> DerivedStock {
        DerivedStock {
            unit: QuantityUnit::Beads,
            original_quantity,
            unit_cost: dec!(0.5),
            total_cost: dec!(0.5) * Decimal::from(original_quantity),
        }
    }

    fn derived(original_quantity: i64) -> (Material, TenantId) {
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());
        let material_id = MaterialId::for_lot(lot_id);
        let mut material = Material::empty(material_id);
        let events = material
            .handle(&MaterialCommand::DeriveMaterial(DeriveMaterial {
                tenant_id,
                material_id,
                lot_id,
                category: MaterialCategory::LooseBeads,
                stock: stock(original_quantity),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        material.apply(&events[0]);
        (material, tenant_id)
    }

    fn consume(material: &mut Material, tenant_id: TenantId, sku_ref: AggregateId, quantity: i64) {
        let events = material
            .handle(&MaterialCommand::RecordUsage(RecordUsage {
                tenant_id,
                material_id: material.id_typed(),
                usage_id: Uuid::now_v7(),
                sku_ref,
                quantity,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            material.apply(e);
        }
    }

    #[test]
    fn derive_starts_with_everything_remaining() {
        let (material, _) = derived(180);
        assert_eq!(material.original_quantity(), 180);
        assert_eq!(material.used_quantity(), 0);
        assert_eq!(material.remaining_quantity(), 180);
    }

    #[test]
    fn material_id_must_come_from_lot() {
        let lot_id = PurchaseLotId::new(AggregateId::new());
        let bogus = MaterialId(AggregateId::new());
        let err = Material::empty(bogus)
            .handle(&MaterialCommand::DeriveMaterial(DeriveMaterial {
                tenant_id: TenantId::new(),
                material_id: bogus,
                lot_id,
                category: MaterialCategory::LooseBeads,
                stock: stock(10),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn usage_reduces_remaining_and_captures_cost() {
        let (mut material, tenant_id) = derived(100);
        consume(&mut material, tenant_id, AggregateId::new(), 30);

        assert_eq!(material.used_quantity(), 30);
        assert_eq!(material.remaining_quantity(), 70);
        assert_eq!(material.usages()[0].total_cost, dec!(15));
    }

    #[test]
    fn usage_beyond_remaining_is_rejected() {
        let (material, tenant_id) = derived(10);
        let err = material
            .handle(&MaterialCommand::RecordUsage(RecordUsage {
                tenant_id,
                material_id: material.id_typed(),
                usage_id: Uuid::now_v7(),
                sku_ref: AggregateId::new(),
                quantity: 11,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient(11, 10));
    }

    #[test]
    fn return_is_capped_by_what_the_sku_holds() {
        let (mut material, tenant_id) = derived(100);
        let sku = AggregateId::new();
        consume(&mut material, tenant_id, sku, 8);

        let over = material.handle(&MaterialCommand::ReturnUsage(ReturnUsage {
            tenant_id,
            material_id: material.id_typed(),
            usage_id: Uuid::now_v7(),
            sku_ref: sku,
            quantity: 9,
            occurred_at: Utc::now(),
        }));
        assert!(matches!(over, Err(DomainError::InvariantViolation(_))));

        let events = material
            .handle(&MaterialCommand::ReturnUsage(ReturnUsage {
                tenant_id,
                material_id: material.id_typed(),
                usage_id: Uuid::now_v7(),
                sku_ref: sku,
                quantity: 4,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        material.apply(&events[0]);

        assert_eq!(material.used_quantity(), 4);
        assert_eq!(material.remaining_quantity(), 96);
        assert_eq!(material.net_usage_by(sku), 4);
        assert_eq!(material.usages().len(), 2);
    }

    #[test]
    fn resync_keeps_used_and_recomputes_remaining() {
        let (mut material, tenant_id) = derived(100);
        consume(&mut material, tenant_id, AggregateId::new(), 40);

        let events = material
            .handle(&MaterialCommand::ResyncMaterial(ResyncMaterial {
                tenant_id,
                material_id: material.id_typed(),
                category: MaterialCategory::LooseBeads,
                stock: stock(120),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        material.apply(&events[0]);

        assert_eq!(material.used_quantity(), 40);
        assert_eq!(material.remaining_quantity(), 80);
    }

    #[test]
    fn shrinking_below_usage_flags_for_review() {
        let (mut material, tenant_id) = derived(100);
        consume(&mut material, tenant_id, AggregateId::new(), 60);

        let events = material
            .handle(&MaterialCommand::ResyncMaterial(ResyncMaterial {
                tenant_id,
                material_id: material.id_typed(),
                category: MaterialCategory::LooseBeads,
                stock: stock(50),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        material.apply(&events[0]);

        assert_eq!(material.remaining_quantity(), -10);
        assert!(material.needs_review());
        assert!(material.snapshot().needs_review);
    }

    #[test]
    fn source_used_freezes_resync_and_blocks_consumption() {
        let (mut material, tenant_id) = derived(100);
        let events = material
            .handle(&MaterialCommand::AnnotateMaterial(AnnotateMaterial {
                tenant_id,
                material_id: material.id_typed(),
                note: "lot marked USED".to_string(),
                source_used: true,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        material.apply(&events[0]);

        let resync = material
            .handle(&MaterialCommand::ResyncMaterial(ResyncMaterial {
                tenant_id,
                material_id: material.id_typed(),
                category: MaterialCategory::LooseBeads,
                stock: stock(5),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(resync.is_empty());
        assert_eq!(material.remaining_quantity(), 100);

        let consume = material.handle(&MaterialCommand::RecordUsage(RecordUsage {
            tenant_id,
            material_id: material.id_typed(),
            usage_id: Uuid::now_v7(),
            sku_ref: AggregateId::new(),
            quantity: 1,
            occurred_at: Utc::now(),
        }));
        assert!(matches!(consume, Err(DomainError::InvariantViolation(_))));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: used quantity always equals the sum of usage records,
            /// whatever mix of consumptions and returns produced them.
            #[test]
            fn used_quantity_is_sum_of_usages(ops in prop::collection::vec((any::<bool>(), 1i64..20), 1..40)) {
                let (mut material, tenant_id) = derived(500);
                let sku = AggregateId::new();

                for (is_return, qty) in ops {
                    let cmd = if is_return {
                        MaterialCommand::ReturnUsage(ReturnUsage {
                            tenant_id,
                            material_id: material.id_typed(),
                            usage_id: Uuid::now_v7(),
                            sku_ref: sku,
                            quantity: qty,
                            occurred_at: Utc::now(),
                        })
                    } else {
                        MaterialCommand::RecordUsage(RecordUsage {
                            tenant_id,
                            material_id: material.id_typed(),
                            usage_id: Uuid::now_v7(),
                            sku_ref: sku,
                            quantity: qty,
                            occurred_at: Utc::now(),
                        })
                    };
                    if let Ok(events) = material.handle(&cmd) {
                        for e in &events {
                            material.apply(e);
                        }
                    }

                    let sum: i64 = material.usages().iter().map(|u| u.quantity).sum();
                    prop_assert_eq!(material.used_quantity(), sum);
                    prop_assert_eq!(material.remaining_quantity(), 500 - sum);
                    prop_assert!(material.remaining_quantity() >= 0);
                    prop_assert!(material.used_quantity() >= 0);
                }
            }
        }
    }
}
