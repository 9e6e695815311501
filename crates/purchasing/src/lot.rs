use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crystalerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use crystalerp_events::Event;

/// Purchase lot identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseLotId(pub AggregateId);

impl PurchaseLotId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseLotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Raw material category. Decides how a lot is counted (beads vs pieces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialCategory {
    LooseBeads,
    Bracelet,
    Accessory,
    Finished,
}

impl MaterialCategory {
    /// Bead-counted categories may be bought by weight.
    pub fn is_bead_counted(self) -> bool {
        matches!(self, MaterialCategory::LooseBeads | MaterialCategory::Bracelet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotStatus {
    Active,
    Used,
}

/// The purchasing-side description of a lot. Corrections replace it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSpec {
    pub product_name: String,
    pub category: MaterialCategory,
    pub quality: Option<String>,
    pub diameter_mm: Option<Decimal>,
    pub specification: Option<String>,
    /// Explicit bead/piece count, when the supplier counted them.
    pub piece_count: Option<i64>,
    pub weight_grams: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub supplier: Option<String>,
}

impl LotSpec {
    pub fn new(product_name: impl Into<String>, category: MaterialCategory) -> Self {
        Self {
            product_name: product_name.into(),
            category,
            quality: None,
            diameter_mm: None,
            specification: None,
            piece_count: None,
            weight_grams: None,
            unit_price: None,
            total_price: None,
            supplier: None,
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.product_name.trim().is_empty() {
            return Err(DomainError::validation("product_name cannot be empty"));
        }
        if let Some(n) = self.piece_count {
            DomainError::require_non_negative("piece_count", n)?;
        }
        if let Some(w) = self.weight_grams {
            DomainError::require_non_negative("weight_grams", w)?;
        }
        if matches!(self.diameter_mm, Some(d) if d <= Decimal::ZERO) {
            return Err(DomainError::validation("diameter_mm must be positive"));
        }
        if matches!(self.unit_price, Some(p) if p.is_sign_negative())
            || matches!(self.total_price, Some(p) if p.is_sign_negative())
        {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        Ok(())
    }
}

/// Aggregate root: PurchaseLot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseLot {
    id: PurchaseLotId,
    tenant_id: Option<TenantId>,
    spec: Option<LotSpec>,
    status: LotStatus,
    version: u64,
    created: bool,
}

impl PurchaseLot {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseLotId) -> Self {
        Self {
            id,
            tenant_id: None,
            spec: None,
            status: LotStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseLotId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn spec(&self) -> Option<&LotSpec> {
        self.spec.as_ref()
    }

    pub fn status(&self) -> LotStatus {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for PurchaseLot {
    type Id = PurchaseLotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterLot (lot enters the system ACTIVE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLot {
    pub tenant_id: TenantId,
    pub lot_id: PurchaseLotId,
    pub spec: LotSpec,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectLot (field corrections, ACTIVE lots only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectLot {
    pub tenant_id: TenantId,
    pub lot_id: PurchaseLotId,
    pub spec: LotSpec,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkLotUsed (ACTIVE → USED).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLotUsed {
    pub tenant_id: TenantId,
    pub lot_id: PurchaseLotId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseLotCommand {
    RegisterLot(RegisterLot),
    CorrectLot(CorrectLot),
    MarkLotUsed(MarkLotUsed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRegistered {
    pub tenant_id: TenantId,
    pub lot_id: PurchaseLotId,
    pub spec: LotSpec,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotCorrected {
    pub tenant_id: TenantId,
    pub lot_id: PurchaseLotId,
    pub spec: LotSpec,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotMarkedUsed {
    pub tenant_id: TenantId,
    pub lot_id: PurchaseLotId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseLotEvent {
    LotRegistered(LotRegistered),
    LotCorrected(LotCorrected),
    LotMarkedUsed(LotMarkedUsed),
}

impl Event for PurchaseLotEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseLotEvent::LotRegistered(_) => "purchasing.lot.registered",
            PurchaseLotEvent::LotCorrected(_) => "purchasing.lot.corrected",
            PurchaseLotEvent::LotMarkedUsed(_) => "purchasing.lot.marked_used",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseLotEvent::LotRegistered(e) => e.occurred_at,
            PurchaseLotEvent::LotCorrected(e) => e.occurred_at,
            PurchaseLotEvent::LotMarkedUsed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseLot {
    type Command = PurchaseLotCommand;
    type Event = PurchaseLotEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseLotEvent::LotRegistered(e) => {
                self.id = e.lot_id;
                self.tenant_id = Some(e.tenant_id);
                self.spec = Some(e.spec.clone());
                self.status = LotStatus::Active;
                self.created = true;
            }
            PurchaseLotEvent::LotCorrected(e) => {
                self.spec = Some(e.spec.clone());
            }
            PurchaseLotEvent::LotMarkedUsed(_) => {
                self.status = LotStatus::Used;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseLotCommand::RegisterLot(cmd) => self.handle_register(cmd),
            PurchaseLotCommand::CorrectLot(cmd) => self.handle_correct(cmd),
            PurchaseLotCommand::MarkLotUsed(cmd) => self.handle_mark_used(cmd),
        }
    }
}

impl PurchaseLot {
    fn ensure_target(&self, tenant_id: TenantId, lot_id: PurchaseLotId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != lot_id {
            return Err(DomainError::invariant("lot_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterLot) -> Result<Vec<PurchaseLotEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("lot already exists"));
        }
        cmd.spec.validate()?;

        Ok(vec![PurchaseLotEvent::LotRegistered(LotRegistered {
            tenant_id: cmd.tenant_id,
            lot_id: cmd.lot_id,
            spec: cmd.spec.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_correct(&self, cmd: &CorrectLot) -> Result<Vec<PurchaseLotEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.lot_id)?;
        if self.status != LotStatus::Active {
            return Err(DomainError::invariant("only ACTIVE lots can be corrected"));
        }
        cmd.spec.validate()?;
        if self.spec.as_ref() == Some(&cmd.spec) {
            return Ok(vec![]);
        }

        Ok(vec![PurchaseLotEvent::LotCorrected(LotCorrected {
            tenant_id: cmd.tenant_id,
            lot_id: cmd.lot_id,
            spec: cmd.spec.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_used(&self, cmd: &MarkLotUsed) -> Result<Vec<PurchaseLotEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.lot_id)?;
        if self.status == LotStatus::Used {
            return Err(DomainError::conflict("lot is already USED"));
        }

        Ok(vec![PurchaseLotEvent::LotMarkedUsed(LotMarkedUsed {
            tenant_id: cmd.tenant_id,
            lot_id: cmd.lot_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn beads_spec() -> LotSpec {
        LotSpec {
            diameter_mm: Some(dec!(8)),
            weight_grams: Some(dec!(30)),
            total_price: Some(dec!(90)),
            ..LotSpec::new("Amethyst 8mm", MaterialCategory::LooseBeads)
        }
    }

    fn registered() -> (PurchaseLot, TenantId, PurchaseLotId) {
        let tenant_id = TenantId::new();
        let lot_id = PurchaseLotId::new(AggregateId::new());
        let mut lot = PurchaseLot::empty(lot_id);
        let events = lot
            .handle(&PurchaseLotCommand::RegisterLot(RegisterLot {
                tenant_id,
                lot_id,
                spec: beads_spec(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        lot.apply(&events[0]);
        (lot, tenant_id, lot_id)
    }

    #[test]
    fn register_emits_lot_registered_and_starts_active() {
        let (lot, _, lot_id) = registered();
        assert_eq!(lot.status(), LotStatus::Active);
        assert_eq!(lot.id_typed(), lot_id);
        assert_eq!(lot.version(), 1);
        assert_eq!(lot.spec().unwrap().category, MaterialCategory::LooseBeads);
    }

    #[test]
    fn register_rejects_negative_weight() {
        let lot = PurchaseLot::empty(PurchaseLotId::new(AggregateId::new()));
        let mut spec = beads_spec();
        spec.weight_grams = Some(dec!(-1));
        let err = lot
            .handle(&PurchaseLotCommand::RegisterLot(RegisterLot {
                tenant_id: TenantId::new(),
                lot_id: lot.id_typed(),
                spec,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn register_twice_is_a_conflict() {
        let (lot, tenant_id, lot_id) = registered();
        let err = lot
            .handle(&PurchaseLotCommand::RegisterLot(RegisterLot {
                tenant_id,
                lot_id,
                spec: beads_spec(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn identical_correction_is_a_no_op() {
        let (lot, tenant_id, lot_id) = registered();
        let events = lot
            .handle(&PurchaseLotCommand::CorrectLot(CorrectLot {
                tenant_id,
                lot_id,
                spec: beads_spec(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn used_lots_cannot_be_corrected() {
        let (mut lot, tenant_id, lot_id) = registered();
        let events = lot
            .handle(&PurchaseLotCommand::MarkLotUsed(MarkLotUsed {
                tenant_id,
                lot_id,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        lot.apply(&events[0]);
        assert_eq!(lot.status(), LotStatus::Used);

        let mut spec = beads_spec();
        spec.piece_count = Some(10);
        let err = lot
            .handle(&PurchaseLotCommand::CorrectLot(CorrectLot {
                tenant_id,
                lot_id,
                spec,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn correct_rejects_wrong_tenant() {
        let (lot, _, lot_id) = registered();
        let err = lot
            .handle(&PurchaseLotCommand::CorrectLot(CorrectLot {
                tenant_id: TenantId::new(),
                lot_id,
                spec: beads_spec(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn only_bead_categories_are_bead_counted() {
        assert!(MaterialCategory::LooseBeads.is_bead_counted());
        assert!(MaterialCategory::Bracelet.is_bead_counted());
        assert!(!MaterialCategory::Accessory.is_bead_counted());
        assert!(!MaterialCategory::Finished.is_bead_counted());
    }
}
