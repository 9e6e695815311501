//! Purchase lot lifecycle, cascaded into the lot's Material.
//!
//! Each call commits the lot event and the material event together, so a lot
//! never exists without its material and a correction never lands without the
//! matching resync.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crystalerp_core::TenantId;
use crystalerp_events::{EventBus, EventEnvelope};
use crystalerp_inventory::{
    AnnotateMaterial, DeriveMaterial, Material, MaterialCommand, MaterialId, MaterialSnapshot,
    ResyncMaterial, derive_stock,
};
use crystalerp_purchasing::{
    CorrectLot, LotSpec, MarkLotUsed, PurchaseLot, PurchaseLotCommand, PurchaseLotId, RegisterLot,
};

use super::{Ledger, load_material};
use crate::error::LedgerError;
use crate::event_store::EventStore;
use crate::streams;
use crate::unit_of_work::UnitOfWork;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotRegistration {
    pub lot_id: PurchaseLotId,
    pub material: MaterialSnapshot,
}

fn load_lot<S>(uow: &UnitOfWork<'_, S>, lot_id: PurchaseLotId) -> Result<PurchaseLot, LedgerError>
where
    S: EventStore + ?Sized,
{
    Ok(uow.load(lot_id.0, |_, id| PurchaseLot::empty(PurchaseLotId::new(id)))?)
}

fn require_lot<S>(uow: &UnitOfWork<'_, S>, lot_id: PurchaseLotId) -> Result<PurchaseLot, LedgerError>
where
    S: EventStore + ?Sized,
{
    let lot = load_lot(uow, lot_id)?;
    if !lot.is_created() {
        return Err(LedgerError::NotFound(format!("purchase lot {lot_id}")));
    }
    Ok(lot)
}

fn current_spec(lot: &PurchaseLot) -> Result<&LotSpec, LedgerError> {
    lot.spec()
        .ok_or_else(|| LedgerError::Store(format!("purchase lot {} has no spec", lot.id_typed())))
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Register an ACTIVE lot and derive its material in the same commit.
    pub fn register_lot(
        &self,
        tenant_id: TenantId,
        lot_id: PurchaseLotId,
        spec: LotSpec,
    ) -> Result<LotRegistration, LedgerError> {
        let mut uow = self.unit_of_work(tenant_id);
        let mut lot = load_lot(&uow, lot_id)?;
        let material_id = MaterialId::for_lot(lot_id);
        let mut material = uow.load(material_id.0, |_, id| Material::empty(MaterialId(id)))?;

        let occurred_at = Utc::now();
        let stock = derive_stock(&spec, &self.bead_table);
        let category = spec.category;

        uow.decide(
            &mut lot,
            lot_id.0,
            streams::PURCHASE_LOT,
            &PurchaseLotCommand::RegisterLot(RegisterLot {
                tenant_id,
                lot_id,
                spec,
                occurred_at,
            }),
        )?;
        uow.decide(
            &mut material,
            material_id.0,
            streams::MATERIAL,
            &MaterialCommand::DeriveMaterial(DeriveMaterial {
                tenant_id,
                material_id,
                lot_id,
                category,
                stock,
                occurred_at,
            }),
        )?;
        self.commit(uow)?;

        tracing::info!(
            lot_id = %lot_id,
            material_id = %material_id,
            original_quantity = material.original_quantity(),
            unit_cost = %material.unit_cost(),
            "purchase lot registered"
        );
        Ok(LotRegistration {
            lot_id,
            material: material.snapshot(),
        })
    }

    /// Derive the material for an existing lot. Returns the current material
    /// unchanged if it was already derived.
    pub fn derive_material(&self, tenant_id: TenantId, lot_id: PurchaseLotId) -> Result<MaterialSnapshot, LedgerError> {
        let mut uow = self.unit_of_work(tenant_id);
        let lot = require_lot(&uow, lot_id)?;
        let material_id = MaterialId::for_lot(lot_id);
        let mut material = uow.load(material_id.0, |_, id| Material::empty(MaterialId(id)))?;
        if material.is_created() {
            return Ok(material.snapshot());
        }

        let spec = current_spec(&lot)?;
        uow.decide(
            &mut material,
            material_id.0,
            streams::MATERIAL,
            &MaterialCommand::DeriveMaterial(DeriveMaterial {
                tenant_id,
                material_id,
                lot_id,
                category: spec.category,
                stock: derive_stock(spec, &self.bead_table),
                occurred_at: Utc::now(),
            }),
        )?;
        self.commit(uow)?;

        tracing::info!(lot_id = %lot_id, material_id = %material_id, "material derived");
        Ok(material.snapshot())
    }

    /// Correct an ACTIVE lot and re-derive its material from the new figures.
    ///
    /// Used quantity is kept, so a correction that shrinks the lot below what
    /// was already consumed leaves the material flagged for review.
    pub fn correct_lot(
        &self,
        tenant_id: TenantId,
        lot_id: PurchaseLotId,
        spec: LotSpec,
    ) -> Result<MaterialSnapshot, LedgerError> {
        let mut uow = self.unit_of_work(tenant_id);
        let mut lot = require_lot(&uow, lot_id)?;
        let material_id = MaterialId::for_lot(lot_id);
        let mut material = load_material(&uow, material_id)?;

        let occurred_at = Utc::now();
        let stock = derive_stock(&spec, &self.bead_table);
        let category = spec.category;

        uow.decide(
            &mut lot,
            lot_id.0,
            streams::PURCHASE_LOT,
            &PurchaseLotCommand::CorrectLot(CorrectLot {
                tenant_id,
                lot_id,
                spec,
                occurred_at,
            }),
        )?;
        uow.decide(
            &mut material,
            material_id.0,
            streams::MATERIAL,
            &MaterialCommand::ResyncMaterial(ResyncMaterial {
                tenant_id,
                material_id,
                category,
                stock,
                occurred_at,
            }),
        )?;
        self.commit(uow)?;

        self.flag_if_negative(&material);
        tracing::info!(lot_id = %lot_id, material_id = %material_id, "purchase lot corrected");
        Ok(material.snapshot())
    }

    /// Recompute a material from its lot's current figures.
    pub fn resync_material(&self, tenant_id: TenantId, material_id: MaterialId) -> Result<MaterialSnapshot, LedgerError> {
        let mut uow = self.unit_of_work(tenant_id);
        let mut material = load_material(&uow, material_id)?;
        let lot_id = material
            .lot_id()
            .ok_or_else(|| LedgerError::Store(format!("material {material_id} has no source lot")))?;
        let lot = require_lot(&uow, lot_id)?;
        let spec = current_spec(&lot)?;

        uow.decide(
            &mut material,
            material_id.0,
            streams::MATERIAL,
            &MaterialCommand::ResyncMaterial(ResyncMaterial {
                tenant_id,
                material_id,
                category: spec.category,
                stock: derive_stock(spec, &self.bead_table),
                occurred_at: Utc::now(),
            }),
        )?;
        if !uow.is_empty() {
            self.commit(uow)?;
            tracing::debug!(material_id = %material_id, "material resynced");
        }

        self.flag_if_negative(&material);
        Ok(material.snapshot())
    }

    /// ACTIVE → USED. The material keeps its figures and gains an annotation.
    pub fn mark_lot_used(&self, tenant_id: TenantId, lot_id: PurchaseLotId) -> Result<MaterialSnapshot, LedgerError> {
        let mut uow = self.unit_of_work(tenant_id);
        let mut lot = require_lot(&uow, lot_id)?;
        let material_id = MaterialId::for_lot(lot_id);
        let mut material = load_material(&uow, material_id)?;

        let occurred_at = Utc::now();
        uow.decide(
            &mut lot,
            lot_id.0,
            streams::PURCHASE_LOT,
            &PurchaseLotCommand::MarkLotUsed(MarkLotUsed {
                tenant_id,
                lot_id,
                occurred_at,
            }),
        )?;
        uow.decide(
            &mut material,
            material_id.0,
            streams::MATERIAL,
            &MaterialCommand::AnnotateMaterial(AnnotateMaterial {
                tenant_id,
                material_id,
                note: format!("source lot {lot_id} marked USED on {}", occurred_at.date_naive()),
                source_used: true,
                occurred_at,
            }),
        )?;
        self.commit(uow)?;

        tracing::info!(
            lot_id = %lot_id,
            material_id = %material_id,
            remaining_quantity = material.remaining_quantity(),
            "purchase lot marked used"
        );
        Ok(material.snapshot())
    }

    /// Attach a free-form note to a material.
    pub fn annotate_material(
        &self,
        tenant_id: TenantId,
        material_id: MaterialId,
        note: impl Into<String>,
    ) -> Result<MaterialSnapshot, LedgerError> {
        let (material, _) = self.dispatcher.dispatch(
            tenant_id,
            material_id.0,
            streams::MATERIAL,
            MaterialCommand::AnnotateMaterial(AnnotateMaterial {
                tenant_id,
                material_id,
                note: note.into(),
                source_used: false,
                occurred_at: Utc::now(),
            }),
            |_, id| Material::empty(MaterialId(id)),
        )?;
        Ok(material.snapshot())
    }

    fn flag_if_negative(&self, material: &Material) {
        if material.needs_review() {
            tracing::warn!(
                material_id = %material.id_typed(),
                remaining_quantity = material.remaining_quantity(),
                used_quantity = material.used_quantity(),
                "material remaining quantity is negative; flagged for review"
            );
        }
    }
}
