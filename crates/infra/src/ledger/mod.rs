//! The SKU/inventory consistency ledger.
//!
//! `Ledger` is the boundary the rest of the ERP calls into. Each mutating
//! operation loads the aggregates it touches, decides every event in memory,
//! and commits them in a single atomic multi-stream append. Before the call
//! returns, the read models are caught up on every SKU stream it touched.
//!
//! - [`lots`]: purchase lot lifecycle cascading into materials
//! - [`resolver`]: resolve-or-create a SKU from a material composition
//! - [`operations`]: sell, adjust, destroy, status changes
//! - [`restock`]: cost preview and restocking from a SKU's frozen recipe
//! - [`audit`]: log replay and material re-aggregation checks

pub mod audit;
pub mod lots;
pub mod operations;
pub mod resolver;
pub mod restock;

pub use audit::{MaterialAudit, SkuAudit};
pub use lots::LotRegistration;
pub use operations::{AdjustRequest, DestroyRequest, SaleRequest};
pub use resolver::{PriceWarning, ProduceRequest, ResolveOutcome};
pub use restock::{MaterialRequirement, MaterialShortfall, RestockOutcome, RestockPlan, RestockRequest};

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crystalerp_core::TenantId;
use crystalerp_events::{EventBus, EventEnvelope};
use crystalerp_inventory::{BeadConversionTable, Material, MaterialId, MaterialSnapshot};
use crystalerp_products::{ProductSku, SkuEvent, SkuId, SkuSnapshot, format_sku_code};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{
    InventoryLogProjection, InventoryLogRecord, ProjectionError, SkuCatalogProjection, SkuCatalogRow,
};
use crate::read_model::InMemoryTenantStore;
use crate::streams;
use crate::unit_of_work::UnitOfWork;

pub type CatalogStore = InMemoryTenantStore<SkuId, SkuCatalogRow>;
pub type InventoryLogStore = InMemoryTenantStore<SkuId, Vec<InventoryLogRecord>>;

/// Returned by every quantity-changing call so callers can show the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReceipt {
    pub sku: SkuSnapshot,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub log_entry_id: Uuid,
}

pub struct Ledger<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    config: LedgerConfig,
    bead_table: BeadConversionTable,
    catalog: SkuCatalogProjection<CatalogStore>,
    inventory_log: InventoryLogProjection<InventoryLogStore>,
    code_sequences: Mutex<HashMap<(TenantId, NaiveDate), u32>>,
}

impl<S, B> Ledger<S, B> {
    pub fn new(store: S, bus: B, config: LedgerConfig) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            config,
            bead_table: BeadConversionTable::default(),
            catalog: SkuCatalogProjection::new(InMemoryTenantStore::new()),
            inventory_log: InventoryLogProjection::new(InMemoryTenantStore::new()),
            code_sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bead_table(mut self, table: BeadConversionTable) -> Self {
        self.bead_table = table;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    pub fn catalog(&self) -> &SkuCatalogProjection<CatalogStore> {
        &self.catalog
    }

    pub fn inventory_log(&self) -> &InventoryLogProjection<InventoryLogStore> {
        &self.inventory_log
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Current state of a SKU, rebuilt from its stream.
    pub fn sku(&self, tenant_id: TenantId, sku_id: SkuId) -> Result<SkuSnapshot, LedgerError> {
        let uow = self.unit_of_work(tenant_id);
        Ok(load_sku(&uow, sku_id)?.snapshot())
    }

    pub fn material(&self, tenant_id: TenantId, material_id: MaterialId) -> Result<MaterialSnapshot, LedgerError> {
        let uow = self.unit_of_work(tenant_id);
        Ok(load_material(&uow, material_id)?.snapshot())
    }

    /// The SKU's inventory log in stream order.
    pub fn sku_log(&self, tenant_id: TenantId, sku_id: SkuId) -> Vec<InventoryLogRecord> {
        self.inventory_log.entries(tenant_id, &sku_id)
    }

    /// Rebuild both read models from a full envelope replay.
    pub fn rebuild_read_models(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let envs: Vec<_> = envelopes.into_iter().collect();
        self.catalog.rebuild_from_scratch(envs.clone())?;
        self.inventory_log.rebuild_from_scratch(envs)
    }

    pub(crate) fn unit_of_work(&self, tenant_id: TenantId) -> UnitOfWork<'_, S> {
        UnitOfWork::new(self.dispatcher.store(), tenant_id)
    }

    /// Commit a unit of work and bring the read models up to date.
    pub(crate) fn commit(&self, uow: UnitOfWork<'_, S>) -> Result<Vec<StoredEvent>, LedgerError> {
        let committed = uow.commit(self.dispatcher.bus())?;
        self.project(&committed);
        Ok(committed)
    }

    /// Bring the read models up to date for every SKU stream in `committed`.
    ///
    /// Each stream is caught up from the store starting after the lowest cursor
    /// of the two projections, so a writer that projects before an earlier
    /// committer also applies the earlier events, and the earlier committer's
    /// own events are then skipped as duplicates. A failure here is logged; the
    /// next commit on the same stream retries the catch-up.
    pub(crate) fn project(&self, committed: &[StoredEvent]) {
        let mut touched: Vec<(TenantId, SkuId)> = committed
            .iter()
            .filter(|e| e.aggregate_type == streams::PRODUCT_SKU)
            .map(|e| (e.tenant_id, SkuId(e.aggregate_id)))
            .collect();
        touched.sort_by_key(|(t, s)| (*t.as_uuid().as_bytes(), *s));
        touched.dedup();

        for (tenant_id, sku_id) in touched {
            if let Err(err) = self.catch_up(tenant_id, sku_id) {
                tracing::error!(sku_id = %sku_id, error = %err, "read model catch-up failed");
            }
        }
    }

    fn catch_up(&self, tenant_id: TenantId, sku_id: SkuId) -> Result<(), LedgerError> {
        let applied = self
            .catalog
            .last_applied(tenant_id, &sku_id)
            .min(self.inventory_log.last_applied(tenant_id, &sku_id));
        let mut pending = self
            .store()
            .load_stream(tenant_id, sku_id.0)
            .map_err(DispatchError::from)?;
        pending.retain(|e| e.sequence_number > applied);
        pending.sort_by_key(|e| e.sequence_number);

        for stored in &pending {
            let envelope = stored.to_envelope();
            self.catalog
                .apply_envelope(&envelope)
                .and_then(|()| self.inventory_log.apply_envelope(&envelope))
                .map_err(|e| LedgerError::Store(format!("projection at sequence {}: {e}", stored.sequence_number)))?;
        }
        Ok(())
    }

    /// Next `{prefix}{YYYYMMDD}{seq:03}` code for the tenant and day.
    pub(crate) fn allocate_sku_code(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, LedgerError> {
        let mut sequences = self
            .code_sequences
            .lock()
            .map_err(|_| LedgerError::Store("sku code allocator lock poisoned".to_string()))?;
        let prefix = &self.config.sku_code_prefix;
        let used = self.catalog.max_code_sequence(tenant_id, prefix, date);

        let slot = sequences.entry((tenant_id, date)).or_insert(0);
        *slot = (*slot).max(used) + 1;
        Ok(format_sku_code(prefix, date, *slot))
    }
}

/// Load a SKU that must already exist.
pub(crate) fn load_sku<S>(uow: &UnitOfWork<'_, S>, sku_id: SkuId) -> Result<ProductSku, LedgerError>
where
    S: EventStore + ?Sized,
{
    let sku = uow
        .load(sku_id.0, |_, id| ProductSku::empty(SkuId(id)))
        .map_err(|e| LedgerError::for_sku(sku_id, e))?;
    if !sku.is_created() {
        return Err(LedgerError::NotFound(format!("sku {sku_id}")));
    }
    Ok(sku)
}

/// Load a material that must already exist.
pub(crate) fn load_material<S>(uow: &UnitOfWork<'_, S>, material_id: MaterialId) -> Result<Material, LedgerError>
where
    S: EventStore + ?Sized,
{
    let material = uow.load(material_id.0, |_, id| Material::empty(MaterialId(id)))?;
    if !material.is_created() {
        return Err(LedgerError::NotFound(format!("material {material_id}")));
    }
    Ok(material)
}

/// Build the receipt from the last log-carrying event committed on the SKU's stream.
pub(crate) fn receipt_for(sku: &ProductSku, committed: &[StoredEvent]) -> Result<LedgerReceipt, LedgerError> {
    let sku_stream = sku.id_typed().0;
    for stored in committed.iter().rev().filter(|e| e.aggregate_id == sku_stream) {
        let event: SkuEvent = serde_json::from_value(stored.payload.clone())
            .map_err(|e| LedgerError::Store(format!("committed sku event unreadable: {e}")))?;
        if let Some(entry) = event.log_entry() {
            return Ok(LedgerReceipt {
                sku: sku.snapshot(),
                quantity_before: entry.quantity_before,
                quantity_after: entry.quantity_after,
                log_entry_id: stored.event_id,
            });
        }
    }
    Err(LedgerError::Store(
        "committed batch carries no inventory log entry".to_string(),
    ))
}
