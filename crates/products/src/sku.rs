use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crystalerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use crystalerp_events::Event;

use crate::signature::{MaterialSignature, SignatureEntry, SignatureHash};

const SKU_NAMESPACE: Uuid = Uuid::from_u128(0x736b_7573_6967_6e61_a3f0_47c2_b815_6e09);

/// SKU identifier, derived from tenant + signature hash (one SKU per recipe).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuId(pub AggregateId);

impl SkuId {
    pub fn for_signature(tenant_id: TenantId, hash: &SignatureHash) -> Self {
        Self(AggregateId::derived_in(tenant_id, &SKU_NAMESPACE, hash.as_str().as_bytes()))
    }
}

impl core::fmt::Display for SkuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkuStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryAction {
    Create,
    Sell,
    Adjust,
    Destroy,
}

/// What a log entry's `reference_id` points at. Manual corrections use `Product`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Product,
    Sale,
    Destroy,
}

/// Per-unit cost breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkuCosts {
    pub material_cost: Decimal,
    pub labor_cost: Decimal,
    pub craft_cost: Decimal,
}

impl SkuCosts {
    pub fn total(&self) -> Decimal {
        self.material_cost + self.labor_cost + self.craft_cost
    }
}

/// One inventory log line. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub action: InventoryAction,
    pub quantity_change: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
    pub operator: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: ProductSku.
///
/// Quantities are only ever changed by applying stock events, each of which
/// carries the log entry describing the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSku {
    id: SkuId,
    tenant_id: Option<TenantId>,
    sku_code: String,
    sku_name: String,
    signature: Option<MaterialSignature>,
    signature_hash: Option<SignatureHash>,
    costs: SkuCosts,
    selling_price: Decimal,
    total_quantity: i64,
    available_quantity: i64,
    status: SkuStatus,
    version: u64,
    created: bool,
}

/// Serializable point-in-time view of a SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuSnapshot {
    pub sku_id: SkuId,
    pub sku_code: String,
    pub sku_name: String,
    pub signature: Vec<SignatureEntry>,
    pub signature_hash: Option<SignatureHash>,
    pub total_quantity: i64,
    pub available_quantity: i64,
    pub costs: SkuCosts,
    pub unit_total_cost: Decimal,
    pub selling_price: Decimal,
    pub total_value: Decimal,
    pub status: SkuStatus,
}

impl ProductSku {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SkuId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku_code: String::new(),
            sku_name: String::new(),
            signature: None,
            signature_hash: None,
            costs: SkuCosts::default(),
            selling_price: Decimal::ZERO,
            total_quantity: 0,
            available_quantity: 0,
            status: SkuStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SkuId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku_code(&self) -> &str {
        &self.sku_code
    }

    pub fn sku_name(&self) -> &str {
        &self.sku_name
    }

    /// The frozen recipe recorded at creation (per unit).
    pub fn recipe(&self) -> &[SignatureEntry] {
        self.signature.as_ref().map(|s| s.entries()).unwrap_or(&[])
    }

    pub fn signature_hash(&self) -> Option<&SignatureHash> {
        self.signature_hash.as_ref()
    }

    pub fn costs(&self) -> &SkuCosts {
        &self.costs
    }

    pub fn selling_price(&self) -> Decimal {
        self.selling_price
    }

    pub fn total_quantity(&self) -> i64 {
        self.total_quantity
    }

    pub fn available_quantity(&self) -> i64 {
        self.available_quantity
    }

    pub fn status(&self) -> SkuStatus {
        self.status
    }

    pub fn total_value(&self) -> Decimal {
        Decimal::from(self.available_quantity) * self.selling_price
    }

    pub fn snapshot(&self) -> SkuSnapshot {
        SkuSnapshot {
            sku_id: self.id,
            sku_code: self.sku_code.clone(),
            sku_name: self.sku_name.clone(),
            signature: self.recipe().to_vec(),
            signature_hash: self.signature_hash.clone(),
            total_quantity: self.total_quantity,
            available_quantity: self.available_quantity,
            costs: self.costs.clone(),
            unit_total_cost: self.costs.total(),
            selling_price: self.selling_price,
            total_value: self.total_value(),
            status: self.status,
        }
    }
}

impl AggregateRoot for ProductSku {
    type Id = SkuId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterSku (new recipe, no stock yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSku {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub sku_code: String,
    pub name: String,
    pub signature: MaterialSignature,
    pub costs: SkuCosts,
    pub selling_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProduceStock (CREATE log entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceStock {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub reference_id: Option<String>,
    pub operator: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SellStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellStock {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub reference_id: Option<String>,
    pub operator: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (bookkeeping correction to an absolute quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub new_quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
    pub operator: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DestroyStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyStock {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub reason: String,
    pub return_to_material: bool,
    pub reference_id: Option<String>,
    pub operator: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetSkuStatus (soft activate/deactivate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSkuStatus {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub status: SkuStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkuCommand {
    RegisterSku(RegisterSku),
    ProduceStock(ProduceStock),
    SellStock(SellStock),
    AdjustStock(AdjustStock),
    DestroyStock(DestroyStock),
    SetSkuStatus(SetSkuStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuRegistered {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub sku_code: String,
    pub sku_name: String,
    pub signature: MaterialSignature,
    pub signature_hash: SignatureHash,
    pub costs: SkuCosts,
    pub selling_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event payload shared by CREATE/SELL/ADJUST movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub entry: LogEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDestroyed {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub entry: LogEntry,
    pub reason: String,
    pub return_to_material: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuStatusChanged {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub status: SkuStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkuEvent {
    SkuRegistered(SkuRegistered),
    StockProduced(StockMovement),
    StockSold(StockMovement),
    StockAdjusted(StockMovement),
    StockDestroyed(StockDestroyed),
    SkuStatusChanged(SkuStatusChanged),
}

impl SkuEvent {
    /// The inventory log entry carried by a quantity-changing event.
    pub fn log_entry(&self) -> Option<&LogEntry> {
        match self {
            SkuEvent::StockProduced(e) | SkuEvent::StockSold(e) | SkuEvent::StockAdjusted(e) => {
                Some(&e.entry)
            }
            SkuEvent::StockDestroyed(e) => Some(&e.entry),
            SkuEvent::SkuRegistered(_) | SkuEvent::SkuStatusChanged(_) => None,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            SkuEvent::SkuRegistered(e) => e.tenant_id,
            SkuEvent::StockProduced(e) | SkuEvent::StockSold(e) | SkuEvent::StockAdjusted(e) => {
                e.tenant_id
            }
            SkuEvent::StockDestroyed(e) => e.tenant_id,
            SkuEvent::SkuStatusChanged(e) => e.tenant_id,
        }
    }

    pub fn sku_id(&self) -> SkuId {
        match self {
            SkuEvent::SkuRegistered(e) => e.sku_id,
            SkuEvent::StockProduced(e) | SkuEvent::StockSold(e) | SkuEvent::StockAdjusted(e) => {
                e.sku_id
            }
            SkuEvent::StockDestroyed(e) => e.sku_id,
            SkuEvent::SkuStatusChanged(e) => e.sku_id,
        }
    }
}

impl Event for SkuEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SkuEvent::SkuRegistered(_) => "products.sku.registered",
            SkuEvent::StockProduced(_) => "products.sku.stock_produced",
            SkuEvent::StockSold(_) => "products.sku.stock_sold",
            SkuEvent::StockAdjusted(_) => "products.sku.stock_adjusted",
            SkuEvent::StockDestroyed(_) => "products.sku.stock_destroyed",
            SkuEvent::SkuStatusChanged(_) => "products.sku.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SkuEvent::SkuRegistered(e) => e.occurred_at,
            SkuEvent::SkuStatusChanged(e) => e.occurred_at,
            other => other
                .log_entry()
                .map(|entry| entry.occurred_at)
                .unwrap_or_default(),
        }
    }
}

impl Aggregate for ProductSku {
    type Command = SkuCommand;
    type Event = SkuEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SkuEvent::SkuRegistered(e) => {
                self.id = e.sku_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku_code = e.sku_code.clone();
                self.sku_name = e.sku_name.clone();
                self.signature = Some(e.signature.clone());
                self.signature_hash = Some(e.signature_hash.clone());
                self.costs = e.costs.clone();
                self.selling_price = e.selling_price;
                self.total_quantity = 0;
                self.available_quantity = 0;
                self.status = SkuStatus::Active;
                self.created = true;
            }
            SkuEvent::StockProduced(e) => {
                self.total_quantity = self.total_quantity.saturating_add(e.entry.quantity_change);
                self.available_quantity = e.entry.quantity_after;
            }
            SkuEvent::StockSold(e) | SkuEvent::StockAdjusted(e) => {
                self.available_quantity = e.entry.quantity_after;
            }
            SkuEvent::StockDestroyed(e) => {
                self.available_quantity = e.entry.quantity_after;
            }
            SkuEvent::SkuStatusChanged(e) => {
                self.status = e.status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SkuCommand::RegisterSku(cmd) => self.handle_register(cmd),
            SkuCommand::ProduceStock(cmd) => self.handle_produce(cmd),
            SkuCommand::SellStock(cmd) => self.handle_sell(cmd),
            SkuCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            SkuCommand::DestroyStock(cmd) => self.handle_destroy(cmd),
            SkuCommand::SetSkuStatus(cmd) => self.handle_set_status(cmd),
        }
    }
}

impl ProductSku {
    fn ensure_target(&self, tenant_id: TenantId, sku_id: SkuId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != sku_id {
            return Err(DomainError::invariant("sku_id mismatch"));
        }
        Ok(())
    }

    fn ensure_operator(operator: &str) -> Result<(), DomainError> {
        if operator.trim().is_empty() {
            return Err(DomainError::validation("operator cannot be empty"));
        }
        Ok(())
    }

    fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
        DomainError::require_positive("quantity", quantity)
    }

    fn handle_register(&self, cmd: &RegisterSku) -> Result<Vec<SkuEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sku already exists for this signature"));
        }
        let sku_name = base_sku_name(&cmd.name);
        if sku_name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.sku_code.trim().is_empty() {
            return Err(DomainError::validation("sku_code cannot be empty"));
        }
        if cmd.selling_price.is_sign_negative() {
            return Err(DomainError::validation("selling_price cannot be negative"));
        }
        if cmd.costs.material_cost.is_sign_negative()
            || cmd.costs.labor_cost.is_sign_negative()
            || cmd.costs.craft_cost.is_sign_negative()
        {
            return Err(DomainError::validation("costs cannot be negative"));
        }

        let signature_hash = cmd.signature.hash()?;
        if SkuId::for_signature(cmd.tenant_id, &signature_hash) != cmd.sku_id {
            return Err(DomainError::invariant("sku_id is not derived from the signature"));
        }

        Ok(vec![SkuEvent::SkuRegistered(SkuRegistered {
            tenant_id: cmd.tenant_id,
            sku_id: cmd.sku_id,
            sku_code: cmd.sku_code.clone(),
            sku_name,
            signature: cmd.signature.clone(),
            signature_hash,
            costs: cmd.costs.clone(),
            selling_price: cmd.selling_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_produce(&self, cmd: &ProduceStock) -> Result<Vec<SkuEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.sku_id)?;
        Self::ensure_positive(cmd.quantity)?;
        Self::ensure_operator(&cmd.operator)?;

        let before = self.available_quantity;
        let after = before
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("available quantity would overflow"))?;
        if self.total_quantity.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::validation("total quantity would overflow"));
        }
        Ok(vec![SkuEvent::StockProduced(StockMovement {
            tenant_id: cmd.tenant_id,
            sku_id: cmd.sku_id,
            entry: LogEntry {
                action: InventoryAction::Create,
                quantity_change: cmd.quantity,
                quantity_before: before,
                quantity_after: after,
                reference_type: ReferenceType::Product,
                reference_id: cmd.reference_id.clone(),
                operator: cmd.operator.clone(),
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_sell(&self, cmd: &SellStock) -> Result<Vec<SkuEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.sku_id)?;
        Self::ensure_positive(cmd.quantity)?;
        Self::ensure_operator(&cmd.operator)?;
        if self.status != SkuStatus::Active {
            return Err(DomainError::invariant("inactive skus cannot be sold"));
        }
        if cmd.quantity > self.available_quantity {
            return Err(DomainError::insufficient(cmd.quantity, self.available_quantity));
        }

        let before = self.available_quantity;
        Ok(vec![SkuEvent::StockSold(StockMovement {
            tenant_id: cmd.tenant_id,
            sku_id: cmd.sku_id,
            entry: LogEntry {
                action: InventoryAction::Sell,
                quantity_change: -cmd.quantity,
                quantity_before: before,
                quantity_after: before - cmd.quantity,
                reference_type: ReferenceType::Sale,
                reference_id: cmd.reference_id.clone(),
                operator: cmd.operator.clone(),
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<SkuEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.sku_id)?;
        Self::ensure_operator(&cmd.operator)?;
        DomainError::require_non_negative("new_quantity", cmd.new_quantity)?;
        let before = self.available_quantity;
        if cmd.new_quantity == before {
            return Err(DomainError::validation("new_quantity equals current quantity"));
        }

        Ok(vec![SkuEvent::StockAdjusted(StockMovement {
            tenant_id: cmd.tenant_id,
            sku_id: cmd.sku_id,
            entry: LogEntry {
                action: InventoryAction::Adjust,
                quantity_change: cmd.new_quantity - before,
                quantity_before: before,
                quantity_after: cmd.new_quantity,
                reference_type: cmd.reference_type,
                reference_id: cmd.reference_id.clone(),
                operator: cmd.operator.clone(),
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_destroy(&self, cmd: &DestroyStock) -> Result<Vec<SkuEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.sku_id)?;
        Self::ensure_positive(cmd.quantity)?;
        Self::ensure_operator(&cmd.operator)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("destroy reason cannot be empty"));
        }
        if cmd.quantity > self.available_quantity {
            return Err(DomainError::insufficient(cmd.quantity, self.available_quantity));
        }

        let before = self.available_quantity;
        Ok(vec![SkuEvent::StockDestroyed(StockDestroyed {
            tenant_id: cmd.tenant_id,
            sku_id: cmd.sku_id,
            entry: LogEntry {
                action: InventoryAction::Destroy,
                quantity_change: -cmd.quantity,
                quantity_before: before,
                quantity_after: before - cmd.quantity,
                reference_type: ReferenceType::Destroy,
                reference_id: cmd.reference_id.clone(),
                operator: cmd.operator.clone(),
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            },
            reason: cmd.reason.clone(),
            return_to_material: cmd.return_to_material,
        })])
    }

    fn handle_set_status(&self, cmd: &SetSkuStatus) -> Result<Vec<SkuEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.sku_id)?;
        if self.status == cmd.status {
            return Err(DomainError::conflict(format!("sku is already {:?}", cmd.status)));
        }

        Ok(vec![SkuEvent::SkuStatusChanged(SkuStatusChanged {
            tenant_id: cmd.tenant_id,
            sku_id: cmd.sku_id,
            status: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Strip a trailing `#<number>` batch suffix: "Rose Quartz Bracelet #3" → "Rose Quartz Bracelet".
pub fn base_sku_name(name: &str) -> String {
    let trimmed = name.trim();
    if let Some(idx) = trimmed.rfind('#') {
        let suffix = &trimmed[idx + 1..];
        let base = trimmed[..idx].trim_end();
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) && !base.is_empty() {
            return base.to_string();
        }
    }
    trimmed.to_string()
}

/// `{prefix}{YYYYMMDD}{seq:03}`, e.g. `SKU20261019001`.
pub fn format_sku_code(prefix: &str, date: NaiveDate, sequence: u32) -> String {
    format!("{prefix}{}{sequence:03}", date.format("%Y%m%d"))
}

/// Inverse of [`format_sku_code`] for a given prefix and day.
pub fn parse_sku_code_sequence(code: &str, prefix: &str, date: NaiveDate) -> Option<u32> {
    let day = date.format("%Y%m%d").to_string();
    code.strip_prefix(prefix)?.strip_prefix(day.as_str())?.parse().ok()
}
