//! Domain models for Till
//!
//! Reference entities are backend-owned rows the terminal caches read-only.
//! Outbound entities are produced locally while offline and drained to the
//! backend by the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The reference datasets the terminal caches, in backend dependency order.
///
/// The order matters for delta pulls: parents (categories, product types,
/// taxes) are pulled before the rows that reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKey {
    Categories,
    ProductTypes,
    Taxes,
    ModifierSets,
    Users,
    Products,
    Discounts,
    InventoryLocations,
    InventoryStocks,
    Settings,
}

/// Pull order for the delta-sync loop.
pub const DATASET_PULL_ORDER: [DatasetKey; 10] = [
    DatasetKey::Categories,
    DatasetKey::ProductTypes,
    DatasetKey::Taxes,
    DatasetKey::ModifierSets,
    DatasetKey::Users,
    DatasetKey::Products,
    DatasetKey::Discounts,
    DatasetKey::InventoryLocations,
    DatasetKey::InventoryStocks,
    DatasetKey::Settings,
];

impl DatasetKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::ProductTypes => "product_types",
            Self::Taxes => "taxes",
            Self::ModifierSets => "modifier_sets",
            Self::Users => "users",
            Self::Products => "products",
            Self::Discounts => "discounts",
            Self::InventoryLocations => "inventory_locations",
            Self::InventoryStocks => "inventory_stocks",
            Self::Settings => "settings",
        }
    }

    /// The cache table backing this dataset.
    pub fn table(&self) -> &'static str {
        // Table names match dataset keys one-to-one.
        self.as_str()
    }
}

impl std::str::FromStr for DatasetKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "categories" => Ok(Self::Categories),
            "product_types" => Ok(Self::ProductTypes),
            "taxes" => Ok(Self::Taxes),
            "modifier_sets" => Ok(Self::ModifierSets),
            "users" => Ok(Self::Users),
            "products" => Ok(Self::Products),
            "discounts" => Ok(Self::Discounts),
            "inventory_locations" => Ok(Self::InventoryLocations),
            "inventory_stocks" => Ok(Self::InventoryStocks),
            "settings" => Ok(Self::Settings),
            _ => Err(format!("Unknown dataset key: {}", s)),
        }
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// High-water mark for one dataset's delta pulls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub key: String,
    /// Backend-issued version marker, usually an ISO-8601 timestamp.
    pub version: String,
    pub synced_at: DateTime<Utc>,
    pub record_count: i64,
    pub deleted_count: i64,
}

/// A sellable product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub product_type_id: Option<i64>,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub track_inventory: bool,
    #[serde(default)]
    pub has_modifiers: bool,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Backend tax identifiers applied to this product (stored as JSON).
    #[serde(default)]
    pub tax_ids: Vec<i64>,
    /// Modifier-set configuration blobs (stored as JSON, shape owned by the
    /// backend).
    #[serde(default)]
    pub modifier_groups: serde_json::Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// A category in the nested-set hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub lft: i64,
    #[serde(default)]
    pub rght: i64,
    #[serde(default)]
    pub tree_id: i64,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub display_order: i64,
}

/// How many options a modifier set allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionType {
    Single,
    Multi,
}

impl SelectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }
}

impl std::str::FromStr for SelectionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" | "multiple" => Ok(Self::Multi),
            _ => Err(format!("Unknown selection type: {}", s)),
        }
    }
}

/// A set of product modifiers (e.g. "Milk choice", "Extras")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierSet {
    pub id: i64,
    pub name: String,
    pub selection_type: SelectionType,
    #[serde(default)]
    pub min_selections: i64,
    #[serde(default)]
    pub max_selections: Option<i64>,
    /// Option that reveals this set when selected (conditional modifiers).
    #[serde(default)]
    pub triggered_by_option_id: Option<i64>,
    /// Option list blob, shape owned by the backend.
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Fixed,
    Bogo,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
            Self::Bogo => "bogo",
        }
    }
}

impl std::str::FromStr for DiscountKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "percentage" | "percent" => Ok(Self::Percentage),
            "fixed" | "fixed_amount" => Ok(Self::Fixed),
            "bogo" => Ok(Self::Bogo),
            _ => Err(format!("Unknown discount kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountScope {
    Order,
    Product,
    Category,
}

impl DiscountScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Product => "product",
            Self::Category => "category",
        }
    }
}

impl std::str::FromStr for DiscountScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "order" => Ok(Self::Order),
            "product" => Ok(Self::Product),
            "category" => Ok(Self::Category),
            _ => Err(format!("Unknown discount scope: {}", s)),
        }
    }
}

/// A discount rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: i64,
    pub name: String,
    pub kind: DiscountKind,
    pub scope: DiscountScope,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_purchase_amount: Option<f64>,
    #[serde(default)]
    pub buy_quantity: Option<i64>,
    #[serde(default)]
    pub get_quantity: Option<i64>,
    #[serde(default)]
    pub applicable_product_ids: Vec<i64>,
    #[serde(default)]
    pub applicable_category_ids: Vec<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// A tax rate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tax {
    pub id: i64,
    pub name: String,
    /// Percentage, e.g. 8.5 for 8.5%.
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLocation {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Stock level of one product at one location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryStock {
    pub id: i64,
    pub product_id: i64,
    pub location_id: i64,
    pub quantity: f64,
    #[serde(default)]
    pub low_stock_threshold: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A POS staff member
///
/// Only staff who can operate this terminal are synced down; `pin_hash` is
/// an argon2 hash so the terminal can verify PINs while offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub pin_hash: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// One settings row as delivered by the backend
///
/// The shape is backend-owned, so the body stays an opaque JSON blob; typed
/// views (like offline exposure limits) are parsed out on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    pub id: i64,
    pub data: serde_json::Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Offline exposure caps parsed from cached store settings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OfflineLimits {
    /// Largest single offline payment allowed.
    pub transaction_cap: Option<f64>,
    /// Largest aggregate offline amount before a sync is required.
    pub daily_cap: Option<f64>,
    /// Most offline payments allowed before a sync is required.
    pub transaction_count_cap: Option<i64>,
}

// ---------------------------------------------------------------------------
// Outbound entities
// ---------------------------------------------------------------------------

/// What kind of backend mutation an operation describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Order,
    Inventory,
    Approval,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "ORDER",
            Self::Inventory => "INVENTORY",
            Self::Approval => "APPROVAL",
        }
    }

    /// Drain priority within one local order: the order itself first, then
    /// inventory adjustments, then approvals.
    pub fn drain_rank(&self) -> i64 {
        match self {
            Self::Order => 0,
            Self::Inventory => 1,
            Self::Approval => 2,
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ORDER" => Ok(Self::Order),
            "INVENTORY" => Ok(Self::Inventory),
            "APPROVAL" => Ok(Self::Approval),
            _ => Err(format!("Unknown operation kind: {}", s)),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SENDING" => Ok(Self::Sending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown operation status: {}", s)),
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable, retryable record of one outbound mutation
///
/// The id is a v4 UUID assigned at enqueue and doubles as the backend
/// idempotency key; it never changes across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub local_order_id: Option<Uuid>,
    pub status: OperationStatus,
    pub retries: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest next drain attempt for a parked operation.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub last_error: Option<String>,
    pub last_response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSyncStatus {
    Pending,
    Synced,
    Conflict,
}

impl OrderSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Synced => "SYNCED",
            Self::Conflict => "CONFLICT",
        }
    }
}

impl std::str::FromStr for OrderSyncStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SYNCED" => Ok(Self::Synced),
            "CONFLICT" => Ok(Self::Conflict),
            _ => Err(format!("Unknown order sync status: {}", s)),
        }
    }
}

/// An order captured while offline, before a server identity exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineOrder {
    pub local_id: Uuid,
    /// Full order snapshot (items, totals, embedded payments).
    pub payload: serde_json::Value,
    pub status: OrderSyncStatus,
    pub server_order_id: Option<String>,
    pub server_order_number: Option<String>,
    pub conflict_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    CardTerminal,
    GiftCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::CardTerminal => "CARD_TERMINAL",
            Self::GiftCard => "GIFT_CARD",
        }
    }

    /// Whether this method counts against the offline card exposure.
    pub fn is_card(&self) -> bool {
        matches!(self, Self::CardTerminal | Self::GiftCard)
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CASH" => Ok(Self::Cash),
            "CARD_TERMINAL" | "CARD" => Ok(Self::CardTerminal),
            "GIFT_CARD" => Ok(Self::GiftCard),
            _ => Err(format!("Unknown payment method: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment captured against an offline order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflinePayment {
    pub id: i64,
    pub local_order_id: Uuid,
    pub method: PaymentMethod,
    pub amount: f64,
    pub tip: f64,
    pub surcharge: f64,
    pub provider_transaction_id: Option<String>,
    pub cash_tendered: Option<f64>,
    pub cash_change: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOfflinePayment {
    pub method: PaymentMethod,
    pub amount: f64,
    #[serde(default)]
    pub tip: f64,
    #[serde(default)]
    pub surcharge: f64,
    #[serde(default)]
    pub provider_transaction_id: Option<String>,
    #[serde(default)]
    pub cash_tendered: Option<f64>,
}

impl NewOfflinePayment {
    /// The amount this payment adds to the offline exposure counters.
    pub fn exposure(&self) -> f64 {
        self.amount + self.surcharge + self.tip
    }

    /// Change due for a cash payment.
    pub fn cash_change(&self) -> Option<f64> {
        self.cash_tendered.map(|t| t - self.exposure())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Discount,
    Void,
    Refund,
    PriceOverride,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discount => "discount",
            Self::Void => "void",
            Self::Refund => "refund",
            Self::PriceOverride => "price_override",
        }
    }
}

impl std::str::FromStr for ApprovalKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discount" => Ok(Self::Discount),
            "void" => Ok(Self::Void),
            "refund" => Ok(Self::Refund),
            "price_override" => Ok(Self::PriceOverride),
            _ => Err(format!("Unknown approval kind: {}", s)),
        }
    }
}

/// A manager override recorded while offline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineApproval {
    pub id: i64,
    pub kind: ApprovalKind,
    /// Argon2 hash of the approving manager's PIN.
    pub manager_pin_hash: String,
    pub local_order_id: Option<Uuid>,
    pub reference: Option<String>,
    pub value: Option<f64>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Device metadata
// ---------------------------------------------------------------------------

/// The identity binding a terminal to a tenant and location
///
/// Pairing is all-or-nothing: either every field is stored, or the terminal
/// is unpaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingInfo {
    pub terminal_id: String,
    pub tenant_id: String,
    pub location_id: String,
    /// Opaque signing secret issued at pairing time.
    pub signing_secret: String,
    pub paired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
    Unknown,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for NetworkStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown network status: {}", s)),
        }
    }
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_key_round_trip() {
        for key in DATASET_PULL_ORDER {
            let parsed: DatasetKey = key.as_str().parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn test_drain_rank_orders_kinds() {
        assert!(OperationKind::Order.drain_rank() < OperationKind::Inventory.drain_rank());
        assert!(OperationKind::Inventory.drain_rank() < OperationKind::Approval.drain_rank());
    }

    #[test]
    fn test_payment_exposure_includes_tip_and_surcharge() {
        let p = NewOfflinePayment {
            method: PaymentMethod::Cash,
            amount: 10.00,
            tip: 1.50,
            surcharge: 0.35,
            provider_transaction_id: None,
            cash_tendered: Some(20.00),
        };
        assert!((p.exposure() - 11.85).abs() < 1e-9);
        assert!((p.cash_change().unwrap() - 8.15).abs() < 1e-9);
    }

    #[test]
    fn test_product_deserializes_with_defaults() {
        let p: Product = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "Espresso",
            "price": 3.25
        }))
        .unwrap();
        assert!(p.is_active);
        assert!(p.tax_ids.is_empty());
        assert_eq!(p.barcode, None);
    }
}
