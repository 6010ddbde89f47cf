//! # Domain Types
//!
//! The records the ledger reads and writes.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │  TradeDocument  │   │  PaymentRecord  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  product_type   │   │  kind           │   │  obligation     │       │
//! │  │  stock_levels   │   │  items          │   │  amount_cents   │       │
//! │  │  (per warehouse)│   │  paid / status  │   │  method         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │     Party       │   │   CreditNote    │   │ DeletedPaymentAudit │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  opening bal.   │   │  financial /    │   │  payment copy       │   │
//! │  │  credit bal.    │   │  return         │   │  reason, deleted_by │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Versions
//! Mutable records (products' stock levels, parties, trade documents) carry a
//! `version` stamp. The record store only applies an update when the stored
//! version still equals the version that was read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::validation::{validate_line_quantity, validate_non_negative_cents, ValidationResult};

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (825 = 8.25%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Warehouse
// =============================================================================

/// A stock location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Warehouse {
    pub id: String,
    pub name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Product
// =============================================================================

/// Whether a product carries stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    /// Physical goods: every stock change goes through the StockLedger.
    Physical,
    /// Services carry no stock; stock adjustments are no-ops.
    Service,
}

/// On-hand quantity of one product at one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockLevel {
    pub product_id: String,
    pub warehouse_id: String,
    /// Never negative at rest.
    pub quantity: i64,
    pub version: i64,
}

/// A product that can appear on trade documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name, also used in stock error messages.
    pub name: String,

    pub product_type: ProductType,

    /// Purchase cost in minor units.
    pub cost_cents: i64,

    /// Selling price in minor units.
    pub price_cents: i64,

    /// Quantity at or below which the product shows up as low stock.
    pub min_stock_alert: i64,

    /// Per-warehouse stock (empty for services).
    pub stock_levels: Vec<StockLevel>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    pub version: i64,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_cents)
    }

    #[inline]
    pub fn is_service(&self) -> bool {
        self.product_type == ProductType::Service
    }

    /// Quantity at a warehouse; zero when no entry exists yet.
    pub fn quantity_at(&self, warehouse_id: &str) -> i64 {
        self.stock_levels
            .iter()
            .find(|level| level.warehouse_id == warehouse_id)
            .map(|level| level.quantity)
            .unwrap_or(0)
    }

    /// Total quantity across all warehouses.
    pub fn total_quantity(&self) -> i64 {
        self.stock_levels.iter().map(|level| level.quantity).sum()
    }

    /// True when the product is physical and at or below its alert threshold
    /// at the given warehouse.
    pub fn is_low_stock_at(&self, warehouse_id: &str) -> bool {
        !self.is_service() && self.quantity_at(warehouse_id) <= self.min_stock_alert
    }
}

// =============================================================================
// Party
// =============================================================================

/// Customer or supplier. Structurally identical for ledger purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    Customer,
    Supplier,
}

impl PartyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyKind::Customer => "customer",
            PartyKind::Supplier => "supplier",
        }
    }
}

/// A customer or supplier account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Party {
    pub id: String,
    pub kind: PartyKind,
    pub name: String,

    /// Debt owed at onboarding; fixed at creation.
    pub opening_balance_cents: i64,

    #[ts(as = "String")]
    pub opening_balance_date: DateTime<Utc>,

    /// Funds owed *to* the party (overpayment, returned goods).
    pub credit_balance_cents: i64,

    /// Customers only: whether `credit_limit_cents` is enforced.
    pub credit_limited: bool,

    pub credit_limit_cents: Option<i64>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    pub version: i64,
}

impl Party {
    #[inline]
    pub fn opening_balance(&self) -> Money {
        Money::from_cents(self.opening_balance_cents)
    }

    #[inline]
    pub fn credit_balance(&self) -> Money {
        Money::from_cents(self.credit_balance_cents)
    }

    /// The enforced credit ceiling, if any. Suppliers never have one.
    pub fn credit_ceiling(&self) -> Option<Money> {
        match (self.kind, self.credit_limited, self.credit_limit_cents) {
            (PartyKind::Customer, true, Some(limit)) => Some(Money::from_cents(limit)),
            _ => None,
        }
    }
}

// =============================================================================
// Trade Document
// =============================================================================

/// Sale or purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Sale,
    Purchase,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Sale => "sale",
            DocumentKind::Purchase => "purchase",
        }
    }

    /// Direction of the stock effect per unit: sales deduct, purchases add.
    pub fn stock_sign(&self) -> i64 {
        match self {
            DocumentKind::Sale => -1,
            DocumentKind::Purchase => 1,
        }
    }

    /// The party kind a document of this kind must reference.
    pub fn party_kind(&self) -> PartyKind {
        match self {
            DocumentKind::Sale => PartyKind::Customer,
            DocumentKind::Purchase => PartyKind::Supplier,
        }
    }
}

/// Payment progress of a document. Always derived, never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    /// Paid iff paid >= total; Partial iff 0 < paid < total; else Pending.
    ///
    /// A pure function of its inputs: it never looks at a previously
    /// stored status.
    pub fn derive(paid: Money, total: Money) -> PaymentStatus {
        if paid >= total {
            PaymentStatus::Paid
        } else if paid.is_positive() {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }
}

/// Whether a document's stock effect has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FulfilmentStatus {
    Pending,
    Completed,
}

/// A line on a trade document or return credit note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// unit_price × quantity.
    pub subtotal_cents: i64,
}

impl LineItem {
    /// Creates a line with its subtotal derived. The subtotal saturates;
    /// caller input goes through [`LineItem::try_new`].
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        LineItem {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
            subtotal_cents: unit_price_cents.saturating_mul(quantity),
        }
    }

    /// Creates a line from caller input, rejecting quantities and prices
    /// outside the ledger's bounds before multiplying.
    pub fn try_new(
        product_id: impl Into<String>,
        quantity: i64,
        unit_price_cents: i64,
    ) -> ValidationResult<Self> {
        validate_line_quantity(quantity)?;
        validate_non_negative_cents("unit_price", unit_price_cents)?;
        let subtotal = Money::from_cents(unit_price_cents)
            .checked_multiply_quantity(quantity)
            .ok_or_else(|| ValidationError::OutOfRange {
                field: "subtotal".to_string(),
                min: 0,
                max: i64::MAX,
            })?;

        Ok(LineItem {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
            subtotal_cents: subtotal.cents(),
        })
    }

    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

/// A sale or purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TradeDocument {
    pub id: String,
    pub kind: DocumentKind,
    /// Human-readable reference, e.g. `SAL-20260131-0001`.
    pub reference: String,
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    pub party_id: String,
    pub warehouse_id: String,
    pub items: Vec<LineItem>,
    pub tax_rate_bps: u32,
    pub shipping_cents: i64,
    /// Derived: subtotal + tax + shipping.
    pub grand_total_cents: i64,
    pub paid_amount_cents: i64,
    /// Derived from paid/grand total on every write.
    pub payment_status: PaymentStatus,
    /// Purchases are always Completed (received on creation).
    pub fulfilment_status: FulfilmentStatus,
    pub notes: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

// =============================================================================
// Payments
// =============================================================================

/// How money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Cheque,
    /// Funded from the party's existing credit balance.
    CreditBalance,
    /// Deposit generated by a credit note.
    CreditNote,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::CreditBalance => "credit_balance",
            PaymentMethod::CreditNote => "credit_note",
        }
    }
}

/// Which kind of obligation a payment settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Document,
    OpeningBalance,
    CreditBalance,
}

/// An amount a party owes or is owed.
///
/// The opening-balance and credit-balance obligations are synthetic: one per
/// party, identified by the payment's `party_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "document_id", rename_all = "snake_case")]
pub enum Obligation {
    Document(String),
    OpeningBalance,
    CreditBalance,
}

impl Obligation {
    pub fn kind(&self) -> ObligationKind {
        match self {
            Obligation::Document(_) => ObligationKind::Document,
            Obligation::OpeningBalance => ObligationKind::OpeningBalance,
            Obligation::CreditBalance => ObligationKind::CreditBalance,
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        match self {
            Obligation::Document(id) => Some(id),
            _ => None,
        }
    }
}

/// One money movement against exactly one obligation. Never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentRecord {
    pub id: String,
    pub party_id: String,
    pub obligation_kind: ObligationKind,
    /// Set iff `obligation_kind` is `Document`.
    pub document_id: Option<String>,
    /// Shared by every record one incoming payment was split into.
    pub receipt_id: String,
    /// Set when this record is the deposit of a credit note.
    pub credit_note_id: Option<String>,
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    /// Always positive.
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub note: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    pub fn obligation(&self) -> Obligation {
        match (self.obligation_kind, &self.document_id) {
            (ObligationKind::Document, Some(id)) => Obligation::Document(id.clone()),
            (ObligationKind::CreditBalance, _) => Obligation::CreditBalance,
            _ => Obligation::OpeningBalance,
        }
    }
}

/// Permanent record of a reversed payment.
///
/// One row per reversal, however many obligations the payment was split
/// across.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeletedPaymentAudit {
    pub id: String,
    pub receipt_id: String,
    pub party_id: String,
    /// Full copy of every record of the payment, credit deposits first.
    pub records: Vec<PaymentRecord>,
    #[ts(as = "String")]
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: String,
    pub reason: String,
}

impl DeletedPaymentAudit {
    /// The full amount of the reversed payment.
    pub fn amount(&self) -> Money {
        self.records.iter().map(PaymentRecord::amount).sum()
    }

    /// Documents the reversed payment had settled.
    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().filter_map(|r| r.document_id.as_deref())
    }
}

// =============================================================================
// Credit Notes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CreditNoteType {
    /// Pure money credit.
    Financial,
    /// Goods returned; quantities go back into stock.
    Return,
}

/// Credit granted to a party; always deposited into its credit balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreditNote {
    pub id: String,
    pub reference: String,
    pub party_id: String,
    pub note_type: CreditNoteType,
    /// Return notes only.
    pub warehouse_id: Option<String>,
    /// Return notes only.
    pub items: Vec<LineItem>,
    pub amount_cents: i64,
    pub reason: String,
    /// The deposit this note generated.
    pub payment_id: String,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_derivation() {
        let total = Money::from_cents(100_000);
        assert_eq!(
            PaymentStatus::derive(Money::zero(), total),
            PaymentStatus::Pending
        );
        assert_eq!(
            PaymentStatus::derive(Money::from_cents(60_000), total),
            PaymentStatus::Partial
        );
        assert_eq!(PaymentStatus::derive(total, total), PaymentStatus::Paid);
        assert_eq!(
            PaymentStatus::derive(Money::from_cents(120_000), total),
            PaymentStatus::Paid
        );
    }

    #[test]
    fn test_payment_status_is_pure() {
        let paid = Money::from_cents(300);
        let total = Money::from_cents(750);
        let first = PaymentStatus::derive(paid, total);
        let second = PaymentStatus::derive(paid, total);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_total_document_is_paid() {
        assert_eq!(
            PaymentStatus::derive(Money::zero(), Money::zero()),
            PaymentStatus::Paid
        );
    }

    #[test]
    fn test_line_item_subtotal() {
        let line = LineItem::new("p1", 5, 15_000);
        assert_eq!(line.subtotal_cents, 75_000);
        assert_eq!(LineItem::try_new("p1", 5, 15_000).unwrap(), line);
    }

    #[test]
    fn test_oversized_unit_price_is_rejected() {
        let err = LineItem::try_new("p1", 3, i64::MAX / 2).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { ref field, .. } if field == "unit_price"));
        assert!(LineItem::try_new("p1", 0, 100).is_err());
    }

    #[test]
    fn test_obligation_round_trip_through_record_fields() {
        let obligation = Obligation::Document("doc-1".to_string());
        assert_eq!(obligation.kind(), ObligationKind::Document);
        assert_eq!(obligation.document_id(), Some("doc-1"));
        assert_eq!(Obligation::CreditBalance.document_id(), None);
    }

    #[test]
    fn test_supplier_has_no_credit_ceiling() {
        let now = Utc::now();
        let mut party = Party {
            id: "s1".to_string(),
            kind: PartyKind::Supplier,
            name: "Acme Wholesale".to_string(),
            opening_balance_cents: 0,
            opening_balance_date: now,
            credit_balance_cents: 0,
            credit_limited: true,
            credit_limit_cents: Some(5_000_000),
            created_at: now,
            updated_at: now,
            version: 1,
        };
        assert_eq!(party.credit_ceiling(), None);

        party.kind = PartyKind::Customer;
        assert_eq!(party.credit_ceiling(), Some(Money::from_cents(5_000_000)));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PaymentMethod::BankTransfer).unwrap();
        assert_eq!(json, "\"bank_transfer\"");
        let json = serde_json::to_string(&Obligation::OpeningBalance).unwrap();
        assert_eq!(json, "{\"kind\":\"opening_balance\"}");
    }
}
