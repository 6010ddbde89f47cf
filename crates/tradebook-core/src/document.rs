//! # Trade Documents
//!
//! Totals, payment status and the stock effect of sales and purchases.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Fulfilment (stock)          Payment (money, always derived)            │
//! │                                                                         │
//! │  ┌─────────┐  deduct   ┌───────────┐     Pending ─► Partial ─► Paid     │
//! │  │ Pending │──────────►│ Completed │        ▲          │         │      │
//! │  │         │◄──────────│           │        └──────────┴─────────┘      │
//! │  └─────────┘  restore  └─────┬─────┘        (reversal moves back)       │
//! │                              │ items / warehouse edited                 │
//! │                              └─► revert old effect, apply new effect    │
//! │                                                                         │
//! │  The two axes are orthogonal. Sales deduct (-qty), purchases add        │
//! │  (+qty); purchases are received on creation and stay Completed.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::stock::{StockDelta, StockLedger};
use crate::types::{
    DocumentKind, FulfilmentStatus, LineItem, PaymentStatus, TaxRate, TradeDocument,
};
use crate::unit_of_work::OperationContext;
use crate::validation::{validate_line_items, validate_non_negative_cents};

// =============================================================================
// Inputs
// =============================================================================

/// A line as entered by the caller. The unit price defaults to the product's
/// price on sales and its cost on purchases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub unit_price_cents: Option<i64>,
}

impl LineInput {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        LineInput {
            product_id: product_id.into(),
            quantity,
            unit_price_cents: None,
        }
    }

    pub fn at_price(mut self, unit_price_cents: i64) -> Self {
        self.unit_price_cents = Some(unit_price_cents);
        self
    }
}

/// A new sale or purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub kind: DocumentKind,
    /// Defaults to the operation time.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    pub party_id: String,
    pub warehouse_id: String,
    pub items: Vec<LineInput>,
    #[serde(default)]
    pub shipping_cents: i64,
    pub fulfilment_status: FulfilmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Changes to an existing document. `None` keeps the current value.
///
/// The party and the stamped tax rate cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentEdit {
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<LineInput>>,
    #[serde(default)]
    pub shipping_cents: Option<i64>,
    #[serde(default)]
    pub fulfilment_status: Option<FulfilmentStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

// =============================================================================
// Totals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub grand_total: Money,
}

/// grand total = sum of subtotals + tax on that sum + shipping.
pub fn compute_totals(items: &[LineItem], rate: TaxRate, shipping: Money) -> DocumentTotals {
    let subtotal: Money = items.iter().map(LineItem::subtotal).sum();
    let tax = subtotal.calculate_tax(rate);
    DocumentTotals {
        subtotal,
        tax,
        shipping,
        grand_total: subtotal + tax + shipping,
    }
}

/// Resolves caller lines into priced line items.
pub fn build_items(
    kind: DocumentKind,
    lines: &[LineInput],
    ledger: &StockLedger,
) -> CoreResult<Vec<LineItem>> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let product = ledger.product(&line.product_id)?;
        let unit_price = line.unit_price_cents.unwrap_or(match kind {
            DocumentKind::Sale => product.price_cents,
            DocumentKind::Purchase => product.cost_cents,
        });
        items.push(LineItem::try_new(&line.product_id, line.quantity, unit_price)?);
    }
    validate_line_items(&items)?;
    Ok(items)
}

// =============================================================================
// TradeDocument Behaviour
// =============================================================================

impl TradeDocument {
    #[inline]
    pub fn grand_total(&self) -> Money {
        Money::from_cents(self.grand_total_cents)
    }

    #[inline]
    pub fn paid_amount(&self) -> Money {
        Money::from_cents(self.paid_amount_cents)
    }

    /// What is still owed on this document, never negative.
    pub fn amount_due(&self) -> Money {
        (self.grand_total() - self.paid_amount()).floor_zero()
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.fulfilment_status == FulfilmentStatus::Completed
    }

    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }

    pub fn totals(&self) -> DocumentTotals {
        compute_totals(
            &self.items,
            self.tax_rate(),
            Money::from_cents(self.shipping_cents),
        )
    }

    /// Re-derives the grand total and payment status from items and paid
    /// amount. Stored values are never trusted.
    pub fn recompute(&mut self) {
        self.grand_total_cents = self.totals().grand_total.cents();
        self.payment_status = PaymentStatus::derive(self.paid_amount(), self.grand_total());
    }

    /// Adds an allocated amount.
    pub fn apply_payment(&mut self, amount: Money) {
        self.paid_amount_cents += amount.cents();
        self.payment_status = PaymentStatus::derive(self.paid_amount(), self.grand_total());
    }

    /// Removes a reversed amount, floored at zero.
    pub fn remove_payment(&mut self, amount: Money) {
        self.paid_amount_cents = (self.paid_amount() - amount).floor_zero().cents();
        self.payment_status = PaymentStatus::derive(self.paid_amount(), self.grand_total());
    }

    /// The stock this document currently holds applied. Empty unless
    /// Completed.
    pub fn stock_effect(&self) -> Vec<StockDelta> {
        if !self.is_completed() {
            return Vec::new();
        }
        let sign = self.kind.stock_sign();
        self.items
            .iter()
            .map(|item| StockDelta::new(&item.product_id, &self.warehouse_id, sign * item.quantity))
            .collect()
    }
}

// =============================================================================
// Construction and Edits
// =============================================================================

fn check_fulfilment(kind: DocumentKind, status: FulfilmentStatus) -> CoreResult<()> {
    if kind == DocumentKind::Purchase && status != FulfilmentStatus::Completed {
        return Err(CoreError::invalid(
            "fulfilment_status",
            "purchases are received on creation and must be completed",
        ));
    }
    Ok(())
}

/// Builds a new document with derived totals, not yet paid.
pub fn new_document(
    ctx: &OperationContext,
    id: String,
    reference: String,
    tax_rate: TaxRate,
    draft: &DocumentDraft,
    ledger: &StockLedger,
) -> CoreResult<TradeDocument> {
    validate_non_negative_cents("shipping", draft.shipping_cents)?;
    check_fulfilment(draft.kind, draft.fulfilment_status)?;
    let items = build_items(draft.kind, &draft.items, ledger)?;

    let mut document = TradeDocument {
        id,
        kind: draft.kind,
        reference,
        date: draft.date.unwrap_or(ctx.now),
        party_id: draft.party_id.clone(),
        warehouse_id: draft.warehouse_id.clone(),
        items,
        tax_rate_bps: tax_rate.bps(),
        shipping_cents: draft.shipping_cents,
        grand_total_cents: 0,
        paid_amount_cents: 0,
        payment_status: PaymentStatus::Pending,
        fulfilment_status: draft.fulfilment_status,
        notes: draft.notes.clone(),
        created_by: ctx.user_id.clone(),
        created_at: ctx.now,
        updated_at: ctx.now,
        version: 1,
    };
    document.recompute();
    Ok(document)
}

/// Returns the edited copy of `current` with totals and status re-derived
/// and the version advanced.
pub fn apply_edit(
    ctx: &OperationContext,
    current: &TradeDocument,
    edit: &DocumentEdit,
    ledger: &StockLedger,
) -> CoreResult<TradeDocument> {
    let mut next = current.clone();

    if let Some(status) = edit.fulfilment_status {
        check_fulfilment(current.kind, status)?;
        next.fulfilment_status = status;
    }
    if let Some(shipping) = edit.shipping_cents {
        validate_non_negative_cents("shipping", shipping)?;
        next.shipping_cents = shipping;
    }
    if let Some(lines) = &edit.items {
        next.items = build_items(current.kind, lines, ledger)?;
    }
    if let Some(warehouse_id) = &edit.warehouse_id {
        next.warehouse_id = warehouse_id.clone();
    }
    if let Some(date) = edit.date {
        next.date = date;
    }
    if let Some(notes) = &edit.notes {
        next.notes = Some(notes.clone());
    }

    next.recompute();
    next.updated_at = ctx.now;
    next.version = current.version + 1;
    Ok(next)
}

/// Moves stock from the state `before` holds applied to the state `after`
/// needs: the old effect is reverted and the new one applied in one batch.
///
/// `None` on either side means the document does not exist on that side
/// (creation or deletion). Any failing line aborts with the ledger
/// untouched for the caller's purposes: the whole plan is discarded.
pub fn transition_stock(
    ledger: &mut StockLedger,
    before: Option<&TradeDocument>,
    after: Option<&TradeDocument>,
) -> CoreResult<()> {
    let mut deltas: Vec<StockDelta> = before
        .map(|doc| doc.stock_effect().iter().map(StockDelta::reversed).collect())
        .unwrap_or_default();
    if let Some(doc) = after {
        deltas.extend(doc.stock_effect());
    }
    ledger.apply_all(&deltas)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Product, ProductType, StockLevel};

    fn ctx() -> OperationContext {
        OperationContext::new("u1")
    }

    fn ledger(quantity: i64) -> StockLedger {
        let now = Utc::now();
        StockLedger::new(vec![Product {
            id: "p1".to_string(),
            sku: "P1".to_string(),
            name: "Widget".to_string(),
            product_type: ProductType::Physical,
            cost_cents: 9_000,
            price_cents: 15_000,
            min_stock_alert: 0,
            stock_levels: vec![StockLevel {
                product_id: "p1".to_string(),
                warehouse_id: "w1".to_string(),
                quantity,
                version: 1,
            }],
            created_at: now,
            updated_at: now,
            version: 1,
        }])
    }

    fn draft(kind: DocumentKind, qty: i64, status: FulfilmentStatus) -> DocumentDraft {
        DocumentDraft {
            kind,
            date: None,
            party_id: "c1".to_string(),
            warehouse_id: "w1".to_string(),
            items: vec![LineInput::new("p1", qty)],
            shipping_cents: 0,
            fulfilment_status: status,
            notes: None,
        }
    }

    #[test]
    fn test_totals_include_tax_and_shipping() {
        let items = vec![LineItem::new("p1", 2, 10_000), LineItem::new("p2", 1, 5_000)];
        let totals = compute_totals(&items, TaxRate::from_bps(1000), Money::from_cents(1_500));
        assert_eq!(totals.subtotal.cents(), 25_000);
        assert_eq!(totals.tax.cents(), 2_500);
        assert_eq!(totals.grand_total.cents(), 29_000);
    }

    #[test]
    fn test_new_sale_defaults_to_product_price() {
        let ledger = ledger(20);
        let doc = new_document(
            &ctx(),
            "d1".into(),
            "SAL-1".into(),
            TaxRate::zero(),
            &draft(DocumentKind::Sale, 5, FulfilmentStatus::Completed),
            &ledger,
        )
        .unwrap();
        assert_eq!(doc.grand_total_cents, 75_000);
        assert_eq!(doc.payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_purchase_cannot_be_pending() {
        let err = new_document(
            &ctx(),
            "d1".into(),
            "PUR-1".into(),
            TaxRate::zero(),
            &draft(DocumentKind::Purchase, 5, FulfilmentStatus::Pending),
            &ledger(0),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_fulfilment_edit_is_reversible() {
        // 10 on hand: complete qty 5 -> 5, edit to 7 -> 3, back to pending -> 10
        let mut ledger = ledger(10);
        let doc = new_document(
            &ctx(),
            "d1".into(),
            "SAL-1".into(),
            TaxRate::zero(),
            &draft(DocumentKind::Sale, 5, FulfilmentStatus::Completed),
            &ledger,
        )
        .unwrap();
        transition_stock(&mut ledger, None, Some(&doc)).unwrap();
        assert_eq!(ledger.quantity("p1", "w1").unwrap(), Some(5));

        let edited = apply_edit(
            &ctx(),
            &doc,
            &DocumentEdit {
                items: Some(vec![LineInput::new("p1", 7)]),
                ..DocumentEdit::default()
            },
            &ledger,
        )
        .unwrap();
        transition_stock(&mut ledger, Some(&doc), Some(&edited)).unwrap();
        assert_eq!(ledger.quantity("p1", "w1").unwrap(), Some(3));
        assert_eq!(edited.grand_total_cents, 105_000);
        assert_eq!(edited.version, doc.version + 1);

        let pending = apply_edit(
            &ctx(),
            &edited,
            &DocumentEdit {
                fulfilment_status: Some(FulfilmentStatus::Pending),
                ..DocumentEdit::default()
            },
            &ledger,
        )
        .unwrap();
        transition_stock(&mut ledger, Some(&edited), Some(&pending)).unwrap();
        assert_eq!(ledger.quantity("p1", "w1").unwrap(), Some(10));
    }

    #[test]
    fn test_failed_rededuction_reports_available_after_revert() {
        let mut ledger = ledger(10);
        let doc = new_document(
            &ctx(),
            "d1".into(),
            "SAL-1".into(),
            TaxRate::zero(),
            &draft(DocumentKind::Sale, 5, FulfilmentStatus::Completed),
            &ledger,
        )
        .unwrap();
        transition_stock(&mut ledger, None, Some(&doc)).unwrap();

        let edited = apply_edit(
            &ctx(),
            &doc,
            &DocumentEdit {
                items: Some(vec![LineInput::new("p1", 11)]),
                ..DocumentEdit::default()
            },
            &ledger,
        )
        .unwrap();
        let err = transition_stock(&mut ledger, Some(&doc), Some(&edited)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InsufficientStock {
                product: "Widget".to_string(),
                available: 10,
                requested: 11,
            }
        );
    }

    #[test]
    fn test_payment_status_follows_paid_amount() {
        let ledger = ledger(20);
        let mut doc = new_document(
            &ctx(),
            "d1".into(),
            "SAL-1".into(),
            TaxRate::zero(),
            &draft(DocumentKind::Sale, 5, FulfilmentStatus::Pending),
            &ledger,
        )
        .unwrap();

        doc.apply_payment(Money::from_cents(100_000));
        assert_eq!(doc.payment_status, PaymentStatus::Paid);
        assert_eq!(doc.amount_due(), Money::zero());

        doc.remove_payment(Money::from_cents(40_000));
        assert_eq!(doc.paid_amount_cents, 60_000);
        assert_eq!(doc.payment_status, PaymentStatus::Partial);

        doc.remove_payment(Money::from_cents(90_000));
        assert_eq!(doc.paid_amount_cents, 0);
        assert_eq!(doc.payment_status, PaymentStatus::Pending);
    }
}
