//! # Operations
//!
//! One planning function per coordinator operation. Each takes the records
//! the coordinator read (with their versions) plus the caller's request and
//! returns a [`Plan`]: the complete change set and the caller-facing result.
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────────────────────────┐
//! │ plan function            │ writes                                       │
//! ├──────────────────────────┼──────────────────────────────────────────────┤
//! │ plan_record_document     │ document, stock, party, payments             │
//! │ plan_update_document     │ document, stock, party                       │
//! │ plan_delete_document     │ stock, document (delete), party              │
//! │ plan_allocate_payment    │ documents, party, payments                   │
//! │ plan_reverse_payment     │ payments (delete), documents, party, audit   │
//! │ plan_adjust_stock        │ stock                                        │
//! │ plan_transfer_stock      │ stock ×2                                     │
//! │ plan_create_credit_note  │ stock, party, deposit payment, credit note   │
//! └──────────────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! The party row is written by every operation that reads a party. It is the
//! aggregate root of everything owed by or to that party, so two concurrent
//! operations on the same party always conflict and one of them retries.
//!
//! Planning is deterministic given its inputs (ids aside): a failure at any
//! step returns an error and nothing is written.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocation::{allocate, order_obligations, settle, PaymentTerms};
use crate::balance::{check_credit_limit, opening_remaining, CreditCheck, PartyBalance};
use crate::document::{
    apply_edit, build_items, new_document, transition_stock, DocumentDraft, DocumentEdit,
    LineInput,
};
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::payment::{new_payment, reverse_payment};
use crate::settings::{reference_number, LedgerSettings};
use crate::stock::StockLedger;
use crate::types::{
    CreditNote, CreditNoteType, DeletedPaymentAudit, DocumentKind, Obligation, Party, PartyKind,
    PaymentMethod, PaymentRecord, Product, TradeDocument, Warehouse,
};
use crate::unit_of_work::{ChangeSet, OperationContext, Plan, Write};
use crate::validation::{
    validate_amount_cents, validate_line_items, validate_reason, validate_stock_delta,
    validate_line_quantity, validate_user_id,
};

// =============================================================================
// Shared Inputs
// =============================================================================

/// Money offered by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub amount_cents: i64,
    pub method: PaymentMethod,
    /// Defaults to the operation time.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl PaymentInput {
    pub fn new(amount_cents: i64, method: PaymentMethod) -> Self {
        PaymentInput {
            amount_cents,
            method,
            date: None,
            note: None,
        }
    }

    fn validate(&self) -> CoreResult<Money> {
        validate_amount_cents("amount", self.amount_cents)?;
        if self.method == PaymentMethod::CreditNote {
            return Err(CoreError::invalid(
                "method",
                "credit note deposits are created by issuing a credit note",
            ));
        }
        Ok(Money::from_cents(self.amount_cents))
    }

    fn terms(&self, ctx: &OperationContext) -> PaymentTerms {
        PaymentTerms {
            method: self.method,
            date: self.date.unwrap_or(ctx.now),
            note: self.note.clone(),
        }
    }
}

/// Distinct product ids referenced by a set of lines, in first-seen order.
pub fn product_ids<'a>(lines: impl IntoIterator<Item = &'a LineInput>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in lines {
        if !ids.contains(&line.product_id) {
            ids.push(line.product_id.clone());
        }
    }
    ids
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_same(field: &str, expected: &str, actual: &str) -> CoreResult<()> {
    if expected != actual {
        return Err(CoreError::invalid(
            field,
            format!("expected {}, read {}", expected, actual),
        ));
    }
    Ok(())
}

/// The party write every party-scoped operation ends with.
fn party_write(ctx: &OperationContext, read: &Party, mut next: Party) -> (Party, Write) {
    next.version = read.version + 1;
    next.updated_at = ctx.now;
    (
        next.clone(),
        Write::UpdateParty {
            party: next,
            expected_version: read.version,
        },
    )
}

/// Updates for every read document whose paid amount moved; guards for the
/// rest.
fn settle_documents(
    changes: &mut ChangeSet,
    read: &[TradeDocument],
    settled: &mut HashMap<String, TradeDocument>,
) {
    for original in read {
        match settled.remove(&original.id) {
            Some(mut next) if next.paid_amount_cents != original.paid_amount_cents => {
                next.version = original.version + 1;
                changes.push(Write::UpdateDocument {
                    document: next,
                    expected_version: original.version,
                });
            }
            _ => changes.guard_document(original),
        }
    }
}

fn guard_products<'a>(changes: &mut ChangeSet, products: impl IntoIterator<Item = &'a Product>) {
    for product in products {
        changes.guard_product(product);
    }
}

// =============================================================================
// record_sale / record_purchase
// =============================================================================

/// Records read before creating a document.
#[derive(Debug, Clone)]
pub struct RecordDocumentReads {
    pub party: Party,
    pub warehouse: Warehouse,
    /// Every product on the draft.
    pub products: Vec<Product>,
    /// The party's documents with something still due.
    pub open_documents: Vec<TradeDocument>,
    /// Sum of payments against the party's opening balance.
    pub opening_paid: Money,
    /// 1-based sequence for today's reference number.
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub struct RecordDocumentRequest {
    pub draft: DocumentDraft,
    /// Settles the new document first; any surplus flows to older debt and
    /// then to credit.
    pub initial_payment: Option<PaymentInput>,
    /// Proceed past the credit limit.
    pub confirm_credit_limit: bool,
}

impl RecordDocumentRequest {
    pub fn new(draft: DocumentDraft) -> Self {
        RecordDocumentRequest {
            draft,
            initial_payment: None,
            confirm_credit_limit: false,
        }
    }

    pub fn with_payment(mut self, payment: PaymentInput) -> Self {
        self.initial_payment = Some(payment);
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirm_credit_limit = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDocument {
    pub document: TradeDocument,
    pub payments: Vec<PaymentRecord>,
    pub party: Party,
    pub credit_check: CreditCheck,
}

pub fn plan_record_document(
    ctx: &OperationContext,
    settings: &LedgerSettings,
    reads: RecordDocumentReads,
    request: RecordDocumentRequest,
) -> CoreResult<Plan<RecordedDocument>> {
    validate_user_id(&ctx.user_id)?;
    let draft = &request.draft;
    ensure_same("party_id", &draft.party_id, &reads.party.id)?;
    ensure_same("warehouse_id", &draft.warehouse_id, &reads.warehouse.id)?;
    if reads.party.kind != draft.kind.party_kind() {
        return Err(CoreError::invalid(
            "party_id",
            format!(
                "a {} needs a {}, not a {}",
                draft.kind.as_str(),
                draft.kind.party_kind().as_str(),
                reads.party.kind.as_str()
            ),
        ));
    }

    let payment = request
        .initial_payment
        .as_ref()
        .map(|input| input.validate().map(|amount| (input, amount)))
        .transpose()?;

    let mut ledger = StockLedger::new(reads.products.iter().cloned());
    let reference = reference_number(settings.document_prefix(draft.kind), ctx.now, reads.sequence);
    let document = new_document(
        ctx,
        Uuid::new_v4().to_string(),
        reference,
        settings.tax_rate(),
        draft,
        &ledger,
    )?;
    transition_stock(&mut ledger, None, Some(&document))?;

    let mut party = reads.party.clone();
    let paid_now = payment.map(|(_, amount)| amount).unwrap_or_default();

    let credit_check = if draft.kind == DocumentKind::Sale {
        let balance = PartyBalance::compute(&party, reads.opening_paid, &reads.open_documents);
        check_credit_limit(
            &party,
            balance.outstanding,
            document.grand_total() - paid_now,
            request.confirm_credit_limit,
        )?
    } else {
        CreditCheck::Unlimited
    };

    let mut settled: HashMap<String, TradeDocument> = reads
        .open_documents
        .iter()
        .map(|doc| (doc.id.clone(), doc.clone()))
        .collect();
    settled.insert(document.id.clone(), document.clone());

    let mut payments = Vec::new();
    if let Some((input, amount)) = payment {
        if input.method == PaymentMethod::CreditBalance {
            party.consume_credit(amount)?;
        }
        let candidates: Vec<TradeDocument> = settled.values().cloned().collect();
        let ordered = order_obligations(
            &party,
            opening_remaining(&party, reads.opening_paid),
            &candidates,
            Some(&document.id),
        )?;
        let plan = allocate(amount, &ordered);
        payments = settle(ctx, &plan, &input.terms(ctx), &mut party, &mut settled)?;
    }

    let document = settled.remove(&document.id).unwrap_or(document);

    let mut changes = ChangeSet::new();
    guard_products(&mut changes, &reads.products);
    changes.push(Write::InsertDocument(document.clone()));
    changes.extend(ledger.writes());
    settle_documents(&mut changes, &reads.open_documents, &mut settled);
    let (party, write) = party_write(ctx, &reads.party, party);
    changes.push(write);
    changes.extend(payments.iter().cloned().map(Write::InsertPayment));

    Ok(Plan::new(
        changes,
        RecordedDocument {
            document,
            payments,
            party,
            credit_check,
        },
    ))
}

// =============================================================================
// update_document
// =============================================================================

#[derive(Debug, Clone)]
pub struct UpdateDocumentReads {
    pub document: TradeDocument,
    pub party: Party,
    /// Products on the current lines and on the edited lines.
    pub products: Vec<Product>,
    /// The warehouse the document will be at after the edit.
    pub warehouse: Warehouse,
}

pub fn plan_update_document(
    ctx: &OperationContext,
    reads: UpdateDocumentReads,
    edit: DocumentEdit,
) -> CoreResult<Plan<TradeDocument>> {
    validate_user_id(&ctx.user_id)?;
    let current = &reads.document;
    ensure_same("party_id", &current.party_id, &reads.party.id)?;
    ensure_same(
        "warehouse_id",
        edit.warehouse_id.as_deref().unwrap_or(&current.warehouse_id),
        &reads.warehouse.id,
    )?;

    let mut ledger = StockLedger::new(reads.products.iter().cloned());
    let next = apply_edit(ctx, current, &edit, &ledger)?;
    transition_stock(&mut ledger, Some(current), Some(&next))?;

    let mut changes = ChangeSet::new();
    guard_products(&mut changes, &reads.products);
    changes.extend(ledger.writes());
    changes.push(Write::UpdateDocument {
        document: next.clone(),
        expected_version: current.version,
    });
    let (_, write) = party_write(ctx, &reads.party, reads.party.clone());
    changes.push(write);

    Ok(Plan::new(changes, next))
}

// =============================================================================
// delete_document
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeleteDocumentReads {
    pub document: TradeDocument,
    pub party: Party,
    pub products: Vec<Product>,
    /// Payments still recorded against the document.
    pub payment_count: i64,
}

pub fn plan_delete_document(
    ctx: &OperationContext,
    reads: DeleteDocumentReads,
) -> CoreResult<Plan<TradeDocument>> {
    validate_user_id(&ctx.user_id)?;
    let document = &reads.document;
    ensure_same("party_id", &document.party_id, &reads.party.id)?;

    if reads.payment_count > 0 {
        return Err(CoreError::invalid(
            "document_id",
            format!(
                "{} still has {} payment(s); reverse them first",
                document.reference, reads.payment_count
            ),
        ));
    }

    let mut ledger = StockLedger::new(reads.products.iter().cloned());
    transition_stock(&mut ledger, Some(document), None)?;

    let mut changes = ChangeSet::new();
    guard_products(&mut changes, &reads.products);
    changes.extend(ledger.writes());
    changes.push(Write::DeleteDocument {
        id: document.id.clone(),
        expected_version: document.version,
    });
    let (_, write) = party_write(ctx, &reads.party, reads.party.clone());
    changes.push(write);

    Ok(Plan::new(changes, reads.document))
}

// =============================================================================
// allocate_payment
// =============================================================================

#[derive(Debug, Clone)]
pub struct AllocationReads {
    pub party: Party,
    /// Open documents of the party, plus the target when one was chosen.
    pub documents: Vec<TradeDocument>,
    pub opening_paid: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub party_id: String,
    #[serde(flatten)]
    pub payment: PaymentInput,
    /// Settled first when set.
    #[serde(default)]
    pub target_document_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub payments: Vec<PaymentRecord>,
    /// Part of the payment deposited as party credit.
    pub surplus: Money,
    pub party: Party,
}

pub fn plan_allocate_payment(
    ctx: &OperationContext,
    reads: AllocationReads,
    request: PaymentRequest,
) -> CoreResult<Plan<AllocationOutcome>> {
    validate_user_id(&ctx.user_id)?;
    ensure_same("party_id", &request.party_id, &reads.party.id)?;
    let amount = request.payment.validate()?;

    let mut party = reads.party.clone();
    if request.payment.method == PaymentMethod::CreditBalance {
        party.consume_credit(amount)?;
    }

    let ordered = order_obligations(
        &party,
        opening_remaining(&party, reads.opening_paid),
        &reads.documents,
        request.target_document_id.as_deref(),
    )?;
    let plan = allocate(amount, &ordered);

    let mut settled: HashMap<String, TradeDocument> = reads
        .documents
        .iter()
        .map(|doc| (doc.id.clone(), doc.clone()))
        .collect();
    let payments = settle(ctx, &plan, &request.payment.terms(ctx), &mut party, &mut settled)?;

    let mut changes = ChangeSet::new();
    settle_documents(&mut changes, &reads.documents, &mut settled);
    let (party, write) = party_write(ctx, &reads.party, party);
    changes.push(write);
    changes.extend(payments.iter().cloned().map(Write::InsertPayment));

    Ok(Plan::new(
        changes,
        AllocationOutcome {
            payments,
            surplus: plan.surplus,
            party,
        },
    ))
}

// =============================================================================
// reverse_payment
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReversalReads {
    /// Every live record of the payment, i.e. all records sharing its
    /// receipt id.
    pub records: Vec<PaymentRecord>,
    pub party: Party,
    /// The documents those records settled.
    pub documents: Vec<TradeDocument>,
}

pub fn plan_reverse_payment(
    ctx: &OperationContext,
    reads: ReversalReads,
    reason: &str,
) -> CoreResult<Plan<DeletedPaymentAudit>> {
    validate_user_id(&ctx.user_id)?;

    let mut party = reads.party.clone();
    let mut settled: HashMap<String, TradeDocument> = reads
        .documents
        .iter()
        .map(|doc| (doc.id.clone(), doc.clone()))
        .collect();
    let audit = reverse_payment(ctx, &reads.records, reason, &mut party, &mut settled)?;

    let mut changes = ChangeSet::new();
    changes.extend(audit.records.iter().map(|record| Write::DeletePayment {
        id: record.id.clone(),
    }));
    settle_documents(&mut changes, &reads.documents, &mut settled);
    let (_, write) = party_write(ctx, &reads.party, party);
    changes.push(write);
    changes.push(Write::InsertAudit(audit.clone()));

    Ok(Plan::new(changes, audit))
}

// =============================================================================
// adjust_stock / transfer_stock
// =============================================================================

#[derive(Debug, Clone)]
pub struct StockReads {
    pub product: Product,
    pub warehouse: Warehouse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: String,
    pub warehouse_id: String,
    /// New on-hand quantity; `None` for services.
    pub quantity: Option<i64>,
}

pub fn plan_adjust_stock(
    ctx: &OperationContext,
    reads: StockReads,
    delta: i64,
) -> CoreResult<Plan<StockAdjustment>> {
    validate_user_id(&ctx.user_id)?;
    validate_stock_delta(delta)?;

    let mut ledger = StockLedger::new([reads.product.clone()]);
    let quantity = ledger.adjust(&reads.product.id, &reads.warehouse.id, delta)?;

    let mut changes = ChangeSet::new();
    changes.guard_product(&reads.product);
    changes.extend(ledger.writes());

    Ok(Plan::new(
        changes,
        StockAdjustment {
            product_id: reads.product.id,
            warehouse_id: reads.warehouse.id,
            quantity,
        },
    ))
}

#[derive(Debug, Clone)]
pub struct TransferReads {
    pub product: Product,
    pub from: Warehouse,
    pub to: Warehouse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransfer {
    pub product_id: String,
    pub from_quantity: i64,
    pub to_quantity: i64,
}

pub fn plan_transfer_stock(
    ctx: &OperationContext,
    reads: TransferReads,
    quantity: i64,
) -> CoreResult<Plan<StockTransfer>> {
    validate_user_id(&ctx.user_id)?;
    validate_line_quantity(quantity)?;
    if reads.from.id == reads.to.id {
        return Err(CoreError::invalid(
            "to_warehouse_id",
            "source and destination must differ",
        ));
    }
    if reads.product.is_service() {
        return Err(CoreError::invalid("product_id", "services carry no stock"));
    }

    let mut ledger = StockLedger::new([reads.product.clone()]);
    let from_quantity = ledger
        .adjust(&reads.product.id, &reads.from.id, -quantity)?
        .unwrap_or_default();
    let to_quantity = ledger
        .adjust(&reads.product.id, &reads.to.id, quantity)?
        .unwrap_or_default();

    let mut changes = ChangeSet::new();
    changes.guard_product(&reads.product);
    changes.extend(ledger.writes());

    Ok(Plan::new(
        changes,
        StockTransfer {
            product_id: reads.product.id,
            from_quantity,
            to_quantity,
        },
    ))
}

// =============================================================================
// create_credit_note
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteDraft {
    pub party_id: String,
    pub note_type: CreditNoteType,
    /// Return notes only.
    #[serde(default)]
    pub warehouse_id: Option<String>,
    /// Return notes only.
    #[serde(default)]
    pub items: Vec<LineInput>,
    /// Required for financial notes; defaults to the line total on returns.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CreditNoteReads {
    pub party: Party,
    pub products: Vec<Product>,
    pub warehouse: Option<Warehouse>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCreditNote {
    pub credit_note: CreditNote,
    pub deposit: PaymentRecord,
    pub party: Party,
}

pub fn plan_create_credit_note(
    ctx: &OperationContext,
    settings: &LedgerSettings,
    reads: CreditNoteReads,
    draft: CreditNoteDraft,
) -> CoreResult<Plan<IssuedCreditNote>> {
    validate_user_id(&ctx.user_id)?;
    ensure_same("party_id", &draft.party_id, &reads.party.id)?;
    let reason = validate_reason(&draft.reason)?;

    let mut ledger = StockLedger::new(reads.products.iter().cloned());
    let (warehouse_id, items, amount) = match draft.note_type {
        CreditNoteType::Financial => {
            if !draft.items.is_empty() || draft.warehouse_id.is_some() {
                return Err(CoreError::invalid(
                    "items",
                    "financial credit notes carry no goods",
                ));
            }
            let cents = draft.amount_cents.unwrap_or(0);
            validate_amount_cents("amount", cents)?;
            (None, Vec::new(), Money::from_cents(cents))
        }
        CreditNoteType::Return => {
            let warehouse = reads
                .warehouse
                .as_ref()
                .ok_or_else(|| CoreError::invalid("warehouse_id", "returns need a warehouse"))?;
            ensure_same(
                "warehouse_id",
                draft.warehouse_id.as_deref().unwrap_or_default(),
                &warehouse.id,
            )?;
            let kind = match reads.party.kind {
                PartyKind::Customer => DocumentKind::Sale,
                PartyKind::Supplier => DocumentKind::Purchase,
            };
            let items = build_items(kind, &draft.items, &ledger)?;
            validate_line_items(&items)?;
            for item in &items {
                ledger.adjust(&item.product_id, &warehouse.id, item.quantity)?;
            }
            let cents = draft
                .amount_cents
                .unwrap_or_else(|| items.iter().map(|i| i.subtotal_cents).sum());
            validate_amount_cents("amount", cents)?;
            (Some(warehouse.id.clone()), items, Money::from_cents(cents))
        }
    };

    let note_id = Uuid::new_v4().to_string();
    let mut deposit = new_payment(
        ctx,
        &Uuid::new_v4().to_string(),
        &reads.party.id,
        Obligation::CreditBalance,
        amount,
        &PaymentTerms {
            method: PaymentMethod::CreditNote,
            date: ctx.now,
            note: Some(reason.clone()),
        },
    );
    deposit.credit_note_id = Some(note_id.clone());

    let credit_note = CreditNote {
        id: note_id,
        reference: reference_number(&settings.credit_note_prefix, ctx.now, reads.sequence),
        party_id: reads.party.id.clone(),
        note_type: draft.note_type,
        warehouse_id,
        items,
        amount_cents: amount.cents(),
        reason,
        payment_id: deposit.id.clone(),
        created_by: ctx.user_id.clone(),
        created_at: ctx.now,
    };

    let mut party = reads.party.clone();
    party.deposit_credit(amount)?;

    let mut changes = ChangeSet::new();
    guard_products(&mut changes, &reads.products);
    changes.extend(ledger.writes());
    let (party, write) = party_write(ctx, &reads.party, party);
    changes.push(write);
    changes.push(Write::InsertPayment(deposit.clone()));
    changes.push(Write::InsertCreditNote(credit_note.clone()));

    Ok(Plan::new(
        changes,
        IssuedCreditNote {
            credit_note,
            deposit,
            party,
        },
    ))
}

// =============================================================================
// Unit Tests
// =============================================================================
