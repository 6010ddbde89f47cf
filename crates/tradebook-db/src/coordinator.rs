//! # Transaction Coordinator
//!
//! Every ledger mutation runs here as read → plan → commit, retried as a
//! whole when the commit finds that something it read has changed.
//!
//! ## Operation Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   attempt = 1                                                           │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │   READ     repositories, each record with its version                   │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │   PLAN     tradebook_core::operations::plan_*   ── Err ──► return Err   │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │   COMMIT   commit::commit (one transaction)     ── Ok ───► return Ok    │
//! │     │                                                                   │
//! │     │ Conflict                                                          │
//! │     ▼                                                                   │
//! │   attempts left and deadline not passed?                                │
//! │     ├── yes: sleep(next backoff), attempt += 1, back to READ            │
//! │     └── no:  ConcurrencyExhausted                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The deadline is only consulted before a read phase; a commit that has
//! started always runs to completion or rollback.
//!
//! ## Example
//! ```rust,ignore
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let ledger = TransactionCoordinator::from_config(db, &config);
//!
//! let sale = ledger.record_sale("cashier-1", request).await?;
//! let outcome = ledger.allocate_payment("cashier-1", payment).await?;
//! ```

use std::future::Future;
use std::time::Instant;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, info, warn};

use crate::commit::commit;
use crate::config::{EngineConfig, RetrySettings};
use crate::error::{DbError, DbResult};
use crate::pool::Database;
use tradebook_core::balance::PartyBalance;
use tradebook_core::document::DocumentEdit;
use tradebook_core::operations::{
    plan_adjust_stock, plan_allocate_payment, plan_create_credit_note, plan_delete_document,
    plan_record_document, plan_reverse_payment, plan_transfer_stock, plan_update_document,
    product_ids, AllocationOutcome, AllocationReads, CreditNoteDraft, CreditNoteReads,
    DeleteDocumentReads, IssuedCreditNote, PaymentRequest, RecordDocumentReads,
    RecordDocumentRequest, RecordedDocument, ReversalReads, StockAdjustment, StockReads,
    StockTransfer, TransferReads, UpdateDocumentReads,
};
use tradebook_core::{
    CoreError, DeletedPaymentAudit, DocumentKind, LedgerSettings, OperationContext, Party,
    Plan, Product, TradeDocument, Warehouse,
};

/// Runs ledger operations atomically against the record store.
///
/// Holds no state between operations besides configuration; clones share
/// the database pool.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    db: Database,
    settings: LedgerSettings,
    retry: RetrySettings,
}

impl TransactionCoordinator {
    pub fn new(db: Database, settings: LedgerSettings, retry: RetrySettings) -> Self {
        TransactionCoordinator {
            db,
            settings,
            retry,
        }
    }

    pub fn from_config(db: Database, config: &EngineConfig) -> Self {
        Self::new(db, config.ledger.clone(), config.retry.clone())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    // =========================================================================
    // Retry Loop
    // =========================================================================

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.retry.initial_backoff(),
            initial_interval: self.retry.initial_backoff(),
            max_interval: self.retry.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by attempts and our own deadline
            ..Default::default()
        }
    }

    /// Runs `attempt` until it commits, fails for a non-conflict reason, or
    /// the retry budget is spent.
    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let started = Instant::now();
        let mut backoff = self.create_backoff();
        let mut attempts: u32 = 0;

        loop {
            if attempts > 0 && started.elapsed() >= self.retry.deadline() {
                warn!(operation, attempts, "Retry deadline passed");
                break;
            }
            attempts += 1;

            match attempt().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(operation, attempts, "Committed after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_conflict() => {
                    if attempts >= self.retry.max_attempts {
                        break;
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.retry.max_backoff());
                    warn!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Commit conflicted, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }

        warn!(operation, attempts, "Giving up after repeated conflicts");
        Err(DbError::ConcurrencyExhausted {
            operation: operation.to_string(),
            attempts,
        })
    }

    async fn commit_plan<T>(&self, plan: Plan<T>) -> DbResult<T> {
        commit(self.db.pool(), &plan.changes).await?;
        Ok(plan.output)
    }

    // =========================================================================
    // Read Helpers
    // =========================================================================

    async fn party(&self, id: &str) -> DbResult<Party> {
        self.db
            .parties()
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Party", id))
    }

    async fn warehouse(&self, id: &str) -> DbResult<Warehouse> {
        self.db
            .warehouses()
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Warehouse", id))
    }

    async fn product(&self, id: &str) -> DbResult<Product> {
        self.db
            .products()
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    async fn document(&self, id: &str) -> DbResult<TradeDocument> {
        self.db
            .documents()
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Document", id))
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Records a sale: stock out (when completed), optional initial payment,
    /// credit-limit check.
    ///
    /// ## Errors
    /// * `Ledger(InsufficientStock)` - A completed sale line exceeds stock
    /// * `Ledger(CreditLimitExceeded)` - Over the ceiling without `confirmed()`
    /// * `NotFound` - Party, warehouse or product missing
    pub async fn record_sale(
        &self,
        user_id: &str,
        request: RecordDocumentRequest,
    ) -> DbResult<RecordedDocument> {
        self.record_document(DocumentKind::Sale, "record_sale", user_id, request)
            .await
    }

    /// Records a purchase. Purchases are received on creation, so their
    /// stock is added immediately.
    pub async fn record_purchase(
        &self,
        user_id: &str,
        request: RecordDocumentRequest,
    ) -> DbResult<RecordedDocument> {
        self.record_document(DocumentKind::Purchase, "record_purchase", user_id, request)
            .await
    }

    async fn record_document(
        &self,
        kind: DocumentKind,
        operation: &'static str,
        user_id: &str,
        request: RecordDocumentRequest,
    ) -> DbResult<RecordedDocument> {
        if request.draft.kind != kind {
            return Err(CoreError::invalid(
                "kind",
                format!("{} cannot record a {}", operation, request.draft.kind.as_str()),
            )
            .into());
        }

        let request = &request;
        let recorded = self
            .run(operation, move || self.try_record_document(user_id, request))
            .await?;

        if recorded.credit_check.is_overridden() {
            warn!(
                party_id = %recorded.party.id,
                reference = %recorded.document.reference,
                credit_check = ?recorded.credit_check,
                user_id,
                "Credit limit exceeded, override confirmed"
            );
        }
        info!(
            reference = %recorded.document.reference,
            total = recorded.document.grand_total_cents,
            paid = recorded.document.paid_amount_cents,
            payments = recorded.payments.len(),
            "Document recorded"
        );
        Ok(recorded)
    }

    async fn try_record_document(
        &self,
        user_id: &str,
        request: &RecordDocumentRequest,
    ) -> DbResult<RecordedDocument> {
        let ctx = OperationContext::new(user_id);
        let draft = &request.draft;

        let party = self.party(&draft.party_id).await?;
        let warehouse = self.warehouse(&draft.warehouse_id).await?;
        let products = self
            .db
            .products()
            .get_many(&product_ids(&draft.items))
            .await?;
        let open_documents = self.db.documents().open_for_party(&party.id).await?;
        let opening_paid = self.db.payments().opening_paid(&party.id).await?;
        let sequence = self
            .db
            .documents()
            .next_sequence(self.settings.document_prefix(draft.kind), ctx.now)
            .await?;
        debug!(party_id = %party.id, sequence, "Read phase complete");

        let reads = RecordDocumentReads {
            party,
            warehouse,
            products,
            open_documents,
            opening_paid,
            sequence,
        };
        let plan = plan_record_document(&ctx, &self.settings, reads, request.clone())?;
        self.commit_plan(plan).await
    }

    /// Edits a document, re-deriving totals and re-running its stock effect.
    pub async fn update_document(
        &self,
        user_id: &str,
        document_id: &str,
        edit: DocumentEdit,
    ) -> DbResult<TradeDocument> {
        let edit = &edit;
        let document = self
            .run("update_document", move || {
                self.try_update_document(user_id, document_id, edit)
            })
            .await?;

        info!(
            reference = %document.reference,
            version = document.version,
            total = document.grand_total_cents,
            "Document updated"
        );
        Ok(document)
    }

    async fn try_update_document(
        &self,
        user_id: &str,
        document_id: &str,
        edit: &DocumentEdit,
    ) -> DbResult<TradeDocument> {
        let ctx = OperationContext::new(user_id);

        let document = self.document(document_id).await?;
        let party = self.party(&document.party_id).await?;

        let mut ids: Vec<String> = document
            .items
            .iter()
            .map(|item| item.product_id.clone())
            .collect();
        if let Some(lines) = &edit.items {
            for id in product_ids(lines) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        let products = self.db.products().get_many(&ids).await?;
        let warehouse_id = edit
            .warehouse_id
            .clone()
            .unwrap_or_else(|| document.warehouse_id.clone());
        let warehouse = self.warehouse(&warehouse_id).await?;

        let reads = UpdateDocumentReads {
            document,
            party,
            products,
            warehouse,
        };
        let plan = plan_update_document(&ctx, reads, edit.clone())?;
        self.commit_plan(plan).await
    }

    /// Deletes a document, restoring its stock when it was completed.
    /// Payments against it must be reversed first.
    pub async fn delete_document(&self, user_id: &str, document_id: &str) -> DbResult<TradeDocument> {
        let document = self
            .run("delete_document", move || {
                self.try_delete_document(user_id, document_id)
            })
            .await?;

        info!(reference = %document.reference, user_id, "Document deleted");
        Ok(document)
    }

    async fn try_delete_document(&self, user_id: &str, document_id: &str) -> DbResult<TradeDocument> {
        let ctx = OperationContext::new(user_id);

        let document = self.document(document_id).await?;
        let party = self.party(&document.party_id).await?;
        let ids: Vec<String> = document
            .items
            .iter()
            .map(|item| item.product_id.clone())
            .collect();
        let products = self.db.products().get_many(&ids).await?;
        let payment_count = self.db.payments().count_for_document(&document.id).await?;

        let reads = DeleteDocumentReads {
            document,
            party,
            products,
            payment_count,
        };
        let plan = plan_delete_document(&ctx, reads)?;
        self.commit_plan(plan).await
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Allocates a payment across the party's open obligations; surplus is
    /// deposited as party credit.
    pub async fn allocate_payment(
        &self,
        user_id: &str,
        request: PaymentRequest,
    ) -> DbResult<AllocationOutcome> {
        let request = &request;
        let outcome = self
            .run("allocate_payment", move || {
                self.try_allocate_payment(user_id, request)
            })
            .await?;

        info!(
            party_id = %outcome.party.id,
            amount = request.payment.amount_cents,
            method = request.payment.method.as_str(),
            records = outcome.payments.len(),
            surplus = outcome.surplus.cents(),
            "Payment allocated"
        );
        Ok(outcome)
    }

    async fn try_allocate_payment(
        &self,
        user_id: &str,
        request: &PaymentRequest,
    ) -> DbResult<AllocationOutcome> {
        let ctx = OperationContext::new(user_id);

        let party = self.party(&request.party_id).await?;
        let mut documents = self.db.documents().open_for_party(&party.id).await?;
        if let Some(target) = &request.target_document_id {
            if !documents.iter().any(|doc| &doc.id == target) {
                if let Some(doc) = self.db.documents().get_by_id(target).await? {
                    documents.push(doc);
                }
            }
        }
        let opening_paid = self.db.payments().opening_paid(&party.id).await?;

        let reads = AllocationReads {
            party,
            documents,
            opening_paid,
        };
        let plan = plan_allocate_payment(&ctx, reads, request.clone())?;
        self.commit_plan(plan).await
    }

    /// Reverses a whole payment: deletes every record sharing the receipt of
    /// `payment_id`, undoes their effect on documents and the party's credit
    /// balance, and writes one audit row. All in one commit.
    ///
    /// ## Errors
    /// * `NotFound` - The payment does not exist (or was already reversed)
    /// * `Ledger(Validation)` - Empty reason, or a credit-note deposit
    /// * `Ledger(CreditInUse)` - A deposit being reversed was already spent
    pub async fn reverse_payment(
        &self,
        user_id: &str,
        payment_id: &str,
        reason: &str,
    ) -> DbResult<DeletedPaymentAudit> {
        let audit = self
            .run("reverse_payment", move || {
                self.try_reverse_payment(user_id, payment_id, reason)
            })
            .await?;

        info!(
            receipt_id = %audit.receipt_id,
            records = audit.records.len(),
            amount = audit.amount().cents(),
            deleted_by = %audit.deleted_by,
            reason = %audit.reason,
            "Payment reversed"
        );
        Ok(audit)
    }

    async fn try_reverse_payment(
        &self,
        user_id: &str,
        payment_id: &str,
        reason: &str,
    ) -> DbResult<DeletedPaymentAudit> {
        let ctx = OperationContext::new(user_id);

        let payment = self
            .db
            .payments()
            .get_by_id(payment_id)
            .await?
            .ok_or_else(|| DbError::not_found("Payment", payment_id))?;
        let records = self
            .db
            .payments()
            .list_for_receipt(&payment.receipt_id)
            .await?;
        let party = self.party(&payment.party_id).await?;

        let mut documents: Vec<TradeDocument> = Vec::new();
        for id in records.iter().filter_map(|r| r.document_id.as_deref()) {
            if !documents.iter().any(|doc| doc.id == id) {
                documents.push(self.document(id).await?);
            }
        }
        debug!(
            receipt_id = %payment.receipt_id,
            records = records.len(),
            documents = documents.len(),
            "Read phase complete"
        );

        let reads = ReversalReads {
            records,
            party,
            documents,
        };
        let plan = plan_reverse_payment(&ctx, reads, reason)?;
        self.commit_plan(plan).await
    }

    // =========================================================================
    // Stock
    // =========================================================================

    /// Manual stock adjustment by a signed delta. Services are no-ops.
    pub async fn adjust_stock(
        &self,
        user_id: &str,
        product_id: &str,
        warehouse_id: &str,
        delta: i64,
    ) -> DbResult<StockAdjustment> {
        let adjustment = self
            .run("adjust_stock", move || {
                self.try_adjust_stock(user_id, product_id, warehouse_id, delta)
            })
            .await?;

        info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            delta,
            quantity = ?adjustment.quantity,
            "Stock adjusted"
        );
        Ok(adjustment)
    }

    async fn try_adjust_stock(
        &self,
        user_id: &str,
        product_id: &str,
        warehouse_id: &str,
        delta: i64,
    ) -> DbResult<StockAdjustment> {
        let ctx = OperationContext::new(user_id);
        let reads = StockReads {
            product: self.product(product_id).await?,
            warehouse: self.warehouse(warehouse_id).await?,
        };
        let plan = plan_adjust_stock(&ctx, reads, delta)?;
        self.commit_plan(plan).await
    }

    /// Moves stock between two warehouses in one commit.
    pub async fn transfer_stock(
        &self,
        user_id: &str,
        product_id: &str,
        from_warehouse_id: &str,
        to_warehouse_id: &str,
        quantity: i64,
    ) -> DbResult<StockTransfer> {
        let transfer = self
            .run("transfer_stock", move || {
                self.try_transfer_stock(
                    user_id,
                    product_id,
                    from_warehouse_id,
                    to_warehouse_id,
                    quantity,
                )
            })
            .await?;

        info!(
            product_id = %product_id,
            from = %from_warehouse_id,
            to = %to_warehouse_id,
            quantity,
            "Stock transferred"
        );
        Ok(transfer)
    }

    async fn try_transfer_stock(
        &self,
        user_id: &str,
        product_id: &str,
        from_warehouse_id: &str,
        to_warehouse_id: &str,
        quantity: i64,
    ) -> DbResult<StockTransfer> {
        let ctx = OperationContext::new(user_id);
        let reads = TransferReads {
            product: self.product(product_id).await?,
            from: self.warehouse(from_warehouse_id).await?,
            to: self.warehouse(to_warehouse_id).await?,
        };
        let plan = plan_transfer_stock(&ctx, reads, quantity)?;
        self.commit_plan(plan).await
    }

    // =========================================================================
    // Credit Notes
    // =========================================================================

    /// Issues a credit note and deposits its amount into the party's credit
    /// balance. Return notes put their quantities back into stock.
    pub async fn create_credit_note(
        &self,
        user_id: &str,
        draft: CreditNoteDraft,
    ) -> DbResult<IssuedCreditNote> {
        let draft = &draft;
        let issued = self
            .run("create_credit_note", move || {
                self.try_create_credit_note(user_id, draft)
            })
            .await?;

        info!(
            reference = %issued.credit_note.reference,
            amount = issued.credit_note.amount_cents,
            credit_balance = issued.party.credit_balance_cents,
            "Credit note issued"
        );
        Ok(issued)
    }

    async fn try_create_credit_note(
        &self,
        user_id: &str,
        draft: &CreditNoteDraft,
    ) -> DbResult<IssuedCreditNote> {
        let ctx = OperationContext::new(user_id);

        let party = self.party(&draft.party_id).await?;
        let products = self
            .db
            .products()
            .get_many(&product_ids(&draft.items))
            .await?;
        let warehouse = match &draft.warehouse_id {
            Some(id) => Some(self.warehouse(id).await?),
            None => None,
        };
        let sequence = self
            .db
            .credit_notes()
            .next_sequence(&self.settings.credit_note_prefix, ctx.now)
            .await?;

        let reads = CreditNoteReads {
            party,
            products,
            warehouse,
            sequence,
        };
        let plan = plan_create_credit_note(&ctx, &self.settings, reads, draft.clone())?;
        self.commit_plan(plan).await
    }

    // =========================================================================
    // Balances (read-only)
    // =========================================================================

    /// Current balance summary of a party.
    pub async fn party_balance(&self, party_id: &str) -> DbResult<PartyBalance> {
        let party = self.party(party_id).await?;
        let documents = self.db.documents().open_for_party(party_id).await?;
        let opening_paid = self.db.payments().opening_paid(party_id).await?;
        Ok(PartyBalance::compute(&party, opening_paid, &documents))
    }

    /// Best-effort balance for display: any failure degrades to an all-zero
    /// summary and a warning.
    pub async fn party_balance_or_default(&self, party_id: &str) -> PartyBalance {
        match self.party_balance(party_id).await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(party_id = %party_id, error = %err, "Balance unavailable, showing zero");
                PartyBalance::empty(party_id)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{customer, database, widget};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tradebook_core::document::{DocumentDraft, LineInput};
    use tradebook_core::operations::PaymentInput;
    use tradebook_core::{FulfilmentStatus, Money, PaymentMethod, PaymentStatus};

    fn fast_retry(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            deadline_ms: 5_000,
        }
    }

    async fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(database().await, LedgerSettings::default(), fast_retry(3))
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let ledger = coordinator().await;
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: DbResult<()> = ledger
            .run("always_conflicts", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DbError::conflict("party p1"))
            })
            .await;

        match result {
            Err(DbError::ConcurrencyExhausted { operation, attempts }) => {
                assert_eq!(operation, "always_conflicts");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_retries_then_succeeds() {
        let ledger = coordinator().await;
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = ledger
            .run("flaky", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DbError::conflict("stock"))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_ledger_errors() {
        let ledger = coordinator().await;
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: DbResult<()> = ledger
            .run("rejected", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::invalid("amount", "nope").into())
            })
            .await;

        assert!(result.unwrap_err().ledger().is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_stops_retries() {
        let db = database().await;
        let retry = RetrySettings {
            max_attempts: 100,
            initial_backoff_ms: 20,
            max_backoff_ms: 20,
            deadline_ms: 30,
        };
        let ledger = TransactionCoordinator::new(db, LedgerSettings::default(), retry);

        let result: DbResult<()> = ledger
            .run("slow", || async { Err(DbError::conflict("party")) })
            .await;

        match result {
            Err(DbError::ConcurrencyExhausted { attempts, .. }) => assert!(attempts < 100),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_record_sale_rejects_purchase_draft() {
        let ledger = coordinator().await;
        let draft = DocumentDraft {
            kind: DocumentKind::Purchase,
            date: None,
            party_id: "p".to_string(),
            warehouse_id: "w".to_string(),
            items: vec![LineInput::new("x", 1)],
            shipping_cents: 0,
            fulfilment_status: FulfilmentStatus::Completed,
            notes: None,
        };
        let err = ledger
            .record_sale("u1", RecordDocumentRequest::new(draft))
            .await
            .unwrap_err();
        assert!(err.ledger().is_some());
    }

    #[tokio::test]
    async fn test_sale_with_payment_and_references() {
        let ledger = coordinator().await;
        let db = ledger.database().clone();
        let warehouse = db.warehouses().create("Main").await.unwrap();
        let product = db.products().create(widget("W-1")).await.unwrap();
        let party = db.parties().create(customer("Northwind")).await.unwrap();
        ledger
            .adjust_stock("u1", &product.id, &warehouse.id, 10)
            .await
            .unwrap();

        let draft = |qty| DocumentDraft {
            kind: DocumentKind::Sale,
            date: None,
            party_id: party.id.clone(),
            warehouse_id: warehouse.id.clone(),
            items: vec![LineInput::new(product.id.clone(), qty)],
            shipping_cents: 0,
            fulfilment_status: FulfilmentStatus::Completed,
            notes: None,
        };

        let first = ledger
            .record_sale(
                "u1",
                RecordDocumentRequest::new(draft(2))
                    .with_payment(PaymentInput::new(10_000, PaymentMethod::Cash)),
            )
            .await
            .unwrap();
        assert_eq!(first.document.payment_status, PaymentStatus::Partial);
        assert!(first.document.reference.ends_with("-0001"));

        let second = ledger
            .record_sale("u1", RecordDocumentRequest::new(draft(1)))
            .await
            .unwrap();
        assert!(second.document.reference.ends_with("-0002"));

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity_at(&warehouse.id), 7);

        let history = db.payments().list_for_document(&first.document.id).await.unwrap();
        assert_eq!(history.len(), 1);

        let balance = ledger.party_balance(&party.id).await.unwrap();
        assert_eq!(balance.outstanding, Money::from_cents(30_000 - 10_000 + 15_000));
    }

    #[tokio::test]
    async fn test_balance_or_default_degrades() {
        let ledger = coordinator().await;
        let balance = ledger.party_balance_or_default("missing").await;
        assert_eq!(balance, PartyBalance::empty("missing"));
    }

    #[tokio::test]
    async fn test_reversing_twice_is_not_found() {
        let ledger = coordinator().await;
        let db = ledger.database().clone();
        let party = db.parties().create(customer("Northwind")).await.unwrap();

        let outcome = ledger
            .allocate_payment(
                "u1",
                PaymentRequest {
                    party_id: party.id.clone(),
                    payment: PaymentInput::new(5_000, PaymentMethod::Cash),
                    target_document_id: None,
                },
            )
            .await
            .unwrap();
        let deposit = &outcome.payments[0];

        ledger
            .reverse_payment("u1", &deposit.id, "entered twice")
            .await
            .unwrap();
        let err = ledger
            .reverse_payment("u1", &deposit.id, "entered twice")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reversing_any_record_reverses_the_receipt() {
        let ledger = coordinator().await;
        let db = ledger.database().clone();
        let warehouse = db.warehouses().create("Main").await.unwrap();
        let product = db.products().create(widget("W-1")).await.unwrap();
        let party = db.parties().create(customer("Northwind")).await.unwrap();
        ledger
            .adjust_stock("u1", &product.id, &warehouse.id, 10)
            .await
            .unwrap();

        let draft = DocumentDraft {
            kind: DocumentKind::Sale,
            date: None,
            party_id: party.id.clone(),
            warehouse_id: warehouse.id.clone(),
            items: vec![LineInput::new(product.id.clone(), 1)],
            shipping_cents: 0,
            fulfilment_status: FulfilmentStatus::Completed,
            notes: None,
        };
        let sale = ledger
            .record_sale("u1", RecordDocumentRequest::new(draft))
            .await
            .unwrap()
            .document;

        // 150 due; 200 paid splits into the sale and a 50 deposit
        let outcome = ledger
            .allocate_payment(
                "u1",
                PaymentRequest {
                    party_id: party.id.clone(),
                    payment: PaymentInput::new(20_000, PaymentMethod::Cash),
                    target_document_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.payments.len(), 2);
        let deposit = outcome
            .payments
            .iter()
            .find(|p| p.document_id.is_none())
            .unwrap();

        let audit = ledger
            .reverse_payment("u1", &deposit.id, "wrong customer")
            .await
            .unwrap();
        assert_eq!(audit.records.len(), 2);
        assert_eq!(audit.amount(), Money::from_cents(20_000));

        assert!(db.payments().list_for_party(&party.id).await.unwrap().is_empty());
        let stored = db.documents().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.paid_amount_cents, 0);
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        let party = db.parties().get_by_id(&party.id).await.unwrap().unwrap();
        assert_eq!(party.credit_balance_cents, 0);
    }
}
