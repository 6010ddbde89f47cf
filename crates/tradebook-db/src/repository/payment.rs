//! # Payment Repository
//!
//! Payment history and the deleted-payment audit trail.
//!
//! ## Tables
//! ```text
//! payments           append-only; a row disappears only through reversal
//!      │             rows of one incoming payment share a receipt_id
//!      │
//!      │ reverse_payment (whole receipt, same transaction)
//!      ▼
//! deleted_payments   one row per receipt; UPDATE and DELETE are rejected
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tradebook_core::{
    DeletedPaymentAudit, Money, ObligationKind, PaymentMethod, PaymentRecord,
};

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    party_id: String,
    obligation_kind: ObligationKind,
    document_id: Option<String>,
    receipt_id: String,
    credit_note_id: Option<String>,
    date: DateTime<Utc>,
    amount_cents: i64,
    method: PaymentMethod,
    note: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for PaymentRecord {
    fn from(row: PaymentRow) -> Self {
        PaymentRecord {
            id: row.id,
            party_id: row.party_id,
            obligation_kind: row.obligation_kind,
            document_id: row.document_id,
            receipt_id: row.receipt_id,
            credit_note_id: row.credit_note_id,
            date: row.date,
            amount_cents: row.amount_cents,
            method: row.method,
            note: row.note,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: String,
    receipt_id: String,
    party_id: String,
    records: String,
    deleted_at: DateTime<Utc>,
    deleted_by: String,
    reason: String,
}

impl AuditRow {
    fn into_audit(self) -> DbResult<DeletedPaymentAudit> {
        Ok(DeletedPaymentAudit {
            id: self.id,
            receipt_id: self.receipt_id,
            party_id: self.party_id,
            records: serde_json::from_str(&self.records)?,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
            reason: self.reason,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, party_id, obligation_kind, document_id, receipt_id, \
     credit_note_id, date, amount_cents, method, note, created_by, created_at";

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Gets a live payment. A reversed payment is `None`.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PaymentRecord>> {
        let sql = format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(PaymentRecord::from))
    }

    /// Every live record of one incoming payment, in allocation order.
    pub async fn list_for_receipt(&self, receipt_id: &str) -> DbResult<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE receipt_id = ?1 ORDER BY rowid",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(receipt_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PaymentRecord::from).collect())
    }

    /// Payments settling one document, in the order they were made.
    pub async fn list_for_document(&self, document_id: &str) -> DbResult<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE document_id = ?1 ORDER BY date, created_at",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PaymentRecord::from).collect())
    }

    /// Every live payment of a party, newest first.
    pub async fn list_for_party(&self, party_id: &str) -> DbResult<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE party_id = ?1 ORDER BY date DESC, created_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(party_id)
            .fetch_all(&self.pool)
            .await?;

        debug!(party_id = %party_id, count = rows.len(), "Loaded party payments");
        Ok(rows.into_iter().map(PaymentRecord::from).collect())
    }

    /// Total paid against the party's opening balance.
    pub async fn opening_paid(&self, party_id: &str) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0)
            FROM payments
            WHERE party_id = ?1 AND obligation_kind = 'opening_balance'
            "#,
        )
        .bind(party_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_cents(cents))
    }

    /// Number of live payments against a document.
    pub async fn count_for_document(&self, document_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE document_id = ?1")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Reversal audits of a party, newest first.
    pub async fn audits_for_party(&self, party_id: &str) -> DbResult<Vec<DeletedPaymentAudit>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, receipt_id, party_id, records, deleted_at, deleted_by, reason
            FROM deleted_payments
            WHERE party_id = ?1
            ORDER BY deleted_at DESC
            "#,
        )
        .bind(party_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::into_audit).collect()
    }

    /// Most recent reversal audits across all parties.
    pub async fn list_audits(&self, limit: u32) -> DbResult<Vec<DeletedPaymentAudit>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, receipt_id, party_id, records, deleted_at, deleted_by, reason
            FROM deleted_payments
            ORDER BY deleted_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::into_audit).collect()
    }
}
