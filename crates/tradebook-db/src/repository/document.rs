//! # Trade Document Repository
//!
//! Reads for sales and purchases. Line items are stored as a JSON array in
//! `trade_documents.items`; a document and its lines are always read and
//! written together, so they share one row and one version.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::next_sequence;
use tradebook_core::{
    DocumentKind, FulfilmentStatus, LineItem, PaymentStatus, TradeDocument,
};

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    kind: DocumentKind,
    reference: String,
    date: DateTime<Utc>,
    party_id: String,
    warehouse_id: String,
    items: String,
    tax_rate_bps: i64,
    shipping_cents: i64,
    grand_total_cents: i64,
    paid_amount_cents: i64,
    payment_status: PaymentStatus,
    fulfilment_status: FulfilmentStatus,
    notes: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<DocumentRow> for TradeDocument {
    type Error = DbError;

    fn try_from(row: DocumentRow) -> DbResult<Self> {
        let items: Vec<LineItem> = serde_json::from_str(&row.items)?;
        let tax_rate_bps = u32::try_from(row.tax_rate_bps)
            .map_err(|_| DbError::Internal(format!("bad tax rate on {}", row.id)))?;

        Ok(TradeDocument {
            id: row.id,
            kind: row.kind,
            reference: row.reference,
            date: row.date,
            party_id: row.party_id,
            warehouse_id: row.warehouse_id,
            items,
            tax_rate_bps,
            shipping_cents: row.shipping_cents,
            grand_total_cents: row.grand_total_cents,
            paid_amount_cents: row.paid_amount_cents,
            payment_status: row.payment_status,
            fulfilment_status: row.fulfilment_status,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, kind, reference, date, party_id, warehouse_id, items, \
     tax_rate_bps, shipping_cents, grand_total_cents, paid_amount_cents, payment_status, \
     fulfilment_status, notes, created_by, created_at, updated_at, version";

fn convert(rows: Vec<DocumentRow>) -> DbResult<Vec<TradeDocument>> {
    rows.into_iter().map(TradeDocument::try_from).collect()
}

/// Repository for trade documents.
///
/// ## Usage
/// ```rust,ignore
/// let open = db.documents().open_for_party(&customer_id).await?;
/// let seq = db.documents().next_sequence("SAL", Utc::now()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DocumentRepository { pool }
    }

    /// Gets a document by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(TradeDocument))` - Document found
    /// * `Ok(None)` - Document not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<TradeDocument>> {
        let sql = format!("SELECT {} FROM trade_documents WHERE id = ?1", DOCUMENT_COLUMNS);
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TradeDocument::try_from).transpose()
    }

    /// Documents of a party with an amount still due, oldest first.
    pub async fn open_for_party(&self, party_id: &str) -> DbResult<Vec<TradeDocument>> {
        let sql = format!(
            "SELECT {} FROM trade_documents \
             WHERE party_id = ?1 AND paid_amount_cents < grand_total_cents \
             ORDER BY date, reference",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(party_id)
            .fetch_all(&self.pool)
            .await?;

        debug!(party_id = %party_id, count = rows.len(), "Loaded open documents");
        convert(rows)
    }

    /// Every document of a party, newest first.
    pub async fn list_for_party(&self, party_id: &str) -> DbResult<Vec<TradeDocument>> {
        let sql = format!(
            "SELECT {} FROM trade_documents WHERE party_id = ?1 \
             ORDER BY date DESC, reference DESC",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(party_id)
            .fetch_all(&self.pool)
            .await?;

        convert(rows)
    }

    /// Next reference sequence for `prefix` on `date`'s day.
    pub async fn next_sequence(&self, prefix: &str, date: DateTime<Utc>) -> DbResult<u32> {
        next_sequence(&self.pool, "trade_documents", prefix, date).await
    }
}
