//! # Credit Note Repository
//!
//! Reads for issued credit notes. A note is written once, together with the
//! deposit payment it generates, and never changes afterwards.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;
use crate::repository::next_sequence;
use tradebook_core::{CreditNote, CreditNoteType};

#[derive(Debug, sqlx::FromRow)]
struct CreditNoteRow {
    id: String,
    reference: String,
    party_id: String,
    note_type: CreditNoteType,
    warehouse_id: Option<String>,
    items: String,
    amount_cents: i64,
    reason: String,
    payment_id: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl CreditNoteRow {
    fn into_note(self) -> DbResult<CreditNote> {
        Ok(CreditNote {
            id: self.id,
            reference: self.reference,
            party_id: self.party_id,
            note_type: self.note_type,
            warehouse_id: self.warehouse_id,
            items: serde_json::from_str(&self.items)?,
            amount_cents: self.amount_cents,
            reason: self.reason,
            payment_id: self.payment_id,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

const CREDIT_NOTE_COLUMNS: &str = "id, reference, party_id, note_type, warehouse_id, items, \
     amount_cents, reason, payment_id, created_by, created_at";

#[derive(Debug, Clone)]
pub struct CreditNoteRepository {
    pool: SqlitePool,
}

impl CreditNoteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CreditNoteRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CreditNote>> {
        let sql = format!("SELECT {} FROM credit_notes WHERE id = ?1", CREDIT_NOTE_COLUMNS);
        let row = sqlx::query_as::<_, CreditNoteRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CreditNoteRow::into_note).transpose()
    }

    /// Credit notes of a party, newest first.
    pub async fn list_for_party(&self, party_id: &str) -> DbResult<Vec<CreditNote>> {
        let sql = format!(
            "SELECT {} FROM credit_notes WHERE party_id = ?1 ORDER BY created_at DESC",
            CREDIT_NOTE_COLUMNS
        );
        let rows = sqlx::query_as::<_, CreditNoteRow>(&sql)
            .bind(party_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CreditNoteRow::into_note).collect()
    }

    pub async fn next_sequence(&self, prefix: &str, date: DateTime<Utc>) -> DbResult<u32> {
        next_sequence(&self.pool, "credit_notes", prefix, date).await
    }
}
