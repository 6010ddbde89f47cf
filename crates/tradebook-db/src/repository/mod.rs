//! # Repository Module
//!
//! Read access per record type, plus the create/edit calls that never touch
//! stock or balances. Every ledger write goes through
//! [`crate::commit::commit`] instead.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Repository Pattern                                │
//! │                                                                         │
//! │  TransactionCoordinator (read phase)     Reporting callers              │
//! │       │                                        │                        │
//! │       ▼                                        ▼                        │
//! │  ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐         │
//! │  │ProductRepository │ │ PartyRepository  │ │DocumentRepository│  ...    │
//! │  │ ──────────────── │ │ ──────────────── │ │ ──────────────── │         │
//! │  │ get_by_id        │ │ get_by_id        │ │ get_by_id        │         │
//! │  │ get_many         │ │ list             │ │ open_for_party   │         │
//! │  │ low_stock        │ │ create / edit    │ │ next_sequence    │         │
//! │  └────────┬─────────┘ └────────┬─────────┘ └────────┬─────────┘         │
//! │           └────────────────────┼────────────────────┘                   │
//! │                                ▼                                        │
//! │                      SQLite Database (sqlx)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every record comes back with the `version` it had when read; that is the
//! version the coordinator later guards on.

pub mod credit_note;
pub mod document;
pub mod party;
pub mod payment;
pub mod product;
pub mod warehouse;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tradebook_core::settings::reference_stem;

/// Next free reference sequence for `prefix` on `date` in `table`.
///
/// Takes the highest existing suffix rather than counting rows, so a
/// deleted document never frees a number that is still in use. Two writers
/// reading the same value collide on the UNIQUE reference at commit and one
/// of them retries.
pub(crate) async fn next_sequence(
    pool: &SqlitePool,
    table: &'static str,
    prefix: &str,
    date: DateTime<Utc>,
) -> DbResult<u32> {
    let stem = reference_stem(prefix, date);
    let sql = format!(
        "SELECT COALESCE(MAX(CAST(substr(reference, ?1) AS INTEGER)), 0) \
         FROM {} WHERE reference LIKE ?2",
        table
    );

    let highest: i64 = sqlx::query_scalar(&sql)
        .bind(stem.len() as i64 + 1)
        .bind(format!("{}%", stem))
        .fetch_one(pool)
        .await?;

    debug!(table, stem = %stem, highest, "Resolved reference sequence");
    Ok(u32::try_from(highest).unwrap_or(0).saturating_add(1))
}
