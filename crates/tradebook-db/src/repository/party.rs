//! # Party Repository
//!
//! Customers and suppliers. Create and edit calls here cover identity and
//! credit-limit settings only; `credit_balance_cents` is written exclusively
//! by committed ledger operations and the opening balance is fixed at
//! creation.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tradebook_core::validation::{validate_name, validate_non_negative_cents};
use tradebook_core::{CoreError, Party, PartyKind};

/// Fields for a new customer or supplier.
#[derive(Debug, Clone)]
pub struct NewParty {
    pub kind: PartyKind,
    pub name: String,
    pub opening_balance_cents: i64,
    /// Defaults to the creation time.
    pub opening_balance_date: Option<DateTime<Utc>>,
    /// Customers only. `Some` turns the limit on.
    pub credit_limit_cents: Option<i64>,
}

/// Identity and credit-limit edit.
#[derive(Debug, Clone, Default)]
pub struct PartyEdit {
    pub name: Option<String>,
    /// `Some(None)` removes the limit, `Some(Some(n))` sets it.
    pub credit_limit_cents: Option<Option<i64>>,
}

#[derive(Debug, sqlx::FromRow)]
struct PartyRow {
    id: String,
    kind: PartyKind,
    name: String,
    opening_balance_cents: i64,
    opening_balance_date: DateTime<Utc>,
    credit_balance_cents: i64,
    credit_limited: bool,
    credit_limit_cents: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<PartyRow> for Party {
    fn from(row: PartyRow) -> Self {
        Party {
            id: row.id,
            kind: row.kind,
            name: row.name,
            opening_balance_cents: row.opening_balance_cents,
            opening_balance_date: row.opening_balance_date,
            credit_balance_cents: row.credit_balance_cents,
            credit_limited: row.credit_limited,
            credit_limit_cents: row.credit_limit_cents,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

const PARTY_COLUMNS: &str = "id, kind, name, opening_balance_cents, opening_balance_date, \
     credit_balance_cents, credit_limited, credit_limit_cents, created_at, updated_at, version";

fn check_credit_limit(kind: PartyKind, limit: Option<i64>) -> DbResult<()> {
    if let Some(cents) = limit {
        if kind == PartyKind::Supplier {
            return Err(CoreError::invalid("credit_limit", "only customers carry a credit limit").into());
        }
        validate_non_negative_cents("credit_limit", cents)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PartyRepository {
    pool: SqlitePool,
}

impl PartyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PartyRepository { pool }
    }

    /// Inserts a new party with a zero credit balance.
    pub async fn create(&self, input: NewParty) -> DbResult<Party> {
        validate_name("name", &input.name)?;
        validate_non_negative_cents("opening_balance", input.opening_balance_cents)?;
        check_credit_limit(input.kind, input.credit_limit_cents)?;

        let now = Utc::now();
        let party = Party {
            id: Uuid::new_v4().to_string(),
            kind: input.kind,
            name: input.name.trim().to_string(),
            opening_balance_cents: input.opening_balance_cents,
            opening_balance_date: input.opening_balance_date.unwrap_or(now),
            credit_balance_cents: 0,
            credit_limited: input.credit_limit_cents.is_some(),
            credit_limit_cents: input.credit_limit_cents,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        sqlx::query(
            r#"
            INSERT INTO parties (
                id, kind, name, opening_balance_cents, opening_balance_date,
                credit_balance_cents, credit_limited, credit_limit_cents,
                created_at, updated_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&party.id)
        .bind(party.kind)
        .bind(&party.name)
        .bind(party.opening_balance_cents)
        .bind(party.opening_balance_date)
        .bind(party.credit_balance_cents)
        .bind(party.credit_limited)
        .bind(party.credit_limit_cents)
        .bind(party.created_at)
        .bind(party.updated_at)
        .bind(party.version)
        .execute(&self.pool)
        .await?;

        info!(
            id = %party.id,
            kind = party.kind.as_str(),
            opening_balance = party.opening_balance_cents,
            "Party created"
        );
        Ok(party)
    }

    /// Edits name and credit limit, guarded by the version the caller read.
    pub async fn update(&self, id: &str, edit: PartyEdit, expected_version: i64) -> DbResult<Party> {
        let mut party = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Party", id))?;
        if party.version != expected_version {
            return Err(DbError::conflict(format!("party {}", id)));
        }

        if let Some(name) = &edit.name {
            validate_name("name", name)?;
            party.name = name.trim().to_string();
        }
        if let Some(limit) = edit.credit_limit_cents {
            check_credit_limit(party.kind, limit)?;
            party.credit_limited = limit.is_some();
            party.credit_limit_cents = limit;
        }
        party.updated_at = Utc::now();
        party.version = expected_version + 1;

        let result = sqlx::query(
            r#"
            UPDATE parties SET
                name = ?1,
                credit_limited = ?2,
                credit_limit_cents = ?3,
                updated_at = ?4,
                version = ?5
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(&party.name)
        .bind(party.credit_limited)
        .bind(party.credit_limit_cents)
        .bind(party.updated_at)
        .bind(party.version)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!("party {}", id)));
        }

        debug!(id = %id, version = party.version, "Party updated");
        Ok(party)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Party>> {
        let sql = format!("SELECT {} FROM parties WHERE id = ?1", PARTY_COLUMNS);
        let row = sqlx::query_as::<_, PartyRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Party::from))
    }

    /// Lists parties by name, optionally of one kind.
    pub async fn list(&self, kind: Option<PartyKind>) -> DbResult<Vec<Party>> {
        let rows = match kind {
            Some(kind) => {
                let sql = format!(
                    "SELECT {} FROM parties WHERE kind = ?1 ORDER BY name",
                    PARTY_COLUMNS
                );
                sqlx::query_as::<_, PartyRow>(&sql)
                    .bind(kind)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {} FROM parties ORDER BY name", PARTY_COLUMNS);
                sqlx::query_as::<_, PartyRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(Party::from).collect())
    }
}
