//! # Database Error Types
//!
//! Error types for the record store and the transaction coordinator.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          CoreError (plan rejected)          │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  DbError (this module) ◄──────────────────┘                             │
//! │       │                                                                 │
//! │       ├── Conflict           → coordinator retries from the read phase  │
//! │       ├── ConcurrencyExhausted → retries used up, caller sees this      │
//! │       └── everything else    → returned as-is, nothing was written      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use tradebook_core::{CoreError, ValidationError};

/// Database and coordination errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_optional` returns no rows during a read phase
    /// - A payment was reversed by someone else before this reversal read it
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation outside a coordinated commit.
    ///
    /// ## When This Occurs
    /// - Creating a product with a SKU already in use
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A record changed between the read phase and the commit.
    ///
    /// ## When This Occurs
    /// - A versioned UPDATE or guard matched zero rows
    /// - A payment being deleted is already gone
    /// - A reference number or stock row was inserted concurrently
    /// - SQLite reported the database busy or locked
    ///
    /// The coordinator retries on this variant; callers only see it from
    /// direct commit calls.
    #[error("Concurrent modification of {record}")]
    Conflict { record: String },

    /// The coordinator gave up after repeated conflicts.
    #[error("{operation} gave up after {attempts} attempts due to concurrent modifications")]
    ConcurrencyExhausted { operation: String, attempts: u32 },

    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(CoreError),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Invalid or unreadable engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed to begin or commit.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(record: impl Into<String>) -> Self {
        DbError::Conflict {
            record: record.into(),
        }
    }

    /// True for errors the coordinator answers with a fresh attempt.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict { .. })
    }

    /// The ledger error, if the plan was rejected.
    pub fn ledger(&self) -> Option<&CoreError> {
        match self {
            DbError::Ledger(err) => Some(err),
            _ => None,
        }
    }
}

/// Ledger NotFound errors surface as [`DbError::NotFound`] so callers have
/// one variant to match on.
impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => DbError::NotFound { entity, id },
            other => DbError::Ledger(other),
        }
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Ledger(CoreError::Validation(err))
    }
}

/// SQLite result codes that mean "another writer got there first".
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → busy/locked → Conflict,
///                               otherwise analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let busy = db_err
                    .code()
                    .map(|code| BUSY_CODES.contains(&code.as_ref()))
                    .unwrap_or(false)
                    || msg.contains("database is locked")
                    || msg.contains("database table is locked");

                if busy {
                    DbError::Conflict {
                        record: "database (busy)".to_string(),
                    }
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
