//! # tradebook-db: Record Store and Transaction Coordinator
//!
//! This crate persists the ledger in SQLite (via sqlx) and runs every
//! ledger mutation as an atomic, optimistically-concurrent operation.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tradebook Data Flow                              │
//! │                                                                         │
//! │  Caller (record sale, allocate payment, reverse payment, ...)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   tradebook-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐   │   │
//! │  │   │  Coordinator  │  │ Repositories  │  │  commit          │   │   │
//! │  │   │ (retry loop)  │─►│ (read phase)  │  │ (versioned tx)   │   │   │
//! │  │   │               │──┼───────────────┼─►│                  │   │   │
//! │  │   └───────┬───────┘  └───────────────┘  └──────────────────┘   │   │
//! │  │           │ plan_*                                              │   │
//! │  │           ▼                                                     │   │
//! │  │   tradebook-core (pure ledger rules)                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`config`] - Engine configuration (engine.toml + environment)
//! - [`repository`] - Reads and catalogue create/edit per record type
//! - [`commit`] - Applies a change set in one versioned transaction
//! - [`coordinator`] - Read → plan → commit with retry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tradebook_db::{Database, EngineConfig, TransactionCoordinator};
//!
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let ledger = TransactionCoordinator::from_config(db, &config);
//!
//! let recorded = ledger.record_sale("cashier-1", request).await?;
//! let balance = ledger.party_balance_or_default(&recorded.party.id).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod commit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DatabaseSettings, EngineConfig, RetrySettings};
pub use coordinator::TransactionCoordinator;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::credit_note::CreditNoteRepository;
pub use repository::document::DocumentRepository;
pub use repository::party::{NewParty, PartyEdit, PartyRepository};
pub use repository::payment::PaymentRepository;
pub use repository::product::{LowStockItem, NewProduct, ProductEdit, ProductRepository};
pub use repository::warehouse::WarehouseRepository;
