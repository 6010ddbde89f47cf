//! # tradebook-core: Pure Ledger Logic for Tradebook
//!
//! This crate is the **heart** of Tradebook. It keeps stock quantities,
//! trade-document payment status, party balances and credit balances
//! consistent with each other, as pure functions over already-read records.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tradebook Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Callers (UI handlers, reporting, seed tools)         │   │
//! │  │   save sale ─► record payment ─► credit note ─► delete payment  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          tradebook-db: TransactionCoordinator                   │   │
//! │  │      read phase ─► plan (this crate) ─► versioned commit        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tradebook-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │   stock   │  │ document  │  │ allocation │  │  payment  │  │   │
//! │  │   │StockLedger│  │ state     │  │ DebtAlloc. │  │ reversal  │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records (Product, Party, TradeDocument, PaymentRecord, ...)
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//! - [`stock`] - StockLedger, the single place stock changes
//! - [`document`] - TradeDocument totals, payment status, stock transitions
//! - [`balance`] - Party balances and credit balance movements
//! - [`allocation`] - Debt ordering and payment allocation
//! - [`payment`] - Payment records and reversal
//! - [`settings`] - Creation-time settings (tax rate, reference prefixes)
//! - [`unit_of_work`] - Change sets handed to the record store
//! - [`operations`] - One planning function per coordinator operation
//!
//! ## Example Usage
//!
//! ```rust
//! use tradebook_core::money::Money;
//! use tradebook_core::types::PaymentStatus;
//!
//! let total = Money::from_cents(75_000);
//! let paid = Money::from_cents(30_000);
//! assert_eq!(PaymentStatus::derive(paid, total), PaymentStatus::Partial);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod balance;
pub mod document;
pub mod error;
pub mod money;
pub mod operations;
pub mod payment;
pub mod settings;
pub mod stock;
pub mod types;
pub mod unit_of_work;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use settings::LedgerSettings;
pub use types::*;
pub use unit_of_work::{ChangeSet, OperationContext, Plan, Write};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Allocation stops once the unallocated remainder is at or below this
/// amount (0.1 currency unit).
pub const ALLOCATION_EPSILON: Money = Money::from_cents(10);

/// Maximum number of line items on a single trade document or credit note.
pub const MAX_DOCUMENT_LINES: usize = 500;

/// Maximum quantity on a single line item.
pub const MAX_LINE_QUANTITY: i64 = 1_000_000;

/// Maximum single amount accepted from a caller (10,000,000.00): prices,
/// costs, shipping, payments, credit notes and opening balances.
///
/// A full document at this price, `MAX_LINE_QUANTITY` and
/// `MAX_DOCUMENT_LINES`, taxed at 100%, still fits in an `i64`.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000;
