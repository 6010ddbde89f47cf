//! # Unit of Work
//!
//! What a planning function hands to the record store: every record it read
//! (with the version it saw) and every write it wants, as one [`ChangeSet`].
//!
//! ## Lifecycle of an Operation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   1. READ       coordinator loads records, capturing `version`          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   2. PLAN       operations::plan_*(reads) ─► Plan { changes, output }   │
//! │        │        (pure, deterministic, no I/O)                           │
//! │        ▼                                                                │
//! │   3. COMMIT     one transaction:                                        │
//! │                   guards:  UPDATE .. SET version = version              │
//! │                            WHERE id = ? AND version = ?                 │
//! │                   writes:  UPDATE .. SET .., version = version + 1      │
//! │                            WHERE id = ? AND version = ?                 │
//! │                 any 0-row result ─► Conflict ─► rollback ─► back to 1   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are applied in the order they were pushed; planning functions push
//! parents before children (documents before their payments, payments
//! before the credit notes that reference them).

use chrono::{DateTime, Utc};

use crate::types::{CreditNote, DeletedPaymentAudit, Party, PaymentRecord, Product, TradeDocument};

// =============================================================================
// Operation Context
// =============================================================================

/// Who is acting and when. Captured once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub user_id: String,
    pub now: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        OperationContext {
            user_id: user_id.into(),
            now: Utc::now(),
        }
    }

    /// Fixed clock, for deterministic plans.
    pub fn at(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        OperationContext {
            user_id: user_id.into(),
            now,
        }
    }
}

// =============================================================================
// Guards and Writes
// =============================================================================

/// A record that was read and must still be at `version` when committing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Product { id: String, version: i64 },
    Party { id: String, version: i64 },
    Document { id: String, version: i64 },
}

/// New state of one (product, warehouse) stock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockWrite {
    pub product_id: String,
    pub warehouse_id: String,
    pub quantity: i64,
    /// `None` when no row existed at read time; the store inserts one.
    pub expected_version: Option<i64>,
}

/// A single record mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Stock(StockWrite),
    InsertDocument(TradeDocument),
    /// `document.version` already holds `expected_version + 1`.
    UpdateDocument {
        document: TradeDocument,
        expected_version: i64,
    },
    DeleteDocument {
        id: String,
        expected_version: i64,
    },
    /// `party.version` already holds `expected_version + 1`.
    UpdateParty {
        party: Party,
        expected_version: i64,
    },
    InsertPayment(PaymentRecord),
    /// Payments are immutable, so a missing row is the only conflict.
    DeletePayment {
        id: String,
    },
    InsertCreditNote(CreditNote),
    InsertAudit(DeletedPaymentAudit),
}

impl Write {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Write::Stock(_) => "stock",
            Write::InsertDocument(_) => "insert_document",
            Write::UpdateDocument { .. } => "update_document",
            Write::DeleteDocument { .. } => "delete_document",
            Write::UpdateParty { .. } => "update_party",
            Write::InsertPayment(_) => "insert_payment",
            Write::DeletePayment { .. } => "delete_payment",
            Write::InsertCreditNote(_) => "insert_credit_note",
            Write::InsertAudit(_) => "insert_audit",
        }
    }

    fn covers(&self, guard: &Guard) -> bool {
        match (self, guard) {
            (Write::UpdateParty { party, .. }, Guard::Party { id, .. }) => &party.id == id,
            (Write::UpdateDocument { document, .. }, Guard::Document { id, .. }) => {
                &document.id == id
            }
            (Write::DeleteDocument { id: written, .. }, Guard::Document { id, .. }) => {
                written == id
            }
            _ => false,
        }
    }
}

// =============================================================================
// ChangeSet
// =============================================================================

/// Everything one operation commits, atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    guards: Vec<Guard>,
    writes: Vec<Write>,
}

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet::default()
    }

    pub fn guard_product(&mut self, product: &Product) {
        self.add_guard(Guard::Product {
            id: product.id.clone(),
            version: product.version,
        });
    }

    pub fn guard_party(&mut self, party: &Party) {
        self.add_guard(Guard::Party {
            id: party.id.clone(),
            version: party.version,
        });
    }

    pub fn guard_document(&mut self, document: &TradeDocument) {
        self.add_guard(Guard::Document {
            id: document.id.clone(),
            version: document.version,
        });
    }

    fn add_guard(&mut self, guard: Guard) {
        if !self.guards.contains(&guard) {
            self.guards.push(guard);
        }
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn extend(&mut self, writes: impl IntoIterator<Item = Write>) {
        self.writes.extend(writes);
    }

    /// Guards for records that are read but not written. A written record is
    /// already checked by its own versioned write.
    pub fn guards(&self) -> Vec<&Guard> {
        self.guards
            .iter()
            .filter(|guard| !self.writes.iter().any(|write| write.covers(guard)))
            .collect()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

// =============================================================================
// Plan
// =============================================================================

/// Result of a planning function: the change set plus what the operation
/// returns to its caller once committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan<T> {
    pub changes: ChangeSet,
    pub output: T,
}

impl<T> Plan<T> {
    pub fn new(changes: ChangeSet, output: T) -> Self {
        Plan { changes, output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartyKind;

    fn party(version: i64) -> Party {
        let now = Utc::now();
        Party {
            id: "c1".to_string(),
            kind: PartyKind::Customer,
            name: "Walk-in".to_string(),
            opening_balance_cents: 0,
            opening_balance_date: now,
            credit_balance_cents: 0,
            credit_limited: false,
            credit_limit_cents: None,
            created_at: now,
            updated_at: now,
            version,
        }
    }

    #[test]
    fn test_written_records_drop_their_guard() {
        let read = party(3);
        let mut changes = ChangeSet::new();
        changes.guard_party(&read);
        assert_eq!(changes.guards().len(), 1);

        let mut updated = read.clone();
        updated.version = 4;
        changes.push(Write::UpdateParty {
            party: updated,
            expected_version: 3,
        });
        assert!(changes.guards().is_empty());
    }

    #[test]
    fn test_duplicate_guards_are_collapsed() {
        let read = party(1);
        let mut changes = ChangeSet::new();
        changes.guard_party(&read);
        changes.guard_party(&read);
        assert_eq!(changes.guards().len(), 1);
        assert!(changes.is_empty());
    }
}
