//! # Party Balances
//!
//! Computed balance of a customer or supplier and the only functions that
//! move a stored credit balance.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  opening remaining = opening balance - payments against it (>= 0)       │
//! │  documents due     = Σ (grand total - paid) over open documents         │
//! │  outstanding       = opening remaining + documents due                  │
//! │  net               = outstanding - credit balance                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The opening-balance remainder is never stored. It is recomputed from the
//! payment records on every read, so reversing an opening-balance payment
//! changes nothing but the payment table.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Party, TradeDocument};

// =============================================================================
// PartyBalance
// =============================================================================

/// Read-only balance summary for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PartyBalance {
    pub party_id: String,
    pub opening_balance: Money,
    pub opening_paid: Money,
    pub opening_remaining: Money,
    pub documents_due: Money,
    pub outstanding: Money,
    pub credit_balance: Money,
    /// Positive: the party owes us. Negative: we owe the party.
    pub net: Money,
}

impl PartyBalance {
    pub fn compute(party: &Party, opening_paid: Money, documents: &[TradeDocument]) -> Self {
        let opening_remaining = opening_remaining(party, opening_paid);
        let documents_due: Money = documents
            .iter()
            .filter(|doc| doc.party_id == party.id)
            .map(TradeDocument::amount_due)
            .sum();
        let outstanding = opening_remaining + documents_due;

        PartyBalance {
            party_id: party.id.clone(),
            opening_balance: party.opening_balance(),
            opening_paid,
            opening_remaining,
            documents_due,
            outstanding,
            credit_balance: party.credit_balance(),
            net: outstanding - party.credit_balance(),
        }
    }

    /// All-zero summary, used when a best-effort read fails.
    pub fn empty(party_id: impl Into<String>) -> Self {
        PartyBalance {
            party_id: party_id.into(),
            opening_balance: Money::zero(),
            opening_paid: Money::zero(),
            opening_remaining: Money::zero(),
            documents_due: Money::zero(),
            outstanding: Money::zero(),
            credit_balance: Money::zero(),
            net: Money::zero(),
        }
    }
}

/// Remainder of the synthetic opening-balance obligation.
pub fn opening_remaining(party: &Party, opening_paid: Money) -> Money {
    (party.opening_balance() - opening_paid).floor_zero()
}

// =============================================================================
// Credit Balance Movements
// =============================================================================

impl Party {
    /// Adds funds owed to the party (surplus, credit note).
    pub fn deposit_credit(&mut self, amount: Money) -> CoreResult<()> {
        let next = self
            .credit_balance()
            .checked_add(amount)
            .ok_or_else(|| ValidationError::OutOfRange {
                field: "credit_balance".to_string(),
                min: 0,
                max: i64::MAX,
            })?;
        self.credit_balance_cents = next.cents();
        Ok(())
    }

    /// Spends existing credit as a payment source.
    pub fn consume_credit(&mut self, amount: Money) -> CoreResult<()> {
        let available = self.credit_balance();
        if amount > available {
            return Err(CoreError::InsufficientCredit {
                available,
                requested: amount,
            });
        }
        self.credit_balance_cents -= amount.cents();
        Ok(())
    }

    /// Applies a signed credit change from a reversal. A result below zero
    /// means the deposit being reversed has already been spent.
    pub fn apply_reversal_credit(&mut self, delta: Money) -> CoreResult<()> {
        let next = self.credit_balance() + delta;
        if next.is_negative() {
            return Err(CoreError::CreditInUse {
                available: self.credit_balance(),
                requested: -delta,
            });
        }
        self.credit_balance_cents = next.cents();
        Ok(())
    }
}

// =============================================================================
// Credit Limit
// =============================================================================

/// Outcome of the credit-limit check on a new sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditCheck {
    /// The party has no enforced ceiling.
    Unlimited,
    WithinLimit { projected: Money, limit: Money },
    /// Over the ceiling, but the caller confirmed the override.
    Overridden { projected: Money, limit: Money },
}

impl CreditCheck {
    pub fn is_overridden(&self) -> bool {
        matches!(self, CreditCheck::Overridden { .. })
    }
}

/// projected = current outstanding + unpaid part of the new sale.
///
/// Fails with `CreditLimitExceeded` when over a customer's ceiling unless
/// `confirmed` is set. Credit balance is not netted off.
pub fn check_credit_limit(
    party: &Party,
    outstanding: Money,
    new_unpaid: Money,
    confirmed: bool,
) -> CoreResult<CreditCheck> {
    let Some(limit) = party.credit_ceiling() else {
        return Ok(CreditCheck::Unlimited);
    };

    let projected = outstanding + new_unpaid.floor_zero();
    if projected <= limit {
        return Ok(CreditCheck::WithinLimit { projected, limit });
    }

    if confirmed {
        Ok(CreditCheck::Overridden { projected, limit })
    } else {
        Err(CoreError::CreditLimitExceeded { projected, limit })
    }
}
