//! # Debt Allocation
//!
//! Splits one incoming payment across a party's open obligations.
//!
//! ## Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  [target document]              if the caller selected one              │
//! │  [opening balance]              if remaining > 0, regardless of date    │
//! │  [open documents]               date ascending, ties by reference       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Walk
//! ```text
//! remaining = amount
//! for obligation in order:
//!     if remaining <= ε: stop
//!     apply = min(remaining, due)
//!     remaining -= apply
//! remaining > ε          ─► deposited as party credit
//! 0 < remaining <= ε     ─► added to the last obligation touched
//!                           (deposited when nothing was touched)
//! ```
//!
//! Conservation always holds: `Σ applications + surplus == amount`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::payment::new_payment;
use crate::types::{Obligation, Party, PaymentMethod, PaymentRecord, TradeDocument};
use crate::unit_of_work::OperationContext;
use crate::ALLOCATION_EPSILON;

// =============================================================================
// Open Obligations
// =============================================================================

/// One obligation with something still owed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenObligation {
    pub obligation: Obligation,
    pub due: Money,
}

/// Orders a party's open obligations for allocation.
///
/// `documents` must be the party's documents as read; fully paid ones are
/// skipped. The target, when given, must be one of them.
pub fn order_obligations(
    party: &Party,
    opening_remaining: Money,
    documents: &[TradeDocument],
    target: Option<&str>,
) -> CoreResult<Vec<OpenObligation>> {
    if let Some(target_id) = target {
        let found = documents
            .iter()
            .find(|doc| doc.id == target_id)
            .ok_or_else(|| CoreError::not_found("TradeDocument", target_id))?;
        if found.party_id != party.id {
            return Err(CoreError::invalid(
                "target_document_id",
                "document belongs to another party",
            ));
        }
    }

    let mut open: Vec<&TradeDocument> = documents
        .iter()
        .filter(|doc| doc.party_id == party.id && doc.amount_due().is_positive())
        .filter(|doc| Some(doc.id.as_str()) != target)
        .collect();
    open.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.reference.cmp(&b.reference))
    });

    let mut ordered = Vec::with_capacity(open.len() + 2);

    if let Some(target_id) = target {
        if let Some(doc) = documents.iter().find(|doc| doc.id == target_id) {
            if doc.amount_due().is_positive() {
                ordered.push(OpenObligation {
                    obligation: Obligation::Document(doc.id.clone()),
                    due: doc.amount_due(),
                });
            }
        }
    }

    if opening_remaining.is_positive() {
        ordered.push(OpenObligation {
            obligation: Obligation::OpeningBalance,
            due: opening_remaining,
        });
    }

    ordered.extend(open.into_iter().map(|doc| OpenObligation {
        obligation: Obligation::Document(doc.id.clone()),
        due: doc.amount_due(),
    }));

    Ok(ordered)
}

// =============================================================================
// Allocation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub obligation: Obligation,
    pub amount: Money,
}

/// How a payment is split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub applications: Vec<Application>,
    /// Deposited into the party's credit balance.
    pub surplus: Money,
}

impl AllocationPlan {
    pub fn allocated(&self) -> Money {
        self.applications.iter().map(|a| a.amount).sum()
    }
}

/// Walks the ordered obligations.
pub fn allocate(amount: Money, obligations: &[OpenObligation]) -> AllocationPlan {
    let mut remaining = amount;
    let mut applications: Vec<Application> = Vec::new();

    for open in obligations {
        if remaining <= ALLOCATION_EPSILON {
            break;
        }
        let apply = remaining.min(open.due);
        if !apply.is_positive() {
            continue;
        }
        applications.push(Application {
            obligation: open.obligation.clone(),
            amount: apply,
        });
        remaining -= apply;
    }

    let mut surplus = Money::zero();
    if remaining > ALLOCATION_EPSILON {
        surplus = remaining;
    } else if remaining.is_positive() {
        match applications.last_mut() {
            Some(last) => last.amount += remaining,
            None => surplus = remaining,
        }
    }

    AllocationPlan {
        applications,
        surplus,
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Payment attributes shared by every record an allocation produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    pub method: PaymentMethod,
    pub date: DateTime<Utc>,
    pub note: Option<String>,
}

/// Applies an allocation to the records it touches and returns one payment
/// record per obligation (plus one for the surplus deposit). All of them
/// share one receipt id, so the payment can later be reversed as a whole.
///
/// Documents touched are updated in place inside `documents`; the caller
/// decides which of them are inserts and which are updates.
pub fn settle(
    ctx: &OperationContext,
    plan: &AllocationPlan,
    terms: &PaymentTerms,
    party: &mut Party,
    documents: &mut HashMap<String, TradeDocument>,
) -> CoreResult<Vec<PaymentRecord>> {
    let receipt_id = Uuid::new_v4().to_string();
    let mut records = Vec::with_capacity(plan.applications.len() + 1);

    for application in &plan.applications {
        if let Obligation::Document(id) = &application.obligation {
            let doc = documents
                .get_mut(id)
                .ok_or_else(|| CoreError::not_found("TradeDocument", id.clone()))?;
            doc.apply_payment(application.amount);
            doc.updated_at = ctx.now;
        }
        records.push(new_payment(
            ctx,
            &receipt_id,
            &party.id,
            application.obligation.clone(),
            application.amount,
            terms,
        ));
    }

    if plan.surplus.is_positive() {
        party.deposit_credit(plan.surplus)?;
        records.push(new_payment(
            ctx,
            &receipt_id,
            &party.id,
            Obligation::CreditBalance,
            plan.surplus,
            terms,
        ));
    }

    Ok(records)
}

// =============================================================================
// Unit Tests
// =============================================================================
