//! # Payment Ledger
//!
//! Payment records are append-only. One incoming payment becomes one record
//! per obligation it settled, all sharing a receipt id. The only way to undo
//! a payment is a reversal of the whole receipt: every record is deleted,
//! their effects on documents and the party are undone, and one
//! [`DeletedPaymentAudit`] row is written in the same commit.
//!
//! ## Reversal Effects (per record)
//! ```text
//! ┌────────────────────────────┬────────────────────────────────────────────┐
//! │ obligation / method        │ effect                                     │
//! ├────────────────────────────┼────────────────────────────────────────────┤
//! │ Document                   │ paid -= amount (floored at 0), re-derive   │
//! │ OpeningBalance             │ nothing stored; remainder grows on read    │
//! │ CreditBalance (deposit)    │ credit -= amount, CreditInUse if short     │
//! │ method = credit_balance    │ additionally credit += amount              │
//! └────────────────────────────┴────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use uuid::Uuid;

use crate::allocation::PaymentTerms;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{
    DeletedPaymentAudit, Obligation, ObligationKind, Party, PaymentMethod, PaymentRecord,
    TradeDocument,
};
use crate::unit_of_work::OperationContext;
use crate::validation::validate_reason;

/// Creates a payment record. Pure append: nothing else changes.
pub fn new_payment(
    ctx: &OperationContext,
    receipt_id: &str,
    party_id: &str,
    obligation: Obligation,
    amount: Money,
    terms: &PaymentTerms,
) -> PaymentRecord {
    PaymentRecord {
        id: Uuid::new_v4().to_string(),
        party_id: party_id.to_string(),
        obligation_kind: obligation.kind(),
        document_id: obligation.document_id().map(str::to_string),
        receipt_id: receipt_id.to_string(),
        credit_note_id: None,
        date: terms.date,
        amount_cents: amount.cents(),
        method: terms.method,
        note: terms.note.clone(),
        created_by: ctx.user_id.clone(),
        created_at: ctx.now,
    }
}

/// Net change to the party's credit balance when `payment` is reversed.
pub fn reversal_credit_delta(payment: &PaymentRecord) -> Money {
    let mut delta = Money::zero();
    if payment.obligation_kind == ObligationKind::CreditBalance {
        delta -= payment.amount();
    }
    if payment.method == PaymentMethod::CreditBalance {
        delta += payment.amount();
    }
    delta
}

/// Undoes every record of one receipt and returns the audit row.
///
/// `receipt` must hold all live records sharing one receipt id, and
/// `documents` every document they settled. Credit deposits are undone
/// first, so a spent deposit fails before anything else moves. On error
/// neither `party` nor `documents` is modified.
pub fn reverse_payment(
    ctx: &OperationContext,
    receipt: &[PaymentRecord],
    reason: &str,
    party: &mut Party,
    documents: &mut HashMap<String, TradeDocument>,
) -> CoreResult<DeletedPaymentAudit> {
    let reason = validate_reason(reason)?;
    let first = receipt
        .first()
        .ok_or_else(|| CoreError::invalid("payment_id", "no records to reverse"))?;

    for payment in receipt {
        if payment.receipt_id != first.receipt_id {
            return Err(CoreError::invalid(
                "payment_id",
                "records belong to different payments",
            ));
        }
        if payment.credit_note_id.is_some() {
            return Err(CoreError::invalid(
                "payment_id",
                "credit note deposits cannot be reversed on their own",
            ));
        }
        if payment.party_id != party.id {
            return Err(CoreError::invalid("party_id", "payment belongs to another party"));
        }
        if let Obligation::Document(document_id) = payment.obligation() {
            if !documents.contains_key(&document_id) {
                return Err(CoreError::not_found("TradeDocument", document_id));
            }
        }
    }

    let mut records = receipt.to_vec();
    records.sort_by_key(|p| p.obligation_kind != ObligationKind::CreditBalance);

    let delta: Money = records.iter().map(reversal_credit_delta).sum();
    if !delta.is_zero() {
        party.apply_reversal_credit(delta)?;
    }

    for payment in &records {
        if let Some(doc) = payment
            .document_id
            .as_ref()
            .and_then(|id| documents.get_mut(id))
        {
            doc.remove_payment(payment.amount());
            doc.updated_at = ctx.now;
        }
    }

    Ok(DeletedPaymentAudit {
        id: Uuid::new_v4().to_string(),
        receipt_id: first.receipt_id.clone(),
        party_id: party.id.clone(),
        records,
        deleted_at: ctx.now,
        deleted_by: ctx.user_id.clone(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentKind, FulfilmentStatus, LineItem, PartyKind, PaymentStatus};
    use chrono::Utc;

    fn ctx() -> OperationContext {
        OperationContext::new("clerk-7")
    }

    fn terms(method: PaymentMethod) -> PaymentTerms {
        PaymentTerms {
            method,
            date: Utc::now(),
            note: None,
        }
    }

    fn record(receipt: &str, obligation: Obligation, cents: i64, method: PaymentMethod) -> PaymentRecord {
        new_payment(&ctx(), receipt, "c1", obligation, Money::from_cents(cents), &terms(method))
    }

    fn party(credit: i64) -> Party {
        let now = Utc::now();
        Party {
            id: "c1".to_string(),
            kind: PartyKind::Customer,
            name: "Corner Shop".to_string(),
            opening_balance_cents: 0,
            opening_balance_date: now,
            credit_balance_cents: credit,
            credit_limited: false,
            credit_limit_cents: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    fn document(total: i64, paid: i64) -> TradeDocument {
        let now = Utc::now();
        TradeDocument {
            id: "d1".to_string(),
            kind: DocumentKind::Sale,
            reference: "SAL-1".to_string(),
            date: now,
            party_id: "c1".to_string(),
            warehouse_id: "w1".to_string(),
            items: vec![LineItem::new("p1", 1, total)],
            tax_rate_bps: 0,
            shipping_cents: 0,
            grand_total_cents: total,
            paid_amount_cents: paid,
            payment_status: PaymentStatus::derive(Money::from_cents(paid), Money::from_cents(total)),
            fulfilment_status: FulfilmentStatus::Completed,
            notes: None,
            created_by: "u1".to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    fn documents(doc: TradeDocument) -> HashMap<String, TradeDocument> {
        HashMap::from([(doc.id.clone(), doc)])
    }

    #[test]
    fn test_reverse_document_payment() {
        // 1000 paid on a 1000 document, reverse 400 -> 600 Partial
        let mut party = party(0);
        let mut docs = documents(document(100_000, 100_000));
        let payment = record("r1", Obligation::Document("d1".into()), 40_000, PaymentMethod::Cash);

        let audit = reverse_payment(
            &ctx(),
            std::slice::from_ref(&payment),
            "wrong amount",
            &mut party,
            &mut docs,
        )
        .unwrap();
        assert_eq!(docs["d1"].paid_amount_cents, 60_000);
        assert_eq!(docs["d1"].payment_status, PaymentStatus::Partial);
        assert_eq!(audit.records, vec![payment]);
        assert_eq!(audit.receipt_id, "r1");
        assert_eq!(audit.deleted_by, "clerk-7");
        assert_eq!(audit.reason, "wrong amount");
    }

    #[test]
    fn test_split_payment_reverses_as_one() {
        // 750 sale with 300 paid; a 600 payment put 450 on it and 150 in credit
        let mut party = party(15_000);
        let mut docs = documents(document(75_000, 75_000));
        let receipt = vec![
            record("r1", Obligation::Document("d1".into()), 45_000, PaymentMethod::Cash),
            record("r1", Obligation::CreditBalance, 15_000, PaymentMethod::Cash),
        ];

        let audit = reverse_payment(&ctx(), &receipt, "typo", &mut party, &mut docs).unwrap();
        assert_eq!(docs["d1"].paid_amount_cents, 30_000);
        assert_eq!(docs["d1"].payment_status, PaymentStatus::Partial);
        assert_eq!(party.credit_balance_cents, 0);
        assert_eq!(audit.amount(), Money::from_cents(60_000));
        assert_eq!(audit.records.len(), 2);
        assert_eq!(audit.records[0].obligation(), Obligation::CreditBalance);
        assert_eq!(audit.document_ids().collect::<Vec<_>>(), vec!["d1"]);
    }

    #[test]
    fn test_spent_deposit_blocks_the_whole_receipt() {
        let mut party = party(5_000);
        let mut docs = documents(document(75_000, 75_000));
        let receipt = vec![
            record("r1", Obligation::Document("d1".into()), 45_000, PaymentMethod::Cash),
            record("r1", Obligation::CreditBalance, 15_000, PaymentMethod::Cash),
        ];

        let err = reverse_payment(&ctx(), &receipt, "typo", &mut party, &mut docs).unwrap_err();
        assert!(matches!(err, CoreError::CreditInUse { .. }));
        assert_eq!(party.credit_balance_cents, 5_000);
        assert_eq!(docs["d1"].paid_amount_cents, 75_000);
    }

    #[test]
    fn test_mixed_receipts_are_rejected() {
        let mut party = party(0);
        let mut docs = documents(document(75_000, 75_000));
        let records = vec![
            record("r1", Obligation::Document("d1".into()), 45_000, PaymentMethod::Cash),
            record("r2", Obligation::OpeningBalance, 1_000, PaymentMethod::Cash),
        ];
        let err = reverse_payment(&ctx(), &records, "typo", &mut party, &mut docs).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_missing_document_is_not_found() {
        let mut party = party(0);
        let payment = record("r1", Obligation::Document("gone".into()), 1_000, PaymentMethod::Cash);
        let err = reverse_payment(&ctx(), &[payment], "typo", &mut party, &mut HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_reason_is_required() {
        let mut party = party(0);
        let payment = record("r1", Obligation::OpeningBalance, 500, PaymentMethod::Cash);
        let err = reverse_payment(&ctx(), &[payment], "  ", &mut party, &mut HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_spent_deposit_cannot_be_reversed() {
        let mut party = party(10_000);
        let deposit = record("r1", Obligation::CreditBalance, 30_000, PaymentMethod::Cash);
        let err = reverse_payment(&ctx(), &[deposit], "typo", &mut party, &mut HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::CreditInUse { .. }));
        assert_eq!(party.credit_balance_cents, 10_000);
    }

    #[test]
    fn test_credit_funded_payment_restores_credit() {
        let mut party = party(0);
        let mut docs = documents(document(50_000, 20_000));
        let payment = record(
            "r1",
            Obligation::Document("d1".into()),
            20_000,
            PaymentMethod::CreditBalance,
        );
        reverse_payment(&ctx(), &[payment], "applied to wrong invoice", &mut party, &mut docs)
            .unwrap();
        assert_eq!(party.credit_balance_cents, 20_000);
        assert_eq!(docs["d1"].payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_credit_funded_surplus_deposit_nets_to_zero() {
        let payment = record("r1", Obligation::CreditBalance, 7_500, PaymentMethod::CreditBalance);
        assert_eq!(reversal_credit_delta(&payment), Money::zero());
    }

    #[test]
    fn test_credit_note_deposit_is_not_reversible() {
        let mut party = party(30_000);
        let mut deposit = record("r1", Obligation::CreditBalance, 30_000, PaymentMethod::CreditNote);
        deposit.credit_note_id = Some("cn1".into());
        let err = reverse_payment(&ctx(), &[deposit], "typo", &mut party, &mut HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
