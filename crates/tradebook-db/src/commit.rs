//! # Versioned Commit
//!
//! Applies a [`ChangeSet`] in one SQLite transaction.
//!
//! ## Commit Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    │                                                                    │
//! │    ├── guards   UPDATE t SET version = version                          │
//! │    │            WHERE id = ? AND version = ?         0 rows ─► Conflict │
//! │    │                                                                    │
//! │    ├── writes   in plan order                                           │
//! │    │            UPDATE .. WHERE id = ? AND version = ?  0 rows ─► Conflict
//! │    │            INSERT ..                      UNIQUE clash ─► Conflict │
//! │    │            DELETE payments WHERE id = ?            0 rows ─► Conflict
//! │    │                                                                    │
//! │  COMMIT   (any error above: the transaction is dropped and rolls back)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Guards are real (no-op) updates rather than SELECTs, so they take the
//! write lock and re-check the version inside the transaction.

use chrono::Utc;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tradebook_core::unit_of_work::{Guard, StockWrite};
use tradebook_core::{
    ChangeSet, CreditNote, DeletedPaymentAudit, Party, PaymentRecord, TradeDocument, Write,
};

/// Commits every guard and write of `changes`, or nothing.
pub async fn commit(pool: &SqlitePool, changes: &ChangeSet) -> DbResult<()> {
    let mut tx = pool.begin().await?;

    for guard in changes.guards() {
        check_guard(&mut tx, guard).await?;
    }

    for write in changes.writes() {
        debug!(write = write.label(), "Applying write");
        apply_write(&mut tx, write).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Inside a commit every constraint clash means someone else wrote first.
fn in_commit(err: sqlx::Error, record: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { .. } => DbError::conflict(record),
        other => other,
    }
}

fn expect_row(result: SqliteQueryResult, record: impl FnOnce() -> String) -> DbResult<()> {
    if result.rows_affected() == 0 {
        return Err(DbError::conflict(record()));
    }
    Ok(())
}

async fn check_guard(tx: &mut Transaction<'_, Sqlite>, guard: &Guard) -> DbResult<()> {
    let (sql, id, version, entity) = match guard {
        Guard::Product { id, version } => (
            "UPDATE products SET version = version WHERE id = ?1 AND version = ?2",
            id,
            *version,
            "product",
        ),
        Guard::Party { id, version } => (
            "UPDATE parties SET version = version WHERE id = ?1 AND version = ?2",
            id,
            *version,
            "party",
        ),
        Guard::Document { id, version } => (
            "UPDATE trade_documents SET version = version WHERE id = ?1 AND version = ?2",
            id,
            *version,
            "document",
        ),
    };

    let result = sqlx::query(sql)
        .bind(id)
        .bind(version)
        .execute(&mut **tx)
        .await?;
    expect_row(result, || format!("{} {}", entity, id))
}

async fn apply_write(tx: &mut Transaction<'_, Sqlite>, write: &Write) -> DbResult<()> {
    match write {
        Write::Stock(stock) => write_stock(tx, stock).await,
        Write::InsertDocument(document) => insert_document(tx, document).await,
        Write::UpdateDocument {
            document,
            expected_version,
        } => update_document(tx, document, *expected_version).await,
        Write::DeleteDocument {
            id,
            expected_version,
        } => {
            let result =
                sqlx::query("DELETE FROM trade_documents WHERE id = ?1 AND version = ?2")
                    .bind(id)
                    .bind(expected_version)
                    .execute(&mut **tx)
                    .await?;
            expect_row(result, || format!("document {}", id))
        }
        Write::UpdateParty {
            party,
            expected_version,
        } => update_party(tx, party, *expected_version).await,
        Write::InsertPayment(payment) => insert_payment(tx, payment).await,
        Write::DeletePayment { id } => {
            let result = sqlx::query("DELETE FROM payments WHERE id = ?1")
                .bind(id)
                .execute(&mut **tx)
                .await?;
            expect_row(result, || format!("payment {}", id))
        }
        Write::InsertCreditNote(note) => insert_credit_note(tx, note).await,
        Write::InsertAudit(audit) => insert_audit(tx, audit).await,
    }
}

async fn write_stock(tx: &mut Transaction<'_, Sqlite>, stock: &StockWrite) -> DbResult<()> {
    let record = || format!("stock {}@{}", stock.product_id, stock.warehouse_id);
    let now = Utc::now();

    match stock.expected_version {
        None => {
            sqlx::query(
                r#"
                INSERT INTO stock_levels (product_id, warehouse_id, quantity, updated_at, version)
                VALUES (?1, ?2, ?3, ?4, 1)
                "#,
            )
            .bind(&stock.product_id)
            .bind(&stock.warehouse_id)
            .bind(stock.quantity)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| in_commit(e, &record()))?;
            Ok(())
        }
        Some(version) => {
            let result = sqlx::query(
                r#"
                UPDATE stock_levels
                SET quantity = ?1, updated_at = ?2, version = version + 1
                WHERE product_id = ?3 AND warehouse_id = ?4 AND version = ?5
                "#,
            )
            .bind(stock.quantity)
            .bind(now)
            .bind(&stock.product_id)
            .bind(&stock.warehouse_id)
            .bind(version)
            .execute(&mut **tx)
            .await?;
            expect_row(result, record)
        }
    }
}

async fn insert_document(
    tx: &mut Transaction<'_, Sqlite>,
    document: &TradeDocument,
) -> DbResult<()> {
    let items = serde_json::to_string(&document.items)?;

    sqlx::query(
        r#"
        INSERT INTO trade_documents (
            id, kind, reference, date, party_id, warehouse_id, items,
            tax_rate_bps, shipping_cents, grand_total_cents, paid_amount_cents,
            payment_status, fulfilment_status, notes, created_by,
            created_at, updated_at, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        "#,
    )
    .bind(&document.id)
    .bind(document.kind)
    .bind(&document.reference)
    .bind(document.date)
    .bind(&document.party_id)
    .bind(&document.warehouse_id)
    .bind(items)
    .bind(i64::from(document.tax_rate_bps))
    .bind(document.shipping_cents)
    .bind(document.grand_total_cents)
    .bind(document.paid_amount_cents)
    .bind(document.payment_status)
    .bind(document.fulfilment_status)
    .bind(&document.notes)
    .bind(&document.created_by)
    .bind(document.created_at)
    .bind(document.updated_at)
    .bind(document.version)
    .execute(&mut **tx)
    .await
    .map_err(|e| in_commit(e, &format!("reference {}", document.reference)))?;

    Ok(())
}

async fn update_document(
    tx: &mut Transaction<'_, Sqlite>,
    document: &TradeDocument,
    expected_version: i64,
) -> DbResult<()> {
    let items = serde_json::to_string(&document.items)?;

    let result = sqlx::query(
        r#"
        UPDATE trade_documents SET
            date = ?1,
            warehouse_id = ?2,
            items = ?3,
            shipping_cents = ?4,
            grand_total_cents = ?5,
            paid_amount_cents = ?6,
            payment_status = ?7,
            fulfilment_status = ?8,
            notes = ?9,
            updated_at = ?10,
            version = ?11
        WHERE id = ?12 AND version = ?13
        "#,
    )
    .bind(document.date)
    .bind(&document.warehouse_id)
    .bind(items)
    .bind(document.shipping_cents)
    .bind(document.grand_total_cents)
    .bind(document.paid_amount_cents)
    .bind(document.payment_status)
    .bind(document.fulfilment_status)
    .bind(&document.notes)
    .bind(document.updated_at)
    .bind(document.version)
    .bind(&document.id)
    .bind(expected_version)
    .execute(&mut **tx)
    .await?;

    expect_row(result, || format!("document {}", document.id))
}

async fn update_party(
    tx: &mut Transaction<'_, Sqlite>,
    party: &Party,
    expected_version: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE parties SET
            credit_balance_cents = ?1,
            updated_at = ?2,
            version = ?3
        WHERE id = ?4 AND version = ?5
        "#,
    )
    .bind(party.credit_balance_cents)
    .bind(party.updated_at)
    .bind(party.version)
    .bind(&party.id)
    .bind(expected_version)
    .execute(&mut **tx)
    .await?;

    expect_row(result, || format!("party {}", party.id))
}

async fn insert_payment(
    tx: &mut Transaction<'_, Sqlite>,
    payment: &PaymentRecord,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, party_id, obligation_kind, document_id, receipt_id, credit_note_id,
            date, amount_cents, method, note, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.party_id)
    .bind(payment.obligation_kind)
    .bind(&payment.document_id)
    .bind(&payment.receipt_id)
    .bind(&payment.credit_note_id)
    .bind(payment.date)
    .bind(payment.amount_cents)
    .bind(payment.method)
    .bind(&payment.note)
    .bind(&payment.created_by)
    .bind(payment.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_credit_note(
    tx: &mut Transaction<'_, Sqlite>,
    note: &CreditNote,
) -> DbResult<()> {
    let items = serde_json::to_string(&note.items)?;

    sqlx::query(
        r#"
        INSERT INTO credit_notes (
            id, reference, party_id, note_type, warehouse_id, items,
            amount_cents, reason, payment_id, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&note.id)
    .bind(&note.reference)
    .bind(&note.party_id)
    .bind(note.note_type)
    .bind(&note.warehouse_id)
    .bind(items)
    .bind(note.amount_cents)
    .bind(&note.reason)
    .bind(&note.payment_id)
    .bind(&note.created_by)
    .bind(note.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| in_commit(e, &format!("reference {}", note.reference)))?;

    Ok(())
}

async fn insert_audit(
    tx: &mut Transaction<'_, Sqlite>,
    audit: &DeletedPaymentAudit,
) -> DbResult<()> {
    let records = serde_json::to_string(&audit.records)?;

    sqlx::query(
        r#"
        INSERT INTO deleted_payments (
            id, receipt_id, party_id, amount_cents,
            records, deleted_at, deleted_by, reason
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&audit.id)
    .bind(&audit.receipt_id)
    .bind(&audit.party_id)
    .bind(audit.amount().cents())
    .bind(records)
    .bind(audit.deleted_at)
    .bind(&audit.deleted_by)
    .bind(&audit.reason)
    .execute(&mut **tx)
    .await
    .map_err(|e| in_commit(e, &format!("receipt {}", audit.receipt_id)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{customer, database, widget};
    use tradebook_core::unit_of_work::StockWrite;

    fn stock(product_id: &str, warehouse_id: &str, quantity: i64, version: Option<i64>) -> Write {
        Write::Stock(StockWrite {
            product_id: product_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            quantity,
            expected_version: version,
        })
    }

    #[tokio::test]
    async fn test_stock_insert_then_versioned_update() {
        let db = database().await;
        let warehouse = db.warehouses().create("Main").await.unwrap();
        let product = db.products().create(widget("W-1")).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.push(stock(&product.id, &warehouse.id, 20, None));
        commit(db.pool(), &changes).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.push(stock(&product.id, &warehouse.id, 15, Some(1)));
        commit(db.pool(), &changes).await.unwrap();

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity_at(&warehouse.id), 15);
        assert_eq!(stored.stock_levels[0].version, 2);
    }

    #[tokio::test]
    async fn test_stale_write_rolls_back_everything() {
        let db = database().await;
        let warehouse = db.warehouses().create("Main").await.unwrap();
        let product = db.products().create(widget("W-1")).await.unwrap();
        let party = db.parties().create(customer("Northwind")).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.push(stock(&product.id, &warehouse.id, 20, None));
        let mut stale = party.clone();
        stale.credit_balance_cents = 500;
        stale.version = 8;
        changes.push(Write::UpdateParty {
            party: stale,
            expected_version: 7,
        });

        let err = commit(db.pool(), &changes).await.unwrap_err();
        assert!(err.is_conflict());

        // The stock insert before the failing write did not survive
        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert!(stored.stock_levels.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_stock_insert_is_conflict() {
        let db = database().await;
        let warehouse = db.warehouses().create("Main").await.unwrap();
        let product = db.products().create(widget("W-1")).await.unwrap();

        let mut changes = ChangeSet::new();
        changes.push(stock(&product.id, &warehouse.id, 5, None));
        commit(db.pool(), &changes).await.unwrap();

        let err = commit(db.pool(), &changes).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_guard_on_changed_product() {
        let db = database().await;
        let product = db.products().create(widget("W-1")).await.unwrap();
        db.products()
            .update(&product.id, Default::default(), product.version)
            .await
            .unwrap();

        let mut changes = ChangeSet::new();
        changes.guard_product(&product);
        let err = commit(db.pool(), &changes).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_deleting_missing_payment_is_conflict() {
        let db = database().await;
        let mut changes = ChangeSet::new();
        changes.push(Write::DeletePayment {
            id: "gone".to_string(),
        });
        assert!(commit(db.pool(), &changes).await.unwrap_err().is_conflict());
    }
}
