//! End-to-end ledger scenarios against an in-memory database.

use tradebook_core::balance::CreditCheck;
use tradebook_core::document::{DocumentDraft, DocumentEdit, LineInput};
use tradebook_core::operations::{CreditNoteDraft, PaymentInput, PaymentRequest, RecordDocumentRequest};
use tradebook_core::{
    CoreError, CreditNoteType, DocumentKind, FulfilmentStatus, LedgerSettings, Money,
    ObligationKind, Party, PartyKind, PaymentMethod, PaymentStatus, Product, ProductType,
    Warehouse,
};
use tradebook_db::{
    Database, DbConfig, DbError, NewParty, NewProduct, RetrySettings, TransactionCoordinator,
};

const CLERK: &str = "clerk-1";

struct Shop {
    ledger: TransactionCoordinator,
    db: Database,
    warehouse: Warehouse,
}

async fn shop() -> Shop {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let retry = RetrySettings {
        max_attempts: 5,
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
        deadline_ms: 5_000,
    };
    let ledger = TransactionCoordinator::new(db.clone(), LedgerSettings::default(), retry);
    let warehouse = db.warehouses().create("W1").await.unwrap();
    Shop {
        ledger,
        db,
        warehouse,
    }
}

impl Shop {
    async fn product(&self, sku: &str, price_cents: i64, stock: i64) -> Product {
        let product = self
            .db
            .products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {}", sku),
                product_type: ProductType::Physical,
                cost_cents: 10_000,
                price_cents,
                min_stock_alert: 2,
            })
            .await
            .unwrap();
        if stock > 0 {
            self.ledger
                .adjust_stock(CLERK, &product.id, &self.warehouse.id, stock)
                .await
                .unwrap();
        }
        product
    }

    async fn service(&self, sku: &str, price_cents: i64) -> Product {
        self.db
            .products()
            .create(NewProduct {
                sku: sku.to_string(),
                name: format!("Service {}", sku),
                product_type: ProductType::Service,
                cost_cents: 0,
                price_cents,
                min_stock_alert: 0,
            })
            .await
            .unwrap()
    }

    async fn customer(&self, name: &str, credit_limit_cents: Option<i64>) -> Party {
        self.db
            .parties()
            .create(NewParty {
                kind: PartyKind::Customer,
                name: name.to_string(),
                opening_balance_cents: 0,
                opening_balance_date: None,
                credit_limit_cents,
            })
            .await
            .unwrap()
    }

    fn sale(&self, party: &Party, lines: Vec<LineInput>) -> DocumentDraft {
        DocumentDraft {
            kind: DocumentKind::Sale,
            date: None,
            party_id: party.id.clone(),
            warehouse_id: self.warehouse.id.clone(),
            items: lines,
            shipping_cents: 0,
            fulfilment_status: FulfilmentStatus::Completed,
            notes: None,
        }
    }

    async fn stock_of(&self, product: &Product) -> i64 {
        self.db
            .products()
            .get_by_id(&product.id)
            .await
            .unwrap()
            .unwrap()
            .quantity_at(&self.warehouse.id)
    }

    async fn credit_of(&self, party: &Party) -> i64 {
        self.db
            .parties()
            .get_by_id(&party.id)
            .await
            .unwrap()
            .unwrap()
            .credit_balance_cents
    }

    async fn pay(&self, party: &Party, amount_cents: i64, target: Option<&str>) -> Vec<String> {
        let outcome = self
            .ledger
            .allocate_payment(
                CLERK,
                PaymentRequest {
                    party_id: party.id.clone(),
                    payment: PaymentInput::new(amount_cents, PaymentMethod::Cash),
                    target_document_id: target.map(str::to_string),
                },
            )
            .await
            .unwrap();
        outcome.payments.into_iter().map(|p| p.id).collect()
    }
}

#[tokio::test]
async fn test_end_to_end_sale_payment_and_reversal() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 20).await;
    let party = shop.customer("Corner Shop", None).await;

    let s1 = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(product.id.clone(), 5)])),
        )
        .await
        .unwrap()
        .document;
    assert_eq!(shop.stock_of(&product).await, 15);
    assert_eq!(s1.grand_total_cents, 75_000);

    shop.pay(&party, 30_000, Some(&s1.id)).await;
    let doc = shop.db.documents().get_by_id(&s1.id).await.unwrap().unwrap();
    assert_eq!(doc.paid_amount_cents, 30_000);
    assert_eq!(doc.payment_status, PaymentStatus::Partial);

    // 450 completes S1, 150 becomes credit
    let second = shop.pay(&party, 60_000, Some(&s1.id)).await;
    assert_eq!(second.len(), 2);
    let doc = shop.db.documents().get_by_id(&s1.id).await.unwrap().unwrap();
    assert_eq!(doc.paid_amount_cents, 75_000);
    assert_eq!(doc.payment_status, PaymentStatus::Paid);
    assert_eq!(shop.credit_of(&party).await, 15_000);

    // Deleting the 600 payment through either of its records
    let audit = shop
        .ledger
        .reverse_payment(CLERK, &second[0], "typo")
        .await
        .unwrap();
    assert_eq!(audit.amount(), Money::from_cents(60_000));
    assert_eq!(audit.records.len(), 2);

    let doc = shop.db.documents().get_by_id(&s1.id).await.unwrap().unwrap();
    assert_eq!(doc.paid_amount_cents, 30_000);
    assert_eq!(doc.payment_status, PaymentStatus::Partial);
    assert_eq!(shop.credit_of(&party).await, 0);

    let audits = shop.db.payments().audits_for_party(&party.id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].amount(), Money::from_cents(60_000));
    assert_eq!(audits[0].document_ids().collect::<Vec<_>>(), vec![s1.id.as_str()]);
    assert_eq!(audits[0].reason, "typo");
    assert_eq!(audits[0].deleted_by, CLERK);

    let remaining = shop.db.payments().list_for_party(&party.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].amount_cents, 30_000);
}

#[tokio::test]
async fn test_surplus_becomes_credit() {
    let shop = shop().await;
    let consulting = shop.service("SVC", 70_000).await;
    let party = shop.customer("Walk-in", None).await;

    let doc = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(consulting.id.clone(), 1)])),
        )
        .await
        .unwrap()
        .document;

    let outcome = shop
        .ledger
        .allocate_payment(
            CLERK,
            PaymentRequest {
                party_id: party.id.clone(),
                payment: PaymentInput::new(100_000, PaymentMethod::BankTransfer),
                target_document_id: None,
            },
        )
        .await
        .unwrap();

    let allocated: i64 = outcome.payments.iter().map(|p| p.amount_cents).sum();
    assert_eq!(allocated, 100_000);
    assert_eq!(outcome.surplus, Money::from_cents(30_000));
    assert!(outcome
        .payments
        .iter()
        .any(|p| p.obligation_kind == ObligationKind::CreditBalance && p.amount_cents == 30_000));

    let doc = shop.db.documents().get_by_id(&doc.id).await.unwrap().unwrap();
    assert_eq!(doc.paid_amount_cents, 70_000);
    assert_eq!(doc.payment_status, PaymentStatus::Paid);
    assert_eq!(shop.credit_of(&party).await, 30_000);

    let balance = shop.ledger.party_balance(&party.id).await.unwrap();
    assert_eq!(balance.outstanding, Money::zero());
    assert_eq!(balance.net, Money::from_cents(-30_000));
}

#[tokio::test]
async fn test_reversal_restores_partial_status() {
    let shop = shop().await;
    let consulting = shop.service("SVC", 100_000).await;
    let party = shop.customer("Northwind", None).await;

    let doc = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(consulting.id.clone(), 1)])),
        )
        .await
        .unwrap()
        .document;

    let first = shop.pay(&party, 60_000, Some(&doc.id)).await;
    let last = shop.pay(&party, 40_000, Some(&doc.id)).await;
    let stored = shop.db.documents().get_by_id(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);

    let audit = shop
        .ledger
        .reverse_payment(CLERK, &last[0], "wrong customer")
        .await
        .unwrap();
    assert_eq!(audit.amount(), Money::from_cents(40_000));
    assert_eq!(audit.records.len(), 1);

    let stored = shop.db.documents().get_by_id(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.paid_amount_cents, 60_000);
    assert_eq!(stored.payment_status, PaymentStatus::Partial);
    assert!(shop.db.payments().get_by_id(&last[0]).await.unwrap().is_none());

    let blank = shop
        .ledger
        .reverse_payment(CLERK, &first[0], "   ")
        .await
        .unwrap_err();
    assert!(matches!(blank.ledger(), Some(CoreError::Validation(_))));
    assert!(shop.db.payments().get_by_id(&first[0]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_credit_limit_needs_confirmation() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 10).await;
    let party = shop.customer("Contoso", Some(50_000)).await;
    let draft = shop.sale(&party, vec![LineInput::new(product.id.clone(), 4)]);

    let err = shop
        .ledger
        .record_sale(CLERK, RecordDocumentRequest::new(draft.clone()))
        .await
        .unwrap_err();
    assert!(matches!(
        err.ledger(),
        Some(CoreError::CreditLimitExceeded { .. })
    ));
    assert_eq!(shop.stock_of(&product).await, 10);

    let recorded = shop
        .ledger
        .record_sale(CLERK, RecordDocumentRequest::new(draft).confirmed())
        .await
        .unwrap();
    assert_eq!(
        recorded.credit_check,
        CreditCheck::Overridden {
            projected: Money::from_cents(60_000),
            limit: Money::from_cents(50_000),
        }
    );
    assert_eq!(shop.stock_of(&product).await, 6);
}

#[tokio::test]
async fn test_stock_never_goes_negative() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 3).await;
    let party = shop.customer("Corner Shop", None).await;

    let err = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(product.id.clone(), 5)])),
        )
        .await
        .unwrap_err();
    match err.ledger() {
        Some(CoreError::InsufficientStock {
            available,
            requested,
            ..
        }) => {
            assert_eq!(*available, 3);
            assert_eq!(*requested, 5);
        }
        other => panic!("expected insufficient stock, got {:?}", other),
    }

    assert!(shop
        .ledger
        .adjust_stock(CLERK, &product.id, &shop.warehouse.id, -4)
        .await
        .is_err());
    assert_eq!(shop.stock_of(&product).await, 3);
    assert!(shop.db.documents().list_for_party(&party.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fulfilment_edit_applies_only_the_delta() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 10).await;
    let party = shop.customer("Corner Shop", None).await;

    let doc = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(product.id.clone(), 5)])),
        )
        .await
        .unwrap()
        .document;
    assert_eq!(shop.stock_of(&product).await, 5);

    let edited = shop
        .ledger
        .update_document(
            CLERK,
            &doc.id,
            DocumentEdit {
                items: Some(vec![LineInput::new(product.id.clone(), 3)]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(shop.stock_of(&product).await, 7);
    assert_eq!(edited.grand_total_cents, 45_000);
    assert_eq!(edited.version, doc.version + 1);

    // An edit the stock cannot cover leaves everything as it was
    let err = shop
        .ledger
        .update_document(
            CLERK,
            &doc.id,
            DocumentEdit {
                items: Some(vec![LineInput::new(product.id.clone(), 20)]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::InsufficientStock { .. })));
    assert_eq!(shop.stock_of(&product).await, 7);

    shop.ledger
        .update_document(
            CLERK,
            &doc.id,
            DocumentEdit {
                fulfilment_status: Some(FulfilmentStatus::Pending),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(shop.stock_of(&product).await, 10);
}

#[tokio::test]
async fn test_delete_document_requires_reversed_payments() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 10).await;
    let party = shop.customer("Corner Shop", None).await;

    let recorded = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(product.id.clone(), 2)]))
                .with_payment(PaymentInput::new(10_000, PaymentMethod::Card)),
        )
        .await
        .unwrap();
    let doc = recorded.document;
    assert_eq!(shop.stock_of(&product).await, 8);

    let err = shop.ledger.delete_document(CLERK, &doc.id).await.unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::Validation(_))));

    shop.ledger
        .reverse_payment(CLERK, &recorded.payments[0].id, "sale cancelled")
        .await
        .unwrap();
    shop.ledger.delete_document(CLERK, &doc.id).await.unwrap();

    assert_eq!(shop.stock_of(&product).await, 10);
    assert!(shop.db.documents().get_by_id(&doc.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transfer_moves_stock_between_warehouses() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 10).await;
    let back = shop.db.warehouses().create("W2").await.unwrap();

    let transfer = shop
        .ledger
        .transfer_stock(CLERK, &product.id, &shop.warehouse.id, &back.id, 4)
        .await
        .unwrap();
    assert_eq!(transfer.from_quantity, 6);
    assert_eq!(transfer.to_quantity, 4);

    let err = shop
        .ledger
        .transfer_stock(CLERK, &product.id, &shop.warehouse.id, &back.id, 7)
        .await
        .unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::InsufficientStock { .. })));

    let stored = shop.db.products().get_by_id(&product.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity_at(&shop.warehouse.id), 6);
    assert_eq!(stored.quantity_at(&back.id), 4);
}

#[tokio::test]
async fn test_return_credit_note_restocks_and_funds_credit() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 10).await;
    let party = shop.customer("Corner Shop", None).await;

    let issued = shop
        .ledger
        .create_credit_note(
            CLERK,
            CreditNoteDraft {
                party_id: party.id.clone(),
                note_type: CreditNoteType::Return,
                warehouse_id: Some(shop.warehouse.id.clone()),
                items: vec![LineInput::new(product.id.clone(), 2)],
                amount_cents: None,
                reason: "damaged in transit".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(issued.credit_note.amount_cents, 30_000);
    assert!(issued.credit_note.reference.starts_with("CN-"));
    assert_eq!(shop.stock_of(&product).await, 12);
    assert_eq!(shop.credit_of(&party).await, 30_000);

    let err = shop
        .ledger
        .reverse_payment(CLERK, &issued.deposit.id, "undo")
        .await
        .unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::Validation(_))));

    // Spending the credit on a new sale
    let doc = shop
        .ledger
        .record_sale(
            CLERK,
            RecordDocumentRequest::new(shop.sale(&party, vec![LineInput::new(product.id.clone(), 1)])),
        )
        .await
        .unwrap()
        .document;
    shop.ledger
        .allocate_payment(
            CLERK,
            PaymentRequest {
                party_id: party.id.clone(),
                payment: PaymentInput::new(15_000, PaymentMethod::CreditBalance),
                target_document_id: Some(doc.id.clone()),
            },
        )
        .await
        .unwrap();
    assert_eq!(shop.credit_of(&party).await, 15_000);

    let overdraw = shop
        .ledger
        .allocate_payment(
            CLERK,
            PaymentRequest {
                party_id: party.id.clone(),
                payment: PaymentInput::new(20_000, PaymentMethod::CreditBalance),
                target_document_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        overdraw.ledger(),
        Some(CoreError::InsufficientCredit { .. })
    ));

    let notes = shop.db.credit_notes().list_for_party(&party.id).await.unwrap();
    assert_eq!(notes.len(), 1);
}

#[tokio::test]
async fn test_out_of_range_amounts_are_rejected() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 10).await;
    let party = shop.customer("Corner Shop", None).await;

    let line = LineInput::new(product.id.clone(), 3).at_price(i64::MAX / 2);
    let err = shop
        .ledger
        .record_sale(CLERK, RecordDocumentRequest::new(shop.sale(&party, vec![line])))
        .await
        .unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::Validation(_))));
    assert_eq!(shop.stock_of(&product).await, 10);

    let err = shop
        .ledger
        .allocate_payment(
            CLERK,
            PaymentRequest {
                party_id: party.id.clone(),
                payment: PaymentInput::new(i64::MAX, PaymentMethod::Cash),
                target_document_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::Validation(_))));
    assert_eq!(shop.credit_of(&party).await, 0);
}

#[tokio::test]
async fn test_missing_records_are_not_found() {
    let shop = shop().await;
    let err = shop
        .ledger
        .adjust_stock(CLERK, "no-such-product", &shop.warehouse.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound { .. }));

    let err = shop
        .ledger
        .reverse_payment(CLERK, "no-such-payment", "typo")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound { .. }));
}

#[tokio::test]
async fn test_purchase_receives_stock_at_cost() {
    let shop = shop().await;
    let product = shop.product("P", 15_000, 0).await;
    let supplier = shop
        .db
        .parties()
        .create(NewParty {
            kind: PartyKind::Supplier,
            name: "Acme Wholesale".to_string(),
            opening_balance_cents: 0,
            opening_balance_date: None,
            credit_limit_cents: None,
        })
        .await
        .unwrap();

    let draft = DocumentDraft {
        kind: DocumentKind::Purchase,
        date: None,
        party_id: supplier.id.clone(),
        warehouse_id: shop.warehouse.id.clone(),
        items: vec![LineInput::new(product.id.clone(), 10)],
        shipping_cents: 0,
        fulfilment_status: FulfilmentStatus::Completed,
        notes: None,
    };
    let recorded = shop
        .ledger
        .record_purchase(
            CLERK,
            RecordDocumentRequest::new(draft)
                .with_payment(PaymentInput::new(100_000, PaymentMethod::BankTransfer)),
        )
        .await
        .unwrap();

    assert!(recorded.document.reference.starts_with("PUR-"));
    assert_eq!(recorded.document.grand_total_cents, 100_000);
    assert_eq!(recorded.document.payment_status, PaymentStatus::Paid);
    assert_eq!(shop.stock_of(&product).await, 10);

    // A purchase needs a supplier
    let customer = shop.customer("Corner Shop", None).await;
    let wrong = DocumentDraft {
        kind: DocumentKind::Purchase,
        date: None,
        party_id: customer.id.clone(),
        warehouse_id: shop.warehouse.id.clone(),
        items: vec![LineInput::new(product.id.clone(), 1)],
        shipping_cents: 0,
        fulfilment_status: FulfilmentStatus::Completed,
        notes: None,
    };
    let err = shop
        .ledger
        .record_purchase(CLERK, RecordDocumentRequest::new(wrong))
        .await
        .unwrap_err();
    assert!(matches!(err.ledger(), Some(CoreError::Validation(_))));
    assert_eq!(shop.stock_of(&product).await, 10);
}
