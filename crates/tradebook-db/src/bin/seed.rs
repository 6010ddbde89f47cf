//! # Seed Data Generator
//!
//! Populates a ledger database with demo warehouses, products, parties and
//! opening stock for development.
//!
//! ## Usage
//! ```bash
//! # 200 products (default)
//! cargo run -p tradebook-db --bin seed
//!
//! # Custom amount and database path
//! cargo run -p tradebook-db --bin seed -- --count 1000 --db ./data/ledger.db
//!
//! # With query logging
//! RUST_LOG=tradebook_db=debug cargo run -p tradebook-db --bin seed
//! ```
//!
//! ## Generated Data
//! - Two warehouses: "Main Store" and "Back Warehouse"
//! - Products across categories, SKU `{CATEGORY}-{NAME}-{NNN}`, every tenth
//!   one a service
//! - Opening stock for physical products, received through a supplier
//!   purchase so the stock has a source document
//! - A handful of customers, some with opening balances or credit limits

use std::env;

use tracing_subscriber::EnvFilter;
use tradebook_core::document::{DocumentDraft, LineInput};
use tradebook_core::operations::RecordDocumentRequest;
use tradebook_core::{DocumentKind, FulfilmentStatus, PartyKind, ProductType};
use tradebook_db::{Database, DbConfig, EngineConfig, NewParty, NewProduct, TransactionCoordinator};

const SEED_USER: &str = "seed";

/// Product categories for realistic test data
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "HW",
        &[
            "Hammer",
            "Screwdriver Set",
            "Cordless Drill",
            "Tape Measure",
            "Spirit Level",
            "Wood Screws",
            "Wall Plugs",
            "Sandpaper",
            "Paint Roller",
            "Work Gloves",
        ],
    ),
    (
        "EL",
        &[
            "USB-C Cable",
            "Power Strip",
            "LED Bulb",
            "Extension Lead",
            "AA Batteries",
            "Phone Charger",
            "HDMI Cable",
            "Desk Lamp",
            "Smart Plug",
            "Headphones",
        ],
    ),
    (
        "OF",
        &[
            "Printer Paper",
            "Ballpoint Pens",
            "Stapler",
            "Sticky Notes",
            "Lever Arch File",
            "Envelopes",
            "Whiteboard Marker",
            "Desk Organiser",
            "Scissors",
            "Calculator",
        ],
    ),
];

/// Size variants with a price add-on in cents
const SIZES: &[(&str, i64)] = &[
    ("Small", 0),
    ("Standard", 250),
    ("Large", 600),
    ("Bulk", 1_500),
];

const CUSTOMERS: &[(&str, i64, Option<i64>)] = &[
    ("Walk-in Customer", 0, None),
    ("Northwind Traders", 125_000, Some(500_000)),
    ("Contoso Builders", 0, Some(250_000)),
    ("Fabrikam Offices", 48_050, None),
];

const SUPPLIERS: &[(&str, i64)] = &[("Acme Wholesale", 0), ("Globex Distribution", 310_000)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tradebook Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: from engine.toml)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = EngineConfig::load_or_default(None);
    let db_config = match &db_path {
        Some(path) => DbConfig::new(path),
        None => config.db_config(),
    };

    println!("Tradebook Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_config.database_path.display());
    println!("Products: {}", count);
    println!();

    if let Some(parent) = db_config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::new(db_config).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let ledger = TransactionCoordinator::from_config(db.clone(), &config);

    // Warehouses
    let main_store = db.warehouses().create("Main Store").await?;
    let back = db.warehouses().create("Back Warehouse").await?;
    println!("✓ Created warehouses");

    // Parties
    for (name, opening, limit) in CUSTOMERS {
        db.parties()
            .create(NewParty {
                kind: PartyKind::Customer,
                name: name.to_string(),
                opening_balance_cents: *opening,
                opening_balance_date: None,
                credit_limit_cents: *limit,
            })
            .await?;
    }
    let mut suppliers = Vec::new();
    for (name, opening) in SUPPLIERS {
        let supplier = db
            .parties()
            .create(NewParty {
                kind: PartyKind::Supplier,
                name: name.to_string(),
                opening_balance_cents: *opening,
                opening_balance_date: None,
                credit_limit_cents: None,
            })
            .await?;
        suppliers.push(supplier);
    }
    println!("✓ Created {} customers, {} suppliers", CUSTOMERS.len(), SUPPLIERS.len());

    // Products
    println!();
    println!("Generating products...");
    let start = std::time::Instant::now();
    let mut physical = Vec::new();
    let mut generated = 0;

    'outer: for (category_idx, (category_code, names)) in CATEGORIES.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for (size_idx, (size, price_addon)) in SIZES.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }
                let seed = category_idx * 1000 + name_idx * 10 + size_idx;
                let input = generate_product(category_code, name, size, *price_addon, seed);

                match db.products().create(input).await {
                    Ok(product) => {
                        if product.product_type == ProductType::Physical {
                            physical.push((product.id, (seed % 40) as i64 + 5));
                        }
                        generated += 1;
                    }
                    Err(e) => eprintln!("Failed to insert product: {}", e),
                }
            }
        }
    }
    println!("✓ Generated {} products in {:?}", generated, start.elapsed());

    // Opening stock, received as one purchase per warehouse in chunks
    if let Some(supplier) = suppliers.first() {
        let max_lines = tradebook_core::MAX_DOCUMENT_LINES;
        for (warehouse, share) in [(&main_store, 1), (&back, 2)] {
            for chunk in physical.chunks(max_lines) {
                let items: Vec<LineInput> = chunk
                    .iter()
                    .map(|(id, qty)| LineInput::new(id.clone(), (qty / share).max(1)))
                    .collect();
                let draft = DocumentDraft {
                    kind: DocumentKind::Purchase,
                    date: None,
                    party_id: supplier.id.clone(),
                    warehouse_id: warehouse.id.clone(),
                    items,
                    shipping_cents: 0,
                    fulfilment_status: FulfilmentStatus::Completed,
                    notes: Some("Opening stock".to_string()),
                };
                let recorded = ledger
                    .record_purchase(SEED_USER, RecordDocumentRequest::new(draft))
                    .await?;
                println!(
                    "✓ Received {} lines into {} ({})",
                    recorded.document.items.len(),
                    warehouse.name,
                    recorded.document.reference
                );
            }
        }
    }

    let low = db.products().low_stock(&back.id).await?;
    println!();
    println!("Low stock in {}: {} products", back.name, low.len());
    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates one product's catalogue fields.
fn generate_product(
    category: &str,
    name: &str,
    size: &str,
    price_addon: i64,
    seed: usize,
) -> NewProduct {
    let stem: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_uppercase();
    let sku = format!("{}-{}-{:03}", category, stem, seed);

    // Base $2.49 - $49.99 plus the size add-on
    let price_cents = 249 + ((seed * 37) % 4_750) as i64 + price_addon;

    // Cost is 55-75% of price
    let cost_cents = price_cents * (55 + (seed % 20) as i64) / 100;

    let product_type = if seed % 10 == 9 {
        ProductType::Service
    } else {
        ProductType::Physical
    };

    NewProduct {
        sku,
        name: format!("{} {}", name, size),
        product_type,
        cost_cents,
        price_cents,
        min_stock_alert: 10,
    }
}
