//! # Product Repository
//!
//! Products and their per-warehouse stock levels.
//!
//! ## What Lives Here
//! - Create and edit calls for catalogue fields (name, cost, price, alert
//!   threshold). They never touch `stock_levels`.
//! - Reads that assemble a [`Product`] with every stock row it has.
//! - The low-stock report.
//!
//! Stock quantities change only through a committed change set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tradebook_core::validation::{validate_name, validate_non_negative_cents, validate_sku};
use tradebook_core::{Product, ProductType, StockLevel};

// =============================================================================
// Inputs
// =============================================================================

/// Fields for a new product. Stock starts empty everywhere.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub product_type: ProductType,
    pub cost_cents: i64,
    pub price_cents: i64,
    pub min_stock_alert: i64,
}

/// Catalogue edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProductEdit {
    pub name: Option<String>,
    pub cost_cents: Option<i64>,
    pub price_cents: Option<i64>,
    pub min_stock_alert: Option<i64>,
}

/// One line of the low-stock report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockItem {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub warehouse_id: String,
    pub quantity: i64,
    pub min_stock_alert: i64,
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    name: String,
    product_type: ProductType,
    cost_cents: i64,
    price_cents: i64,
    min_stock_alert: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl ProductRow {
    fn into_product(self, stock_levels: Vec<StockLevel>) -> Product {
        Product {
            id: self.id,
            sku: self.sku,
            name: self.name,
            product_type: self.product_type,
            cost_cents: self.cost_cents,
            price_cents: self.price_cents,
            min_stock_alert: self.min_stock_alert,
            stock_levels,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StockLevelRow {
    product_id: String,
    warehouse_id: String,
    quantity: i64,
    version: i64,
}

impl From<StockLevelRow> for StockLevel {
    fn from(row: StockLevelRow) -> Self {
        StockLevel {
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            quantity: row.quantity,
            version: row.version,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LowStockRow {
    product_id: String,
    sku: String,
    name: String,
    quantity: i64,
    min_stock_alert: i64,
}

const PRODUCT_COLUMNS: &str = "id, sku, name, product_type, cost_cents, price_cents, \
     min_stock_alert, created_at, updated_at, version";

// =============================================================================
// Repository
// =============================================================================

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = ProductRepository::new(pool);
/// let product = repo.get_by_id("uuid-here").await?;
/// let low = repo.low_stock(&warehouse_id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a new product with no stock rows.
    ///
    /// ## Returns
    /// * `Ok(Product)` - The stored product at version 1
    /// * `Err(DbError::UniqueViolation)` - SKU already in use
    pub async fn create(&self, input: NewProduct) -> DbResult<Product> {
        validate_sku(&input.sku)?;
        validate_name("name", &input.name)?;
        validate_non_negative_cents("cost", input.cost_cents)?;
        validate_non_negative_cents("price", input.price_cents)?;
        validate_non_negative_cents("min_stock_alert", input.min_stock_alert)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            product_type: input.product_type,
            cost_cents: input.cost_cents,
            price_cents: input.price_cents,
            min_stock_alert: input.min_stock_alert,
            stock_levels: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        };

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, product_type, cost_cents, price_cents,
                min_stock_alert, created_at, updated_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.product_type)
        .bind(product.cost_cents)
        .bind(product.price_cents)
        .bind(product.min_stock_alert)
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.version)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: product.sku.clone(),
            },
            other => other,
        })?;

        info!(id = %product.id, sku = %product.sku, "Product created");
        Ok(product)
    }

    /// Edits catalogue fields, guarded by the version the caller read.
    ///
    /// ## Returns
    /// * `Ok(Product)` - The product after the edit
    /// * `Err(DbError::NotFound)` - No such product
    /// * `Err(DbError::Conflict)` - The product changed since it was read
    pub async fn update(
        &self,
        id: &str,
        edit: ProductEdit,
        expected_version: i64,
    ) -> DbResult<Product> {
        if let Some(name) = &edit.name {
            validate_name("name", name)?;
        }
        if let Some(cost) = edit.cost_cents {
            validate_non_negative_cents("cost", cost)?;
        }
        if let Some(price) = edit.price_cents {
            validate_non_negative_cents("price", price)?;
        }
        if let Some(alert) = edit.min_stock_alert {
            validate_non_negative_cents("min_stock_alert", alert)?;
        }

        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = COALESCE(?1, name),
                cost_cents = COALESCE(?2, cost_cents),
                price_cents = COALESCE(?3, price_cents),
                min_stock_alert = COALESCE(?4, min_stock_alert),
                updated_at = ?5,
                version = version + 1
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(edit.name.as_deref().map(str::trim))
        .bind(edit.cost_cents)
        .bind(edit.price_cents)
        .bind(edit.min_stock_alert)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(id).await? {
                Some(_) => Err(DbError::conflict(format!("product {}", id))),
                None => Err(DbError::not_found("Product", id)),
            };
        }

        debug!(id = %id, "Product updated");
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Gets a product by its ID, with its stock levels.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let levels = self.stock_levels(&row.id).await?;
                Ok(Some(row.into_product(levels)))
            }
            None => Ok(None),
        }
    }

    /// Gets every product in `ids` that exists. Missing ids are simply
    /// absent from the result; the ledger reports them when it needs them.
    pub async fn get_many(&self, ids: &[String]) -> DbResult<Vec<Product>> {
        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = self.get_by_id(id).await? {
                products.push(product);
            }
        }
        debug!(requested = ids.len(), found = products.len(), "Loaded products");
        Ok(products)
    }

    /// Lists products by name, with stock levels.
    pub async fn list(&self, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products ORDER BY name LIMIT ?1",
            PRODUCT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let levels = sqlx::query_as::<_, StockLevelRow>(
            "SELECT product_id, warehouse_id, quantity, version FROM stock_levels",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_product: HashMap<String, Vec<StockLevel>> = HashMap::new();
        for level in levels {
            by_product
                .entry(level.product_id.clone())
                .or_default()
                .push(level.into());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let levels = by_product.remove(&row.id).unwrap_or_default();
                row.into_product(levels)
            })
            .collect())
    }

    /// Physical products at or below their alert threshold at a warehouse.
    /// A product with no stock row there counts as zero on hand.
    pub async fn low_stock(&self, warehouse_id: &str) -> DbResult<Vec<LowStockItem>> {
        let rows = sqlx::query_as::<_, LowStockRow>(
            r#"
            SELECT
                p.id AS product_id,
                p.sku,
                p.name,
                COALESCE(s.quantity, 0) AS quantity,
                p.min_stock_alert
            FROM products p
            LEFT JOIN stock_levels s
                ON s.product_id = p.id AND s.warehouse_id = ?1
            WHERE p.product_type = 'physical'
              AND COALESCE(s.quantity, 0) <= p.min_stock_alert
            ORDER BY quantity, p.name
            "#,
        )
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(warehouse_id = %warehouse_id, count = rows.len(), "Low stock report");
        Ok(rows
            .into_iter()
            .map(|row| LowStockItem {
                product_id: row.product_id,
                sku: row.sku,
                name: row.name,
                warehouse_id: warehouse_id.to_string(),
                quantity: row.quantity,
                min_stock_alert: row.min_stock_alert,
            })
            .collect())
    }

    /// Counts all products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn stock_levels(&self, product_id: &str) -> DbResult<Vec<StockLevel>> {
        let rows = sqlx::query_as::<_, StockLevelRow>(
            r#"
            SELECT product_id, warehouse_id, quantity, version
            FROM stock_levels
            WHERE product_id = ?1
            ORDER BY warehouse_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StockLevel::from).collect())
    }
}
