//! # Warehouse Repository
//!
//! Stock locations. Warehouses are only ever created and read.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;
use tradebook_core::validation::validate_name;
use tradebook_core::Warehouse;

#[derive(Debug, sqlx::FromRow)]
struct WarehouseRow {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<WarehouseRow> for Warehouse {
    fn from(row: WarehouseRow) -> Self {
        Warehouse {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseRepository {
    pool: SqlitePool,
}

impl WarehouseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        WarehouseRepository { pool }
    }

    pub async fn create(&self, name: &str) -> DbResult<Warehouse> {
        validate_name("name", name)?;
        let warehouse = Warehouse {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO warehouses (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&warehouse.id)
            .bind(&warehouse.name)
            .bind(warehouse.created_at)
            .execute(&self.pool)
            .await?;

        info!(id = %warehouse.id, name = %warehouse.name, "Warehouse created");
        Ok(warehouse)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Warehouse>> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "SELECT id, name, created_at FROM warehouses WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Warehouse::from))
    }

    pub async fn list(&self) -> DbResult<Vec<Warehouse>> {
        let rows = sqlx::query_as::<_, WarehouseRow>(
            "SELECT id, name, created_at FROM warehouses ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Listed warehouses");
        Ok(rows.into_iter().map(Warehouse::from).collect())
    }
}
