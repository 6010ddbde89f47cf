//! # Stock Ledger
//!
//! The one place stock quantities change. Sale fulfilment, purchase receipt,
//! manual adjustment, transfers, credit-note returns and document
//! edits/deletes all go through [`StockLedger::adjust`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  adjust(product, warehouse, delta)                                      │
//! │                                                                         │
//! │    service?            ─► Ok(None)          (no stock tracked)          │
//! │    current + delta < 0 ─► InsufficientStock (quantity unchanged)        │
//! │    otherwise           ─► Ok(Some(current + delta))                     │
//! │                                                                         │
//! │  Missing (product, warehouse) entries start at zero.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ledger works on an in-memory copy of the products read for one
//! operation; [`StockLedger::writes`] turns the net result into versioned
//! stock writes.

use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::types::Product;
use crate::unit_of_work::{StockWrite, Write};

/// A signed quantity change for one product at one warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDelta {
    pub product_id: String,
    pub warehouse_id: String,
    pub delta: i64,
}

impl StockDelta {
    pub fn new(product_id: impl Into<String>, warehouse_id: impl Into<String>, delta: i64) -> Self {
        StockDelta {
            product_id: product_id.into(),
            warehouse_id: warehouse_id.into(),
            delta,
        }
    }

    pub fn reversed(&self) -> StockDelta {
        StockDelta {
            product_id: self.product_id.clone(),
            warehouse_id: self.warehouse_id.clone(),
            delta: -self.delta,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    original: i64,
    quantity: i64,
    version: Option<i64>,
}

/// Per-product, per-warehouse quantities for a single operation.
#[derive(Debug, Clone, Default)]
pub struct StockLedger {
    products: HashMap<String, Product>,
    entries: BTreeMap<(String, String), Entry>,
}

impl StockLedger {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        StockLedger {
            products: products
                .into_iter()
                .map(|product| (product.id.clone(), product))
                .collect(),
            entries: BTreeMap::new(),
        }
    }

    pub fn product(&self, product_id: &str) -> CoreResult<&Product> {
        self.products
            .get(product_id)
            .ok_or_else(|| CoreError::not_found("Product", product_id))
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    /// Current quantity as seen by this ledger (including earlier adjustments).
    /// `None` for services.
    pub fn quantity(&self, product_id: &str, warehouse_id: &str) -> CoreResult<Option<i64>> {
        let product = self.product(product_id)?;
        if product.is_service() {
            return Ok(None);
        }
        let key = (product_id.to_string(), warehouse_id.to_string());
        Ok(Some(match self.entries.get(&key) {
            Some(entry) => entry.quantity,
            None => product.quantity_at(warehouse_id),
        }))
    }

    /// Applies a signed delta. On failure the quantity is left unchanged.
    pub fn adjust(
        &mut self,
        product_id: &str,
        warehouse_id: &str,
        delta: i64,
    ) -> CoreResult<Option<i64>> {
        let product = self
            .products
            .get(product_id)
            .ok_or_else(|| CoreError::not_found("Product", product_id))?;

        if product.is_service() {
            return Ok(None);
        }

        let key = (product_id.to_string(), warehouse_id.to_string());
        let entry = self.entries.entry(key).or_insert_with(|| {
            let level = product
                .stock_levels
                .iter()
                .find(|level| level.warehouse_id == warehouse_id);
            Entry {
                original: level.map(|l| l.quantity).unwrap_or(0),
                quantity: level.map(|l| l.quantity).unwrap_or(0),
                version: level.map(|l| l.version),
            }
        });

        let next = entry.quantity + delta;
        if next < 0 {
            return Err(CoreError::InsufficientStock {
                product: product.name.clone(),
                available: entry.quantity,
                requested: -delta,
            });
        }

        entry.quantity = next;
        Ok(Some(next))
    }

    /// Applies a batch of deltas, additions before deductions, so a
    /// revert-then-reapply never fails on an intermediate value the final
    /// state would not have.
    pub fn apply_all(&mut self, deltas: &[StockDelta]) -> CoreResult<()> {
        let mut ordered: Vec<&StockDelta> = deltas.iter().filter(|d| d.delta != 0).collect();
        ordered.sort_by(|a, b| b.delta.cmp(&a.delta));

        for delta in ordered {
            self.adjust(&delta.product_id, &delta.warehouse_id, delta.delta)?;
        }
        Ok(())
    }

    /// Stock writes for every entry whose quantity actually changed.
    pub fn writes(&self) -> Vec<Write> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.quantity != entry.original)
            .map(|((product_id, warehouse_id), entry)| {
                Write::Stock(StockWrite {
                    product_id: product_id.clone(),
                    warehouse_id: warehouse_id.clone(),
                    quantity: entry.quantity,
                    expected_version: entry.version,
                })
            })
            .collect()
    }
}
