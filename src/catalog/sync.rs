//! Incremental catalog sync: pulls only records created or modified since
//! the stored watermark and merges them into the live snapshot by id.
//!
//! Persistence order is deliberate: the snapshot file write and the
//! in-memory swap must both succeed before the new watermark (captured at
//! sync start) is written. A crash in between replays the same delta on
//! the next run, which the merge-by-id makes harmless.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde_json::{json, Value};

use crate::erp::ErpClient;
use crate::fsio;
use crate::models::{Customer, Product};

use super::{CatalogError, CatalogStore, SyncError};

/// The ERP requires naive UTC timestamps, no offset suffix.
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BATCH_SIZE: usize = 500;

const PRODUCT_MODEL: &str = "product.product";
const PRODUCT_FIELDS: &[&str] = &["default_code", "name", "list_price", "standard_price", "write_date"];

const CUSTOMER_MODEL: &str = "res.partner";
const CUSTOMER_FIELDS: &[&str] = &["ref", "name", "email", "phone", "street", "write_date"];

/// Counts reported by one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    pub customers_synced: usize,
    pub products_synced: usize,
}

/// Pulls deltas from the ERP and merges them into the catalog store.
pub struct CatalogSync {
    store: Arc<CatalogStore>,
    erp: Arc<dyn ErpClient>,
    watermark_path: PathBuf,
}

impl CatalogSync {
    pub fn new(store: Arc<CatalogStore>, erp: Arc<dyn ErpClient>, catalog_dir: &Path) -> Self {
        Self {
            store,
            erp,
            watermark_path: catalog_dir.join("watermark.txt"),
        }
    }

    /// Run one sync pass. Missing watermark performs the full baseline.
    pub fn sync(&self) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now().naive_utc();
        let watermark = self.read_watermark()?;

        match &watermark {
            Some(wm) => tracing::info!(watermark = %format_watermark(*wm), "Incremental sync starting"),
            None => tracing::info!("No watermark — running full baseline sync"),
        }

        let product_rows = self.pull_all(PRODUCT_MODEL, PRODUCT_FIELDS, watermark.as_ref())?;
        let customer_rows = self.pull_all(CUSTOMER_MODEL, CUSTOMER_FIELDS, watermark.as_ref())?;

        let products: Vec<Product> = product_rows
            .iter()
            .map(parse_product)
            .collect::<Result<_, _>>()?;
        let customers: Vec<Customer> = customer_rows
            .iter()
            .map(parse_customer)
            .collect::<Result<_, _>>()?;

        let report = SyncReport {
            customers_synced: customers.len(),
            products_synced: products.len(),
        };

        if report.products_synced > 0 || report.customers_synced > 0 {
            let snapshot = self.store.snapshot();
            let merged_products = merge_by_id(
                snapshot.all_products().to_vec(),
                products,
                |p| p.id,
            );
            let merged_customers = merge_by_id(
                snapshot.all_customers().to_vec(),
                customers,
                |c| c.id,
            );
            self.store.install(merged_products, merged_customers)?;
        }

        // Snapshot persisted and swapped — only now advance the watermark.
        self.write_watermark(started_at)?;

        tracing::info!(
            products = report.products_synced,
            customers = report.customers_synced,
            "Sync complete"
        );
        Ok(report)
    }

    fn pull_all(
        &self,
        model: &str,
        fields: &[&str],
        watermark: Option<&NaiveDateTime>,
    ) -> Result<Vec<Value>, SyncError> {
        let domain = match watermark {
            Some(wm) => {
                let wm = format_watermark(*wm);
                json!([
                    "|",
                    ["create_date", ">", wm],
                    ["write_date", ">", wm]
                ])
            }
            None => json!([]),
        };

        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .erp
                .search_read(model, &domain, fields, offset, BATCH_SIZE)
                .map_err(|e| {
                    if e.is_transient() {
                        SyncError::Transient(format!("{model}: {e}"))
                    } else {
                        SyncError::Fatal(format!("{model}: {e}"))
                    }
                })?;

            let page_len = page.len();
            rows.extend(page);
            if page_len < BATCH_SIZE {
                break;
            }
            offset += BATCH_SIZE;
        }
        Ok(rows)
    }

    fn read_watermark(&self) -> Result<Option<NaiveDateTime>, SyncError> {
        if !self.watermark_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.watermark_path)
            .map_err(|e| SyncError::Catalog(CatalogError::Io(e)))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        parse_watermark(trimmed)
            .map(Some)
            .ok_or_else(|| SyncError::Fatal(format!("Unparseable watermark: {trimmed:?}")))
    }

    fn write_watermark(&self, value: NaiveDateTime) -> Result<(), SyncError> {
        fsio::write_atomic(&self.watermark_path, format_watermark(value).as_bytes())
            .map_err(|e| SyncError::Catalog(CatalogError::Fs(e)))
    }
}

pub fn format_watermark(ts: NaiveDateTime) -> String {
    ts.format(WATERMARK_FORMAT).to_string()
}

pub fn parse_watermark(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), WATERMARK_FORMAT).ok()
}

/// Update-if-present-else-append merge.
fn merge_by_id<T, F: Fn(&T) -> i64>(mut base: Vec<T>, delta: Vec<T>, id_of: F) -> Vec<T> {
    for incoming in delta {
        match base.iter_mut().find(|existing| id_of(existing) == id_of(&incoming)) {
            Some(slot) => *slot = incoming,
            None => base.push(incoming),
        }
    }
    base
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

/// Odoo serializes null-ish fields as `false`; treat that as absent.
fn opt_str(row: &Value, field: &str) -> Option<String> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn opt_f64(row: &Value, field: &str) -> Option<f64> {
    row.get(field).and_then(Value::as_f64)
}

fn require_id(row: &Value, model: &str) -> Result<i64, SyncError> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| SyncError::Fatal(format!("{model} row without integer id: {row}")))
}

fn parse_product(row: &Value) -> Result<Product, SyncError> {
    let id = require_id(row, PRODUCT_MODEL)?;
    let name = opt_str(row, "name")
        .ok_or_else(|| SyncError::Fatal(format!("{PRODUCT_MODEL} row {id} without name")))?;

    Ok(Product {
        id,
        code: opt_str(row, "default_code"),
        name,
        list_price: opt_f64(row, "list_price").unwrap_or(0.0),
        standard_price: opt_f64(row, "standard_price").unwrap_or(0.0),
        updated_at: opt_str(row, "write_date").and_then(|s| parse_watermark(&s)),
    })
}

fn parse_customer(row: &Value) -> Result<Customer, SyncError> {
    let id = require_id(row, CUSTOMER_MODEL)?;
    let name = opt_str(row, "name")
        .ok_or_else(|| SyncError::Fatal(format!("{CUSTOMER_MODEL} row {id} without name")))?;

    Ok(Customer {
        id,
        customer_ref: opt_str(row, "ref"),
        name,
        email: opt_str(row, "email"),
        phone: opt_str(row, "phone"),
        address: opt_str(row, "street"),
        updated_at: opt_str(row, "write_date").and_then(|s| parse_watermark(&s)),
    })
}
