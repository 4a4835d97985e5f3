//! In-memory, file-backed snapshot of products and customers.
//!
//! Readers clone an `Arc<Snapshot>` and work against an immutable view;
//! the single writer (incremental sync) builds a fresh snapshot, persists
//! it, and swaps it in atomically. A reader can therefore never observe a
//! partially merged catalog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::fsio;
use crate::models::{Customer, Product};

use super::CatalogError;

/// Immutable catalog view with lookup indexes.
#[derive(Debug, Default)]
pub struct Snapshot {
    products: Vec<Product>,
    customers: Vec<Customer>,
    product_by_id: HashMap<i64, usize>,
    /// Keyed by trimmed code (case-exact).
    product_by_code: HashMap<String, usize>,
    customer_by_id: HashMap<i64, usize>,
    /// Auxiliary index: lowercased customer name → index.
    customer_by_name: HashMap<String, usize>,
}

impl Snapshot {
    /// Build a snapshot, normalizing codes (trim) and name indexes
    /// (lowercase) on ingest.
    pub fn build(mut products: Vec<Product>, customers: Vec<Customer>) -> Self {
        for p in &mut products {
            if let Some(code) = &p.code {
                let trimmed = code.trim();
                let trimmed_len = trimmed.len();
                let trimmed_empty = trimmed.is_empty();
                let trimmed_owned = trimmed.to_string();
                if trimmed_len != code.len() {
                    p.code = Some(trimmed_owned);
                }
                if trimmed_empty {
                    p.code = None;
                }
            }
        }

        let mut product_by_id = HashMap::with_capacity(products.len());
        let mut product_by_code = HashMap::new();
        for (idx, p) in products.iter().enumerate() {
            product_by_id.insert(p.id, idx);
            if let Some(code) = p.trimmed_code() {
                product_by_code.insert(code.to_string(), idx);
            }
        }

        let mut customer_by_id = HashMap::with_capacity(customers.len());
        let mut customer_by_name = HashMap::new();
        for (idx, c) in customers.iter().enumerate() {
            customer_by_id.insert(c.id, idx);
            customer_by_name.insert(c.name.trim().to_lowercase(), idx);
        }

        Self {
            products,
            customers,
            product_by_id,
            product_by_code,
            customer_by_id,
            customer_by_name,
        }
    }

    pub fn product_by_id(&self, id: i64) -> Option<&Product> {
        self.product_by_id.get(&id).map(|&i| &self.products[i])
    }

    /// Trimmed, case-exact code lookup. Trailing whitespace on either
    /// side never causes a miss.
    pub fn product_by_code(&self, code: &str) -> Option<&Product> {
        self.product_by_code
            .get(code.trim())
            .map(|&i| &self.products[i])
    }

    pub fn search_code_prefix(&self, prefix: &str) -> Vec<&Product> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<&Product> = self
            .products
            .iter()
            .filter(|p| p.trimmed_code().is_some_and(|c| c.starts_with(prefix)))
            .collect();
        hits.sort_by_key(|p| p.id);
        hits
    }

    pub fn all_products(&self) -> &[Product] {
        &self.products
    }

    pub fn all_customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn customer_by_id(&self, id: i64) -> Option<&Customer> {
        self.customer_by_id.get(&id).map(|&i| &self.customers[i])
    }

    /// Lowercased, trimmed exact-name lookup.
    pub fn customer_by_name(&self, name: &str) -> Option<&Customer> {
        self.customer_by_name
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.customers[i])
    }

    /// Customers whose lowercased name contains the lowercased needle.
    pub fn search_customer_contains(&self, needle: &str) -> Vec<&Customer> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.customers
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }
}

/// Thread-safe catalog store: many readers, one writer.
pub struct CatalogStore {
    snapshot: RwLock<Arc<Snapshot>>,
    products_path: PathBuf,
    customers_path: PathBuf,
}

impl CatalogStore {
    /// Load both JSON snapshots from the catalog directory. Missing files
    /// yield an empty catalog (first sync performs the full baseline).
    pub fn load(catalog_dir: &Path) -> Result<Self, CatalogError> {
        let products_path = catalog_dir.join("products.json");
        let customers_path = catalog_dir.join("customers.json");

        let products = load_records::<Product>(&products_path)?;
        let customers = load_records::<Customer>(&customers_path)?;

        tracing::info!(
            products = products.len(),
            customers = customers.len(),
            dir = %catalog_dir.display(),
            "Catalog loaded"
        );

        Ok(Self {
            snapshot: RwLock::new(Arc::new(Snapshot::build(products, customers))),
            products_path,
            customers_path,
        })
    }

    /// Current immutable snapshot. Cheap; hold it for the duration of a
    /// request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Persist a new catalog and swap it in. The file writes happen
    /// before the in-memory swap; both must succeed.
    pub fn install(
        &self,
        products: Vec<Product>,
        customers: Vec<Customer>,
    ) -> Result<(), CatalogError> {
        let next = Snapshot::build(products, customers);

        fsio::write_json_atomic(&self.products_path, &next.products)?;
        fsio::write_json_atomic(&self.customers_path, &next.customers)?;

        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
        Ok(())
    }

    /// Modification time of the products snapshot file — the embedding
    /// cache key incorporates this so a catalog change invalidates it.
    pub fn products_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.products_path)
            .and_then(|m| m.modified())
            .ok()
    }

    pub fn products_path(&self) -> &Path {
        &self.products_path
    }
}

fn load_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, CatalogError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| CatalogError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: i64, code: &str, name: &str) -> Product {
        Product {
            id,
            code: Some(code.into()),
            name: name.into(),
            list_price: 10.0,
            standard_price: 8.0,
            updated_at: None,
        }
    }

    fn customer(id: i64, name: &str) -> Customer {
        Customer {
            id,
            customer_ref: None,
            name: name.into(),
            email: None,
            phone: None,
            address: None,
            updated_at: None,
        }
    }

    #[test]
    fn code_lookup_trims_both_sides() {
        let snap = Snapshot::build(vec![product(1, "3M9353R ", "Splice tape")], vec![]);
        // Trailing whitespace on the stored code never causes a miss.
        assert_eq!(snap.product_by_code("3M9353R").unwrap().id, 1);
        assert_eq!(snap.product_by_code(" 3M9353R ").unwrap().id, 1);
    }

    #[test]
    fn code_lookup_is_case_exact() {
        let snap = Snapshot::build(vec![product(1, "L1520-457", "Blade")], vec![]);
        assert!(snap.product_by_code("l1520-457").is_none());
        assert!(snap.product_by_code("L1520-457").is_some());
    }

    #[test]
    fn prefix_search_ordered_by_id() {
        let snap = Snapshot::build(
            vec![
                product(3, "L1520-600", "Blade 600"),
                product(1, "L1520-457", "Blade 457"),
                product(2, "X900", "Other"),
            ],
            vec![],
        );
        let hits = snap.search_code_prefix("L1520");
        assert_eq!(hits.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn customer_name_lookup_case_insensitive() {
        let snap = Snapshot::build(vec![], vec![customer(7, "Schur Star Systems GmbH")]);
        assert_eq!(
            snap.customer_by_name("schur star systems gmbh").unwrap().id,
            7
        );
        assert_eq!(
            snap.customer_by_name("  Schur Star Systems GmbH ").unwrap().id,
            7
        );
    }

    #[test]
    fn load_missing_files_gives_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::load(dir.path()).unwrap();
        assert_eq!(store.snapshot().product_count(), 0);
        assert_eq!(store.snapshot().customer_count(), 0);
    }

    #[test]
    fn install_persists_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::load(dir.path()).unwrap();
        let old = store.snapshot();

        store
            .install(vec![product(1, "A1", "First")], vec![customer(2, "Acme")])
            .unwrap();

        // Old snapshot is untouched, new one is visible.
        assert_eq!(old.product_count(), 0);
        let now = store.snapshot();
        assert_eq!(now.product_count(), 1);
        assert_eq!(now.customer_count(), 1);

        // Reload from disk sees the same ids.
        let reloaded = CatalogStore::load(dir.path()).unwrap();
        assert!(reloaded.snapshot().product_by_id(1).is_some());
        assert!(reloaded.snapshot().customer_by_id(2).is_some());
    }

    #[test]
    fn readers_keep_old_snapshot_across_swap() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::load(dir.path()).unwrap();
        store.install(vec![product(1, "A1", "First")], vec![]).unwrap();

        let held = store.snapshot();
        store
            .install(vec![product(1, "A1", "First"), product(2, "B2", "Second")], vec![])
            .unwrap();

        assert_eq!(held.product_count(), 1);
        assert_eq!(store.snapshot().product_count(), 2);
    }

    #[test]
    fn blank_codes_dropped_from_index() {
        let snap = Snapshot::build(
            vec![Product {
                id: 9,
                code: Some("   ".into()),
                name: "Nameless".into(),
                list_price: 0.0,
                standard_price: 0.0,
                updated_at: None,
            }],
            vec![],
        );
        assert!(snap.product_by_code("").is_none());
        assert!(snap.product_by_id(9).is_some());
    }
}
