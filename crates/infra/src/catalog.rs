//! In-memory catalog lookup.

use std::collections::HashMap;
use std::sync::RwLock;

use stockledger_core::ProductId;
use stockledger_inventory::{Catalog, ProductMeta};

/// Catalog backed by a map; stands in for the product subsystem in tests and
/// the standalone server.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductMeta>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product_id: ProductId, meta: ProductMeta) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product_id, meta);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn product_meta(&self, product_id: ProductId) -> Option<ProductMeta> {
        self.products.read().ok()?.get(&product_id).cloned()
    }
}
