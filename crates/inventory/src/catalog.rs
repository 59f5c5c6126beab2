//! Catalog lookup contract.

use serde::{Deserialize, Serialize};

use stockledger_core::ProductId;

/// Display metadata for a product, denormalized onto movements and alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMeta {
    pub name: String,
    pub sku: String,
}

/// Read-only product lookup owned by another subsystem.
///
/// A missing entry is not an error for the ledger; display fields stay empty.
pub trait Catalog: Send + Sync {
    fn product_meta(&self, product_id: ProductId) -> Option<ProductMeta>;
}

impl<C> Catalog for std::sync::Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product_meta(&self, product_id: ProductId) -> Option<ProductMeta> {
        (**self).product_meta(product_id)
    }
}
