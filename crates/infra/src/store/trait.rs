use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use stockledger_core::{ExpectedVersion, LedgerError, Record};
use stockledger_inventory::{InventoryItem, StockAlert, StockCheck, StockMovement};

/// Store operation error.
///
/// These are **infrastructure errors** (concurrency, storage, snapshot IO), as
/// opposed to ledger rule violations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-swap failed: the stored version is not the expected one.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A write batch was malformed (e.g. the same key twice).
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    /// The backing storage is unusable (poisoned lock, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::VersionConflict(msg),
            other => LedgerError::consistency(other.to_string()),
        }
    }
}

/// One table of versioned records.
///
/// Every successful write bumps the record's version by one (first insert is
/// version 1). Writes check [`ExpectedVersion`] against the stored version;
/// an absent record has version 0.
pub trait RecordTable<R: Record>: Send + Sync {
    fn get(&self, key: R::Key) -> Result<Option<R>, StoreError>;

    /// All records, ordered by key.
    fn list(&self) -> Result<Vec<R>, StoreError>;

    /// Write several records atomically.
    ///
    /// Every expectation is checked before anything is written; on the first
    /// mismatch the whole batch is rejected and the table is unchanged.
    /// Returns the stored records (with their new versions) in input order.
    fn put_all(&self, writes: Vec<(R, ExpectedVersion)>) -> Result<Vec<R>, StoreError>;

    fn put(&self, record: R, expected: ExpectedVersion) -> Result<R, StoreError> {
        self.put_all(vec![(record, expected)])?
            .pop()
            .ok_or_else(|| StoreError::Unavailable(format!("empty result writing {}", R::KIND)))
    }
}

/// The four ledger tables.
///
/// Created once at process start and injected into the engines; there is no
/// other ledger state.
pub trait LedgerStore: Send + Sync {
    /// Inventory items, keyed by product id (one item per SKU).
    fn items(&self) -> &dyn RecordTable<InventoryItem>;
    fn movements(&self) -> &dyn RecordTable<StockMovement>;
    fn checks(&self) -> &dyn RecordTable<StockCheck>;
    fn alerts(&self) -> &dyn RecordTable<StockAlert>;

    /// Commit a completed movement together with the items it changed.
    ///
    /// Item rows and the movement row land in one atomic write: either all
    /// expectations hold and everything is stored, or nothing is.
    fn commit_movement(
        &self,
        items: Vec<(InventoryItem, ExpectedVersion)>,
        movement: (StockMovement, ExpectedVersion),
    ) -> Result<(Vec<InventoryItem>, StockMovement), StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn items(&self) -> &dyn RecordTable<InventoryItem> {
        (**self).items()
    }

    fn movements(&self) -> &dyn RecordTable<StockMovement> {
        (**self).movements()
    }

    fn checks(&self) -> &dyn RecordTable<StockCheck> {
        (**self).checks()
    }

    fn alerts(&self) -> &dyn RecordTable<StockAlert> {
        (**self).alerts()
    }

    fn commit_movement(
        &self,
        items: Vec<(InventoryItem, ExpectedVersion)>,
        movement: (StockMovement, ExpectedVersion),
    ) -> Result<(Vec<InventoryItem>, StockMovement), StoreError> {
        (**self).commit_movement(items, movement)
    }
}

/// Rejects a batch that names the same key twice.
pub(crate) fn ensure_distinct_keys<R: Record>(
    writes: &[(R, ExpectedVersion)],
) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(writes.len());
    for (record, _) in writes {
        if !seen.insert(record.key()) {
            return Err(StoreError::InvalidWrite(format!(
                "{} {} appears twice in one batch",
                R::KIND,
                record.key()
            )));
        }
    }
    Ok(())
}
