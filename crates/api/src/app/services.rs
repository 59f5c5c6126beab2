//! Ledger wiring for the HTTP layer.

use std::path::Path;
use std::sync::Arc;

use stockledger_core::{LedgerError, LedgerResult};
use stockledger_events::InMemorySink;
use stockledger_infra::{
    EngineConfig, InMemoryCatalog, InMemoryLedgerStore, InventoryLedger, LedgerEnvelope,
    LedgerSnapshot, LedgerStore, StoreError,
};

/// In-memory or Postgres, picked at startup.
pub type SharedStore = Arc<dyn LedgerStore>;

pub type Ledger = InventoryLedger<SharedStore>;

/// Everything a handler needs, shared behind one `Arc`.
pub struct AppServices {
    pub ledger: Ledger,
    pub catalog: Arc<InMemoryCatalog>,
    /// Every notification the ledger emitted in this process, in order.
    pub notifications: Arc<InMemorySink<LedgerEnvelope>>,
    pub config: EngineConfig,
}

impl AppServices {
    /// Reads the store to seed numbering, so with Postgres this must run on a
    /// blocking thread.
    pub fn new(store: SharedStore, config: EngineConfig) -> LedgerResult<Self> {
        let catalog = Arc::new(InMemoryCatalog::new());
        let notifications: Arc<InMemorySink<LedgerEnvelope>> = Arc::new(InMemorySink::new());
        let ledger = InventoryLedger::new(store, catalog.clone(), notifications.clone(), &config)?;
        Ok(Self {
            ledger,
            catalog,
            notifications,
            config,
        })
    }

    pub fn in_memory(config: EngineConfig) -> LedgerResult<Self> {
        Self::new(Arc::new(InMemoryLedgerStore::new()), config)
    }

    /// Run a ledger operation off the async executor.
    ///
    /// Ledger calls may block on per-SKU locks (bounded by the configured
    /// lock timeout), so they go through the blocking pool.
    pub async fn run<T, F>(self: &Arc<Self>, op: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&AppServices) -> LedgerResult<T> + Send + 'static,
    {
        let services = self.clone();
        tokio::task::spawn_blocking(move || op(&services))
            .await
            .map_err(|e| LedgerError::consistency(format!("ledger task failed: {e}")))?
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        LedgerSnapshot::capture(&**self.ledger.store())?.write_to(path)
    }
}
