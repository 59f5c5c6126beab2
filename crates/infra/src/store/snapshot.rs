//! JSON snapshots of the in-memory store.
//!
//! A snapshot is a point-in-time copy of all four tables, versions included.
//! It is written to a temp file and renamed into place so a crash mid-write
//! never leaves a truncated snapshot behind.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_inventory::{InventoryItem, StockAlert, StockCheck, StockMovement};

use super::in_memory::{InMemoryLedgerStore, InMemoryTable};
use super::r#trait::{LedgerStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub items: Vec<InventoryItem>,
    pub movements: Vec<StockMovement>,
    pub checks: Vec<StockCheck>,
    pub alerts: Vec<StockAlert>,
}

impl LedgerSnapshot {
    /// Copy every table. Each table is read atomically; tables are read one
    /// after another, so take snapshots while the ledger is quiescent.
    pub fn capture(store: &dyn LedgerStore) -> Result<Self, StoreError> {
        Ok(Self {
            taken_at: Utc::now(),
            items: store.items().list()?,
            movements: store.movements().list()?,
            checks: store.checks().list()?,
            alerts: store.alerts().list()?,
        })
    }

    pub fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a snapshot; `Ok(None)` if the file does not exist yet.
    pub fn read_from(path: &Path) -> Result<Option<Self>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl InMemoryLedgerStore {
    /// Rebuild a store from a snapshot, keeping record versions.
    pub fn restore(snapshot: LedgerSnapshot) -> Self {
        Self {
            items: InMemoryTable::with_records(snapshot.items),
            movements: InMemoryTable::with_records(snapshot.movements),
            checks: InMemoryTable::with_records(snapshot.checks),
            alerts: InMemoryTable::with_records(snapshot.alerts),
        }
    }

    /// Restore from `path`, or start empty if there is no snapshot yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(LedgerSnapshot::read_from(path)?
            .map(Self::restore)
            .unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        LedgerSnapshot::capture(self)?.write_to(path)
    }
}
