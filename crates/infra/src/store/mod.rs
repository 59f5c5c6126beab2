//! Ledger store: keyed records with per-key compare-and-swap.

mod in_memory;
mod postgres;
mod snapshot;
mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryTable};
pub use postgres::{PgTable, PostgresLedgerStore};
pub use r#trait::{LedgerStore, RecordTable, StoreError};
pub use snapshot::LedgerSnapshot;
