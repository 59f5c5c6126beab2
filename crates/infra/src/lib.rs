//! Infrastructure layer: storage, locking, numbering, notification and the
//! engines that orchestrate the inventory domain on top of them.

pub mod alert_generator;
pub mod catalog;
pub mod check_engine;
pub mod config;
pub mod fulfillment;
pub mod ledger;
pub mod locks;
pub mod movement_engine;
pub mod notifier;
pub mod retry;
pub mod sequence;
pub mod store;


pub use alert_generator::AlertGenerator;
pub use catalog::InMemoryCatalog;
pub use check_engine::CheckEngine;
pub use config::EngineConfig;
pub use fulfillment::{FulfillmentOutcome, OrderFulfillment, OrderLine, Shortage};
pub use ledger::InventoryLedger;
pub use locks::{KeyedGuard, KeyedLocks};
pub use movement_engine::MovementEngine;
pub use notifier::{LedgerEnvelope, Notifier, SharedSink};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use sequence::DailySequence;
pub use store::{
    InMemoryLedgerStore, LedgerSnapshot, LedgerStore, PostgresLedgerStore, RecordTable, StoreError,
};
