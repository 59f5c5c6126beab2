//! Inventory ledger domain.
//!
//! Business rules for stock items, movements, stock checks and alerts,
//! implemented as deterministic domain logic (no IO, no locking, no storage).
//! Orchestration (locks, persistence, notifications) lives in `stockledger-infra`.

pub mod alert;
pub mod catalog;
pub mod check;
pub mod events;
pub mod item;
pub mod movement;
pub mod numbering;
pub mod status;
pub mod tracking;

pub use alert::{
    AlertDraft, AlertFilter, AlertSeverity, AlertState, AlertType, StockAlert, discrepancy_alert,
    expiring_alert, threshold_alert,
};
pub use catalog::{Catalog, ProductMeta};
pub use check::{
    CheckScope, CheckStatus, CountEntry, StockCheck, StockCheckItem, validate_counted_serials,
};
pub use events::LedgerEvent;
pub use item::{BatchInfo, InventoryItem, NewItem, SerialInfo, SerialStatus, TrackingType};
pub use movement::{
    LineDirection, MovementFilter, MovementHistory, MovementLineRequest, MovementReference,
    MovementRequest, MovementStatus, MovementSubType, MovementType, StockMovement,
    StockMovementItem,
};
pub use numbering::{CHECK_PREFIX, format_number, parse_number};
pub use status::{StockStatus, evaluate_status};
pub use tracking::{BatchConsumption, ExpiredStock, LineContext, LineEffect, apply_line};
