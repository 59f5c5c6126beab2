//! `stockledger-core` — foundation building blocks shared by every ledger crate.
//!
//! This crate contains **pure** primitives (no storage, no locking, no IO).

pub mod error;
pub mod id;
pub mod record;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use id::{AlertId, CheckId, ItemId, MovementId, ProductId, UserId};
pub use record::{ExpectedVersion, Record};
