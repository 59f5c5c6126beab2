//! Ledger error model.

use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure category, used by callers to decide how to react.
///
/// - `Validation`: malformed request, never retried.
/// - `Conflict`: business-rule failure (e.g. not enough stock); the caller decides (backorder, etc.).
/// - `Concurrency`: contention; safe to retry with backoff.
/// - `Consistency`: internal aggregate mismatch; nothing was persisted, needs manual investigation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Concurrency,
    Consistency,
}

/// Ledger-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A request failed validation (bad quantities, missing batch/serial data, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record (item, movement, check, alert) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An outbound line asked for more than is on hand.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    /// A serial number was not in a state that allows the requested transition.
    #[error("serial {serial_number} is not available (status: {status})")]
    SerialNotAvailable {
        serial_number: String,
        status: String,
    },

    /// A requested batch does not exist on the item.
    #[error("batch not found: {batch_number}")]
    BatchNotFound { batch_number: String },

    /// A lifecycle transition is not legal from the record's current status.
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// A uniqueness or state conflict (e.g. duplicate SKU).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Compare-and-swap failed: the record changed underneath the writer.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// A lock could not be acquired within the configured wait.
    #[error("busy: {0}")]
    Busy(String),

    /// Internal aggregate mismatch (e.g. batch totals != item quantity).
    #[error("consistency violation: {0}")]
    Consistency(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl core::fmt::Debug,
        to: impl core::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.into(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_)
            | LedgerError::NotFound(_)
            | LedgerError::BatchNotFound { .. } => ErrorKind::Validation,
            LedgerError::InsufficientStock { .. }
            | LedgerError::SerialNotAvailable { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::VersionConflict(_) | LedgerError::Busy(_) => ErrorKind::Concurrency,
            LedgerError::Consistency(_) => ErrorKind::Consistency,
        }
    }

    /// Only contention errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}
