//! Versioned records and compare-and-swap expectations.

use crate::error::{LedgerError, LedgerResult};

/// A persisted ledger record.
///
/// Every write through a ledger store bumps `version` by one, starting at 1 for
/// the first insert. `0` therefore means "never stored".
pub trait Record: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Key the record is stored under.
    type Key: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync;

    /// Stable table name (used in error messages and snapshots).
    const KIND: &'static str;

    fn key(&self) -> Self::Key;

    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);
}

/// Optimistic concurrency expectation for a write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the stored record to be at an exact version (`Exact(0)`: must not exist yet).
    Exact(u64),
}

impl ExpectedVersion {
    /// Expect the record not to exist yet.
    pub const ABSENT: ExpectedVersion = ExpectedVersion::Exact(0);

    /// Expect the store to still hold exactly this record's version.
    pub fn of<R: Record>(record: &R) -> Self {
        ExpectedVersion::Exact(record.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> LedgerResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(LedgerError::VersionConflict(format!(
                "expected {self:?}, actual {actual}"
            )))
        }
    }
}
