use chrono::{DateTime, Utc};

/// A notification-worthy fact emitted by the ledger.
///
/// Events are immutable and versioned; consumers must tolerate duplicates.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.alert.raised").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the underlying fact happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
