//! Best-effort delivery of ledger events to the notification sink.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use stockledger_events::{EventEnvelope, NotificationSink};
use stockledger_inventory::LedgerEvent;

pub type LedgerEnvelope = EventEnvelope<LedgerEvent>;

/// Shared, thread-safe handle to whatever consumes ledger events.
pub type SharedSink = Arc<dyn NotificationSink<LedgerEnvelope>>;

/// Wraps events in sequenced envelopes and hands them to the sink.
///
/// Publishing never fails from the caller's point of view: sink errors are
/// logged and dropped, so a broken sink can never undo a committed stock
/// change. Envelopes are delivered in sequence order.
pub struct Notifier {
    sink: SharedSink,
    sequence: Mutex<u64>,
}

impl Notifier {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            sequence: Mutex::new(0),
        }
    }

    pub fn publish(&self, event: LedgerEvent) {
        let mut sequence = match self.sequence.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        *sequence += 1;
        let envelope = EventEnvelope::wrap(*sequence, event);
        let event_type = envelope.event_type().to_string();

        match self.sink.notify(envelope) {
            Ok(()) => debug!(event_type, sequence = *sequence, "notification delivered"),
            Err(e) => warn!(event_type, sequence = *sequence, error = %e, "notification dropped"),
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
