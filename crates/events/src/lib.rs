//! Ledger notifications: events, envelopes and the sink contract.
//!
//! The engine never depends on *how* a notification is delivered (persisted,
//! emailed, pushed). It only hands sequenced envelopes to a [`NotificationSink`].

pub mod envelope;
pub mod event;
pub mod in_memory_sink;
pub mod sink;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_sink::InMemorySink;
pub use sink::{NotificationSink, SinkError, Subscription};
