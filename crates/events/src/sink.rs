//! Notification sink contract.
//!
//! A sink receives ledger notifications (alerts, completed movements, ...).
//! Delivery is best-effort from the ledger's point of view: a failing sink is
//! logged by the publisher and never rolls back a committed stock mutation.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use thiserror::Error;

/// Delivery failure reported by a sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification delivery failed: {0}")]
pub struct SinkError(pub String);

/// Receiving end of a sink subscription.
///
/// Each subscription gets its own copy of every message delivered after it was
/// created. Meant to be drained by a single consumer thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Destination for ledger notifications.
///
/// Implementations must be safe to call from many threads at once.
pub trait NotificationSink<M>: Send + Sync {
    fn notify(&self, message: M) -> Result<(), SinkError>;
}

impl<M, S> NotificationSink<M> for Arc<S>
where
    S: NotificationSink<M> + ?Sized,
{
    fn notify(&self, message: M) -> Result<(), SinkError> {
        (**self).notify(message)
    }
}
