//! In-memory notification sink for tests/dev.

use std::sync::{Mutex, mpsc};

use crate::sink::{NotificationSink, SinkError, Subscription};

/// Records every delivered message and fans it out to live subscribers.
///
/// - No IO
/// - Dead subscribers are dropped on the next delivery
#[derive(Debug)]
pub struct InMemorySink<M> {
    delivered: Mutex<Vec<M>>,
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemorySink<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemorySink<M> {
    fn default() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M: Clone> InMemorySink<M> {
    /// Every message delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<M> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        Subscription::new(rx)
    }
}

impl<M> NotificationSink<M> for InMemorySink<M>
where
    M: Clone + Send + 'static,
{
    fn notify(&self, message: M) -> Result<(), SinkError> {
        {
            let mut subs = self
                .subscribers
                .lock()
                .map_err(|_| SinkError("subscriber list poisoned".to_string()))?;
            subs.retain(|tx| tx.send(message.clone()).is_ok());
        }

        self.delivered
            .lock()
            .map_err(|_| SinkError("delivery log poisoned".to_string()))?
            .push(message);

        Ok(())
    }
}
