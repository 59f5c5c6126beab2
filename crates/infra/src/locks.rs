//! Keyed exclusive locks with a bounded wait.
//!
//! ## Discipline
//!
//! - A caller acquires **all** keys it needs in one call; keys are taken in
//!   sorted order, so two callers needing overlapping key sets can never
//!   deadlock on each other.
//! - Waiting is bounded: if a key is not free within the timeout, every key
//!   already taken is released and the caller gets `LedgerError::Busy`
//!   (retryable).
//! - Keys are released when the returned guard drops.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use stockledger_core::{LedgerError, LedgerResult};

#[derive(Debug)]
pub struct KeyedLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
    timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Clone + Ord + Hash + Debug,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire every key in `keys` (duplicates are fine), in sorted order.
    pub fn acquire(&self, keys: &[K]) -> LedgerResult<KeyedGuard<'_, K>> {
        let mut wanted = keys.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut guard = KeyedGuard {
            locks: self,
            keys: Vec::with_capacity(wanted.len()),
        };
        let deadline = Instant::now() + self.timeout;

        let mut held = self
            .held
            .lock()
            .map_err(|_| LedgerError::consistency("lock table poisoned"))?;

        for key in wanted {
            while held.contains(&key) {
                let now = Instant::now();
                if now >= deadline {
                    drop(held);
                    warn!(?key, timeout_ms = self.timeout.as_millis() as u64, "lock wait timed out");
                    return Err(LedgerError::busy(format!(
                        "{key:?} is locked by another operation (waited {}ms)",
                        self.timeout.as_millis()
                    )));
                }
                let (next, _) = self
                    .released
                    .wait_timeout(held, deadline - now)
                    .map_err(|_| LedgerError::consistency("lock table poisoned"))?;
                held = next;
            }
            held.insert(key.clone());
            guard.keys.push(key);
        }

        Ok(guard)
    }

    fn release(&self, keys: &[K]) {
        if keys.is_empty() {
            return;
        }
        let mut held = match self.held.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Holds a set of keys until dropped.
#[derive(Debug)]
pub struct KeyedGuard<'a, K>
where
    K: Clone + Ord + Hash + Debug,
{
    locks: &'a KeyedLocks<K>,
    keys: Vec<K>,
}

impl<K> KeyedGuard<'_, K>
where
    K: Clone + Ord + Hash + Debug,
{
    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Clone + Ord + Hash + Debug,
{
    fn drop(&mut self) {
        self.locks.release(&self.keys);
    }
}
