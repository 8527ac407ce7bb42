//! In-flight fetch slots
//!
//! One slot exists per key while its fetch runs. The caller that created the
//! slot performs the fetch and publishes the outcome; every other caller for
//! the same key blocks on the slot until then. A detached slot still serves
//! its waiters, but its content is not stored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::CacheError;

/// Outcome shared by the leader of a fetch with all of its waiters
pub(crate) type SharedOutcome = Result<Bytes, CacheError>;

pub(crate) struct Flight {
    outcome: Mutex<Option<SharedOutcome>>,
    ready: Condvar,
    /// Set by invalidation while the fetch runs
    detached: AtomicBool,
}

impl Flight {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            detached: AtomicBool::new(false),
        }
    }

    /// Mark the outcome as not to be stored
    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Publish the outcome and wake every waiter. Only the first call counts.
    pub(crate) fn publish(&self, outcome: SharedOutcome) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.ready.notify_all();
    }

    /// Block until the outcome is published
    pub(crate) fn wait(&self) -> SharedOutcome {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SharedOutcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
