//! Typed observer lists.
//!
//! Callbacks are invoked synchronously, outside the list lock, and each one
//! is isolated: a panicking subscriber is logged and the rest still run.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`Subscribers::subscribe`].
///
/// Ids are unique across every list in the process, so one id can be
/// offered to several lists when the caller does not know which owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// Callback type for typed subscriptions.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub struct Subscribers<E> {
    entries: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .expect("subscribers mutex poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns true if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().expect("subscribers mutex poisoned");
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Deliver `event` to every subscriber; returns how many returned normally.
    pub fn notify(&self, event: &E) -> usize {
        let callbacks: Vec<(SubscriptionId, Callback<E>)> = self
            .entries
            .lock()
            .expect("subscribers mutex poisoned")
            .clone();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!(subscription = ?id, "Subscriber panicked; continuing"),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("subscribers mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("subscribers mutex poisoned")
            .clear();
    }
}
