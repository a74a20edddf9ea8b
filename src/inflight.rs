//! Registry of in-flight idempotent reads.
//!
//! Concurrent callers that issue the same GET share one attempt sequence: the
//! first caller registers a pending result under the request's canonical key
//! and every later caller with the same key awaits that same result. The entry
//! is removed when the result settles, successfully or not.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// A pending result that any number of callers can await.
pub type SharedResult<T> = Shared<BoxFuture<'static, T>>;

/// Whether a lookup joined an existing entry or started a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// An attempt sequence for the key was already in flight.
    Joined,
    /// This caller started the attempt sequence.
    Started,
}

/// Maps canonical request keys to pending results.
///
/// Lookup and insertion happen under one lock with no suspension point in
/// between, so two callers can never both observe "no entry" for a key and
/// both start an attempt sequence.
pub struct InFlightRegistry<T: Clone> {
    entries: Mutex<HashMap<String, SharedResult<T>>>,
}

impl<T: Clone> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> InFlightRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending result for `key`, registering the future produced by
    /// `start` if there is none.
    ///
    /// `start` runs inside the critical section and must not block. The future
    /// it returns is responsible for calling [`remove`](Self::remove) when it
    /// settles.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (SharedResult<T>, Registration)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = entries.get(key) {
            return (pending.clone(), Registration::Joined);
        }

        let pending = start().shared();
        entries.insert(key.to_string(), pending.clone());
        (pending, Registration::Started)
    }

    /// Removes the entry for `key`. Returns `false` if there was none.
    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Returns `true` if an attempt sequence is in flight for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
