//! Cancellation signals.
//!
//! A caller may hand a [`CancelSignal`] to a request. For every attempt the
//! client derives a [`ComposedSignal`] that fires as soon as either the caller's
//! signal fires or the request deadline elapses, whichever comes first.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a composed signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's signal fired.
    Cancelled,
    /// The deadline elapsed.
    TimedOut,
}

/// A caller-controlled cancellation signal.
///
/// Clones share the same underlying state, so one clone can be passed to a
/// request while another is kept to cancel it.
///
/// # Examples
///
/// ```
/// use compliance_client::CancelSignal;
///
/// let signal = CancelSignal::new();
/// let handle = signal.clone();
///
/// handle.cancel();
/// assert!(signal.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// Creates a signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Subsequent calls have no effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl From<CancellationToken> for CancelSignal {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

/// Identifies a listener registered with [`ComposedSignal::on_fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnOnce(CancelReason) + Send>;

struct Shared {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
    listeners: Mutex<Listeners>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    pending: Vec<(ListenerId, Listener)>,
}

impl Shared {
    /// Records the first reason and notifies listeners. Later calls are no-ops.
    fn fire(&self, reason: CancelReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();

        let pending = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut listeners.pending)
        };
        for (_, listener) in pending {
            listener(reason);
        }
        true
    }
}

/// The union of an optional caller signal and a deadline.
///
/// The composed signal fires at most once. Its watcher task, which holds the
/// deadline timer and the subscription to the caller's signal, is aborted by
/// [`release`](ComposedSignal::release) or on drop, so finished requests leave
/// neither a pending timer nor a listener behind.
pub struct ComposedSignal {
    shared: Arc<Shared>,
    watcher: Option<JoinHandle<()>>,
}

impl ComposedSignal {
    /// Composes `external` with a deadline of `timeout` from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(external: Option<&CancelSignal>, timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
            listeners: Mutex::new(Listeners::default()),
        });

        if external.is_some_and(CancelSignal::is_cancelled) {
            shared.fire(CancelReason::Cancelled);
            return Self {
                shared,
                watcher: None,
            };
        }

        let external = external.map(|signal| signal.token.clone());
        let watched = Arc::clone(&shared);
        let watcher = tokio::spawn(async move {
            let reason = match external {
                Some(external) => tokio::select! {
                    _ = external.cancelled() => CancelReason::Cancelled,
                    _ = tokio::time::sleep(timeout) => CancelReason::TimedOut,
                },
                None => {
                    tokio::time::sleep(timeout).await;
                    CancelReason::TimedOut
                }
            };
            watched.fire(reason);
        });

        Self {
            shared,
            watcher: Some(watcher),
        }
    }

    /// Returns `true` once either source has fired.
    pub fn is_fired(&self) -> bool {
        self.shared.reason.get().is_some()
    }

    /// The source that fired first, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        self.shared.reason.get().copied()
    }

    /// Completes when the signal fires, yielding the reason.
    pub async fn fired(&self) -> CancelReason {
        self.shared.token.cancelled().await;
        self.reason().unwrap_or(CancelReason::Cancelled)
    }

    /// Registers a callback to run when the signal fires.
    ///
    /// If the signal has already fired the callback runs immediately.
    pub fn on_fire<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(CancelReason) + Send + 'static,
    {
        let mut listeners = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;

        // Checked under the lock so a concurrent fire() cannot miss this listener.
        match self.reason() {
            Some(reason) => {
                drop(listeners);
                listener(reason);
            }
            None => listeners.pending.push((id, Box::new(listener))),
        }
        id
    }

    /// Unregisters a listener. Returns `false` if it already ran or was removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.pending.len();
        listeners.pending.retain(|(existing, _)| *existing != id);
        listeners.pending.len() != before
    }

    /// Stops watching both sources and drops every pending listener.
    ///
    /// After release the signal can no longer fire.
    pub fn release(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .clear();
    }

    /// Returns `true` while the watcher is still armed.
    pub fn is_armed(&self) -> bool {
        self.watcher
            .as_ref()
            .is_some_and(|watcher| !watcher.is_finished())
    }
}

impl Drop for ComposedSignal {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ComposedSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedSignal")
            .field("reason", &self.reason())
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let signal = ComposedSignal::new(None, Duration::from_millis(100));
        assert!(!signal.is_fired());

        assert_eq!(signal.fired().await, CancelReason::TimedOut);
        assert_eq!(signal.reason(), Some(CancelReason::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_fires_before_timeout() {
        let external = CancelSignal::new();
        let signal = ComposedSignal::new(Some(&external), Duration::from_secs(30));

        let trigger = external.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        assert_eq!(signal.fired().await, CancelReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_already_cancelled_external() {
        let external = CancelSignal::new();
        external.cancel();

        let signal = ComposedSignal::new(Some(&external), Duration::from_secs(30));
        assert_eq!(signal.reason(), Some(CancelReason::Cancelled));
        assert!(!signal.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_most_once() {
        let external = CancelSignal::new();
        let signal = ComposedSignal::new(Some(&external), Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        signal.on_fire(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(signal.fired().await, CancelReason::TimedOut);
        external.cancel();
        tokio::task::yield_now().await;

        assert_eq!(signal.reason(), Some(CancelReason::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_cancels_timer() {
        let mut signal = ComposedSignal::new(None, Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        signal.on_fire(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.release();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!signal.is_fired());
        assert!(!signal.is_armed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_listener() {
        let signal = ComposedSignal::new(None, Duration::from_millis(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = signal.on_fire(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(signal.remove_listener(id));
        assert!(!signal.remove_listener(id));
        signal.fired().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listener_after_fire_runs_immediately() {
        let external = CancelSignal::new();
        external.cancel();
        let signal = ComposedSignal::new(Some(&external), Duration::from_secs(1));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        signal.on_fire(move |reason| {
            assert_eq!(reason, CancelReason::Cancelled);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
