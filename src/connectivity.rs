//! Host connectivity probing.
//!
//! The client asks the probe before every logical request. When the host is
//! offline the request fails immediately with a network error and nothing is
//! sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers "is the host currently connected".
///
/// The query must be cheap and must not block; it runs before every request.
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `true` if the host is online.
    fn is_online(&self) -> bool;
}

/// A probe that always reports the host as online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// A shared online/offline flag, typically flipped by a platform network monitor.
///
/// # Examples
///
/// ```
/// use compliance_client::connectivity::{ConnectivityProbe, OnlineFlag};
///
/// let flag = OnlineFlag::new(true);
/// let probe = flag.clone();
///
/// flag.set(false);
/// assert!(!probe.is_online());
/// ```
#[derive(Debug, Clone)]
pub struct OnlineFlag {
    online: Arc<AtomicBool>,
}

impl OnlineFlag {
    /// Creates a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Updates the connectivity state seen by every clone of this flag.
    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for OnlineFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProbe for OnlineFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl<F> ConnectivityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_online(&self) -> bool {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_shared_between_clones() {
        let flag = OnlineFlag::default();
        let probe: Box<dyn ConnectivityProbe> = Box::new(flag.clone());
        assert!(probe.is_online());

        flag.set(false);
        assert!(!probe.is_online());
    }

    #[test]
    fn test_closure_probe() {
        let probe = || false;
        assert!(!probe.is_online());
        assert!(AlwaysOnline.is_online());
    }
}
