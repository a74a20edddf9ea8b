//! Retry and backoff policy for failed attempts.
//!
//! The policy is a pure function of the attempt number and the classified
//! error: it never sleeps itself. The executor asks it for a [`RetryDecision`]
//! after every failed attempt.

use crate::Error;
use rand::Rng;
use std::time::Duration;

/// Largest symmetric jitter ratio that still keeps consecutive backoff delays
/// non-decreasing (`d * (1 + r) <= 2d * (1 - r)`).
const MAX_JITTER_RATIO: f64 = 1.0 / 3.0;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the given delay, then make another attempt.
    Retry(Duration),
    /// Stop and surface the error to the caller.
    Surface,
}

/// Defines when and how long to wait before retrying a failed attempt.
///
/// | Condition | Action |
/// |---|---|
/// | 429 with `Retry-After` and retries left | wait the hint (capped at `max_rate_limit_wait`) |
/// | 429 without a hint | surface |
/// | network error or 5xx with retries left | wait `base_delay * 2^(attempt - 1)` |
/// | other 4xx, cancellation, timeout | surface |
///
/// # Examples
///
/// ```
/// use compliance_client::{RetryDecision, RetryPolicy};
/// use compliance_client::Error;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// let err = Error::from_status(503, "unavailable", None, None);
///
/// assert_eq!(policy.decide(1, &err), RetryDecision::Retry(Duration::from_secs(1)));
/// assert_eq!(policy.decide(2, &err), RetryDecision::Retry(Duration::from_secs(2)));
/// assert_eq!(policy.decide(3, &err), RetryDecision::Retry(Duration::from_secs(4)));
/// assert_eq!(policy.decide(4, &err), RetryDecision::Surface);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubled for each subsequent one.
    pub base_delay: Duration,
    /// Upper bound for any single exponential delay.
    pub max_delay: Duration,
    /// Upper bound for a server-supplied `Retry-After` hint.
    pub max_rate_limit_wait: Duration,
    /// Symmetric jitter ratio applied to exponential delays, clamped to `[0, 1/3]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_rate_limit_wait: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the number of retries allowed after the first attempt.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base exponential delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the cap applied to `Retry-After` hints.
    pub fn with_max_rate_limit_wait(mut self, max_wait: Duration) -> Self {
        self.max_rate_limit_wait = max_wait;
        self
    }

    /// Sets the symmetric jitter ratio.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Decides what to do after `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: usize, error: &Error) -> RetryDecision {
        if error.is_cancelled() || attempt > self.max_retries {
            return RetryDecision::Surface;
        }

        if error.status() == 429 {
            return match error.retry_after() {
                Some(hint) => RetryDecision::Retry(hint.min(self.max_rate_limit_wait)),
                None => RetryDecision::Surface,
            };
        }

        if error.is_retryable() {
            RetryDecision::Retry(self.backoff(attempt))
        } else {
            RetryDecision::Surface
        }
    }

    /// Returns the exponential delay before the retry that follows `attempt`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let multiplier = 2u32.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(multiplier);

        // Clamped after jitter, so every delay at the cap is exactly `max_delay`.
        let ratio = self.jitter.clamp(0.0, MAX_JITTER_RATIO);
        let delay = if ratio > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - ratio)..=(1.0 + ratio));
            delay.mul_f64(factor)
        } else {
            delay
        };
        delay.min(self.max_delay)
    }
}

/// Bookkeeping for one logical request's attempt loop.
#[derive(Debug, Default)]
pub struct AttemptState {
    /// The current attempt, starting at 1.
    pub attempt: usize,
    /// Delays waited so far, in order.
    pub delays: Vec<Duration>,
    /// The most recent classified failure.
    pub last_error: Option<Error>,
}

impl AttemptState {
    /// Creates the state for a fresh logical request.
    pub fn new() -> Self {
        Self {
            attempt: 1,
            delays: Vec::new(),
            last_error: None,
        }
    }

    /// Records a failure that will be retried after `delay`.
    pub fn schedule_retry(&mut self, error: Error, delay: Duration) {
        self.delays.push(delay);
        self.last_error = Some(error);
        self.attempt += 1;
    }

    /// Total time spent waiting between attempts.
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}
