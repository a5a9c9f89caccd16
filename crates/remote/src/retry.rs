//! Retry policy for low-level remote operations.
//!
//! The policy is a plain value handed to whoever performs the retries; there
//! is no shared state between callers.

use crate::error::ErrorKind;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff: Duration,
    /// Upper bound for the delay between retries.
    pub max_backoff: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration, max_backoff: Duration) -> Self {
        self.backoff = backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// Whether retry number `retry` (1-based) may go ahead after `error`.
    pub fn should_retry(&self, retry: u32, error: &ErrorKind) -> bool {
        // A reader used after close or a vanished object won't get better by
        // asking again; everything transport-shaped might.
        retry <= self.max_retries && error.is_retryable()
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        if self.backoff.is_zero() || retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Sleep for the delay belonging to retry number `retry`.
    pub async fn wait(&self, retry: u32) {
        let delay = self.delay(retry);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
