//! Interval-refreshed cache for remote listings.
//!
//! Listing a remote is slow and rate limited, so the result is kept for a
//! fixed interval. The cache is an ordinary value owned by the filesystem
//! instance that uses it, and reads time through a [`Clock`] so that expiry
//! can be driven by tests.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;
use time::{Duration, UtcDateTime};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<UtcDateTime>,
}
impl ManualClock {
    pub fn new(start: UtcDateTime) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(start) })
    }

    pub fn advance(&self, by: StdDuration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.saturating_add(Duration::try_from(by).unwrap_or(Duration::MAX));
    }
}
impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single value refreshed at most once per interval.
pub struct TimedCache<T> {
    value: Option<T>,
    refreshed_at: Option<UtcDateTime>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl<T> TimedCache<T> {
    pub fn new(interval: StdDuration) -> Self {
        Self::with_clock(interval, Arc::new(SystemClock))
    }

    pub fn with_clock(interval: StdDuration, clock: Arc<dyn Clock>) -> Self {
        Self {
            value: None,
            refreshed_at: None,
            interval: Duration::try_from(interval).unwrap_or(Duration::MAX),
            clock,
        }
    }

    /// Whether the next access has to refresh.
    pub fn is_stale(&self) -> bool {
        match (&self.value, self.refreshed_at) {
            (Some(_), Some(at)) => self.clock.now() - at >= self.interval,
            _ => true,
        }
    }

    /// The cached value, if it is still fresh.
    pub fn get(&self) -> Option<&T> {
        if self.is_stale() { None } else { self.value.as_ref() }
    }

    pub fn store(&mut self, value: T) {
        self.value = Some(value);
        self.refreshed_at = Some(self.clock.now());
    }

    /// Force a refresh on next access.
    pub fn invalidate(&mut self) {
        self.refreshed_at = None;
    }

    /// Return the cached value, calling `fetch` first if it has expired.
    ///
    /// A failed refresh leaves the previous value (and its timestamp) in
    /// place so that the next access retries.
    pub async fn get_or_refresh<F, Fut, E>(&mut self, fetch: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.is_stale() {
            let value = fetch().await?;
            self.store(value);
        }
        // Infallible: either fresh already, or `store` just populated it.
        match self.value.as_ref() {
            Some(value) => Ok(value),
            None => unreachable!("timed cache holds a value after refresh"),
        }
    }
}
