//! Sequential-wait gate.
//!
//! Readers that arrive slightly ahead of the remote stream (typically the
//! kernel issuing read-ahead requests out of order) park here until the
//! stream reaches their offset, instead of forcing a seek that would throw
//! away the open connection. Waits are bounded: once the deadline passes the
//! reader proceeds anyway and seeks.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Position {
    offset: u64,
    closed: bool,
}

/// How a wait on the gate ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// The stream reached the requested offset.
    Reached,
    /// The deadline elapsed first.
    TimedOut,
    /// The gate was closed while waiting.
    Closed,
}

#[derive(Debug)]
pub struct SequentialGate {
    tx: watch::Sender<Position>,
}

impl SequentialGate {
    pub fn new(offset: u64) -> Self {
        let (tx, _) = watch::channel(Position { offset, closed: false });
        Self { tx }
    }

    pub fn offset(&self) -> u64 {
        self.tx.borrow().offset
    }

    /// Announce the stream's current offset, waking every waiter.
    pub fn publish(&self, offset: u64) {
        self.tx.send_modify(|p| p.offset = offset);
    }

    /// Wake every waiter for good.
    pub fn close(&self) {
        self.tx.send_modify(|p| p.closed = true);
    }

    /// Wait until the stream is at `target`, the gate closes, or `max_wait`
    /// elapses.
    pub async fn wait_for(&self, target: u64, max_wait: Duration) -> Wait {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(max_wait, async {
            match rx.wait_for(|p| p.closed || p.offset == target).await {
                Ok(p) if p.offset == target => Wait::Reached,
                _ => Wait::Closed,
            }
        })
        .await;
        waited.unwrap_or(Wait::TimedOut)
    }
}
