//! Transfer accounting.
//!
//! [`TransferStats`] is owned by whoever mounts the remote (and shared with
//! every reader through an [`Arc`]), so separate filesystem instances never
//! see each other's numbers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Aggregate counters for all transfers started against one remote.
#[derive(Debug, Default)]
pub struct TransferStats {
    bytes: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin accounting a transfer of the object at `path`.
    pub fn start(self: &Arc<Self>, path: &Path) -> Transfer {
        self.started.fetch_add(1, Ordering::Relaxed);
        Transfer {
            stats: Arc::clone(self),
            path: path.to_path_buf(),
            bytes: 0,
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// A single accounted transfer.
///
/// Finishing is idempotent: only the first call to [`done`](Self::done)
/// records an outcome.
#[derive(Debug)]
pub struct Transfer {
    stats: Arc<TransferStats>,
    path: PathBuf,
    bytes: u64,
    started_at: Instant,
    finished: bool,
}

impl Transfer {
    pub fn account(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
        self.stats.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Record the final status. `error` carries a description of what went
    /// wrong, if anything.
    pub fn done(&mut self, error: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed = self.started_at.elapsed();
        match error {
            None => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(path = %self.path.display(), bytes = self.bytes, ?elapsed, "Transfer finished");
            },
            Some(error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %self.path.display(), bytes = self.bytes, ?elapsed, error, "Transfer failed");
            },
        }
    }
}
