//! Backing store interface used by file handles.

use crate::error::Result;
use async_trait::async_trait;
use hoard_remote::ObjectHandle;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to a cache item.
pub type ItemHandle = Arc<dyn CacheItem>;

/// How the cache serves data that isn't resident yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Every read goes through the cache; missing spans are downloaded into
    /// the cache file before being returned.
    #[default]
    Full,
    /// Resident spans are read from the cache, everything else may be
    /// streamed straight from the remote without being stored.
    Dynamic,
}

/// The on-disk state of one file, shared by every handle open on it.
///
/// Items are opened and closed once per handle that uses them; the item
/// stays usable until the last handle closes it.
#[async_trait]
pub trait CacheItem: Send + Sync + Debug {
    /// Open the item against the current remote object (`None` for a file
    /// that only exists locally so far).
    async fn open(&self, object: Option<ObjectHandle>) -> Result<()>;

    /// Close one opener, returning the remote object the file now
    /// corresponds to.
    async fn close(&self) -> Result<Option<ObjectHandle>>;

    /// Read into `buf` at `off`. With `read_only` set, only resident data is
    /// read and nothing is fetched or written; the caller must have checked
    /// [`range_present`](Self::range_present) first.
    ///
    /// Returns `Ok(0)` at or beyond the end of the item.
    async fn read_at(&self, buf: &mut [u8], off: u64, read_only: bool) -> Result<usize>;

    async fn write_at(&self, buf: &[u8], off: u64) -> Result<usize>;

    async fn truncate(&self, size: u64) -> Result<()>;

    /// Flush written data to stable storage.
    async fn sync(&self) -> Result<()>;

    /// Current size, or `None` when the item has never been opened and no
    /// metadata is on disk.
    fn size(&self) -> Option<u64>;

    /// Whether every byte of `[off, off + len)` is resident.
    fn range_present(&self, off: u64, len: u64) -> bool;

    /// Whether reads may bypass the cache and stream from the remote.
    fn allows_dynamic_direct_read(&self) -> bool;

    /// Whether the item has data on disk.
    fn exists(&self) -> bool;

    /// Whether every local modification has been written back to the remote.
    fn written_back(&self) -> bool;

    /// Mark the item as modified so it is written back even without writes.
    fn dirty(&self);
}
