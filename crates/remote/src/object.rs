//! Remote object and remote listing traits.
//!
//! A [`RemoteObject`] is the descriptor of one file on the remote: its path,
//! (possibly unknown) size, modification time, published digests, and the
//! ability to stream an arbitrary byte range. A [`Remote`] is the collection
//! those objects are listed from.

use crate::error::Result;
use crate::hash::HashKind;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::fmt::Debug;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

/// A streaming body returned by [`RemoteObject::open_range`].
pub type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin + 'static>;
pub type ObjectStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectHandle>> + Send + 'a>>;

/// Shared handle to a remote object descriptor.
pub type ObjectHandle = Arc<dyn RemoteObject>;
/// Shared handle to a remote.
pub type RemoteHandle = Arc<dyn Remote>;

/// A single object stored on a remote.
///
/// Implementations must be cheap to clone behind an [`Arc`] and safe to use
/// from several file handles at once; every call to
/// [`open_range`](Self::open_range) yields an independent stream.
#[async_trait]
pub trait RemoteObject: Send + Sync + Debug {
    /// Path of the object relative to the remote root.
    fn path(&self) -> &Path;

    /// Size in bytes, or `None` when the remote does not know the length in
    /// advance (the size only becomes known once the stream ends).
    fn size(&self) -> Option<u64>;

    /// Last modification time as reported by the remote.
    fn modified(&self) -> OffsetDateTime;

    /// Hash kinds this remote publishes digests for.
    fn hash_kinds(&self) -> &[HashKind];

    /// Published digest for `kind`.
    ///
    /// Returns `Ok(None)` when the remote has no digest for this object and
    /// [`NotFound`](crate::error::ErrorKind::NotFound) when the object has
    /// vanished in the meantime.
    async fn hash(&self, kind: HashKind) -> Result<Option<String>>;

    /// Open a stream of the object's bytes starting at `offset`.
    ///
    /// When `length` is `Some`, the stream ends after at most that many
    /// bytes; otherwise it runs until the end of the object. Opening at or
    /// beyond the end of an object of known size yields an empty stream.
    async fn open_range(&self, offset: u64, length: Option<u64>) -> Result<BoxAsyncRead>;
}

/// A remote that objects are listed from.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Name of the configured remote (used for logging only).
    fn name(&self) -> &str;

    /// Stream every object on the remote.
    fn list_stream(&self) -> ObjectStream<'_>;

    /// Collect the full listing into a [`Vec`].
    async fn list(&self) -> Result<Vec<ObjectHandle>> {
        self.list_stream().try_collect().await
    }
}
