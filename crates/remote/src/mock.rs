//! In-memory remote for testing.

use crate::error::{ErrorKind, Result};
use crate::hash::HashKind;
use crate::object::{BoxAsyncRead, ObjectHandle, ObjectStream, Remote, RemoteObject};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::io::{AsyncRead, ReadBuf};

/// In-memory remote object for testing.
///
/// Records every range request so tests can assert exactly when (and how
/// often) the remote was contacted, publishes digests computed from its
/// contents, and can be told to misbehave.
///
/// # Examples
///
/// ```
/// use hoard_remote::mock::MockObject;
/// use hoard_remote::RemoteObject;
///
/// let object = MockObject::new("films/clip.mkv", b"0123456789".to_vec());
/// assert_eq!(object.size(), Some(10));
/// assert_eq!(object.open_count(), 0);
/// ```
#[derive(Debug)]
pub struct MockObject {
    path: PathBuf,
    data: Vec<u8>,
    modified: OffsetDateTime,
    size_known: bool,
    hash_kinds: Vec<HashKind>,
    overrides: HashMap<HashKind, Option<String>>,
    vanished: AtomicBool,
    requests: Mutex<Vec<(u64, Option<u64>)>>,
    faults: AtomicUsize,
}

impl MockObject {
    pub fn new(path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            modified: OffsetDateTime::UNIX_EPOCH,
            size_known: true,
            hash_kinds: vec![HashKind::Blake3, HashKind::Crc32],
            overrides: HashMap::new(),
            vanished: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            faults: AtomicUsize::new(0),
        }
    }

    /// Report the size as unknown; it is only discovered by reading to the end.
    pub fn with_unknown_size(mut self) -> Self {
        self.size_known = false;
        self
    }

    pub fn with_modified(mut self, modified: OffsetDateTime) -> Self {
        self.modified = modified;
        self
    }

    /// Restrict which hash kinds the remote claims to publish.
    pub fn with_hash_kinds(mut self, kinds: impl IntoIterator<Item = HashKind>) -> Self {
        self.hash_kinds = kinds.into_iter().collect();
        self
    }

    /// Publish `digest` for `kind` instead of the real digest. `None` means
    /// the remote has no digest for this kind.
    pub fn with_digest(mut self, kind: HashKind, digest: Option<&str>) -> Self {
        self.overrides.insert(kind, digest.map(str::to_string));
        self
    }

    /// Make subsequent digest lookups fail with `NotFound`.
    pub fn vanish(&self) {
        self.vanished.store(true, Ordering::SeqCst);
    }

    /// The next `count` opened streams fail on their first read.
    pub fn fail_next_streams(&self, count: usize) {
        self.faults.store(count, Ordering::SeqCst);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Every `(offset, length)` passed to `open_range` so far.
    pub fn requests(&self) -> Vec<(u64, Option<u64>)> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn open_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take_fault(&self) -> bool {
        self.faults.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1)).is_ok()
    }
}

#[async_trait]
impl RemoteObject for MockObject {
    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> Option<u64> {
        self.size_known.then_some(self.data.len() as u64)
    }

    fn modified(&self) -> OffsetDateTime {
        self.modified
    }

    fn hash_kinds(&self) -> &[HashKind] {
        &self.hash_kinds
    }

    async fn hash(&self, kind: HashKind) -> Result<Option<String>> {
        if self.vanished.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::NotFound(self.path.clone()));
        }
        if !self.hash_kinds.contains(&kind) {
            return Ok(None);
        }
        Ok(match self.overrides.get(&kind) {
            Some(digest) => digest.clone(),
            None => Some(kind.digest(&self.data)),
        })
    }

    async fn open_range(&self, offset: u64, length: Option<u64>) -> Result<BoxAsyncRead> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push((offset, length));
        if self.take_fault() {
            return Ok(Box::new(FailingStream));
        }
        let len = self.data.len() as u64;
        let start = offset.min(len);
        let end = length.map_or(len, |l| start.saturating_add(l).min(len));
        // Infallible: both bounds are clamped to the buffer length.
        let slice = self.data[start as usize..end as usize].to_vec();
        Ok(Box::new(Cursor::new(slice)))
    }
}

struct FailingStream;

impl AsyncRead for FailingStream {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(IoError::new(IoErrorKind::ConnectionReset, "mock connection reset")))
    }
}

/// In-memory remote listing [`MockObject`]s.
pub struct MockRemote {
    name: String,
    objects: Mutex<Vec<Arc<MockObject>>>,
    listings: AtomicUsize,
}

impl MockRemote {
    pub fn with_objects(objects: impl IntoIterator<Item = MockObject>) -> Self {
        Self {
            name: "mock".to_string(),
            objects: Mutex::new(objects.into_iter().map(Arc::new).collect()),
            listings: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add `object`, replacing any object at the same path.
    pub fn insert(&self, object: MockObject) -> Arc<MockObject> {
        let object = Arc::new(object);
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.retain(|o| o.path != object.path);
        objects.push(object.clone());
        object
    }

    /// Look up a previously added object to inspect its counters.
    pub fn object(&self, path: impl AsRef<Path>) -> Option<Arc<MockObject>> {
        let guard = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        guard.iter().find(|o| o.path == path.as_ref()).cloned()
    }

    /// How many times the listing has been requested.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}
impl Default for MockRemote {
    fn default() -> Self {
        Self::with_objects([])
    }
}

#[async_trait]
impl Remote for MockRemote {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> ObjectStream<'_> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        // Snapshot under the lock, then release it before yielding.
        let snapshot: Vec<ObjectHandle> = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|o| o.clone() as ObjectHandle)
            .collect();
        Box::pin(stream! {
            for object in snapshot {
                yield Ok(object);
            }
        })
    }
}
