use crate::error::{ErrorKind, Result};
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::node::{Dir, File};
use crate::options::VfsOptions;
use exn::ResultExt;
use hoard_cache::{CacheItem, LocalCache, validate_path};
use hoard_remote::{Clock, ObjectHandle, Remote, RemoteHandle, RemoteObject, SystemClock, TimedCache, TransferStats};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::instrument;

type Listing = HashMap<PathBuf, ObjectHandle>;

/// A filesystem view of one remote, backed by a local cache.
///
/// Owns everything its handles share: the cache, the options, transfer
/// statistics, the file and directory nodes, and a listing of the remote
/// that is refreshed at most once per `dir_cache_time`.
pub struct Vfs {
    remote: RemoteHandle,
    cache: LocalCache,
    options: Arc<VfsOptions>,
    stats: Arc<TransferStats>,
    listing: tokio::sync::Mutex<TimedCache<Listing>>,
    files: Mutex<HashMap<PathBuf, Arc<File>>>,
    dirs: Mutex<HashMap<PathBuf, Arc<Dir>>>,
}

impl Vfs {
    pub fn new(remote: RemoteHandle, cache: LocalCache, options: VfsOptions) -> Self {
        Self::with_clock(remote, cache, options, Arc::new(SystemClock))
    }

    /// Create a filesystem whose listing expiry follows `clock`.
    pub fn with_clock(remote: RemoteHandle, cache: LocalCache, options: VfsOptions, clock: Arc<dyn Clock>) -> Self {
        let listing = TimedCache::with_clock(options.dir_cache_time, clock);
        Self {
            remote,
            cache,
            options: Arc::new(options),
            stats: TransferStats::new(),
            listing: tokio::sync::Mutex::new(listing),
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &VfsOptions {
        &self.options
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    fn files(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<File>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look `path` up in the remote listing, refreshing it if it has expired.
    pub async fn lookup(&self, path: impl AsRef<Path>) -> Result<Option<ObjectHandle>> {
        let path = path.as_ref();
        let mut listing = self.listing.lock().await;
        let remote = Arc::clone(&self.remote);
        let objects = listing
            .get_or_refresh(|| async move {
                let objects = remote.list().await?;
                tracing::info!(remote = remote.name(), objects = objects.len(), "Refreshed remote listing");
                Ok::<_, hoard_remote::error::Error>(objects.into_iter().map(|o| (o.path().to_path_buf(), o)).collect())
            })
            .await
            .or_raise(|| ErrorKind::Remote)?;
        Ok(objects.get(path).cloned())
    }

    /// Drop the cached listing so the next lookup fetches it again.
    pub async fn invalidate_listing(&self) {
        self.listing.lock().await.invalidate();
    }

    /// The directory node for `path`, created on first use.
    pub fn dir(&self, path: impl AsRef<Path>) -> Arc<Dir> {
        let path = path.as_ref();
        let mut dirs = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(dirs.entry(path.to_path_buf()).or_insert_with(|| Dir::new(path)))
    }

    /// Open `path` with `flags`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the path is neither on
    /// the remote nor known locally and `flags` doesn't ask to create it,
    /// and [`AlreadyExists`](ErrorKind::AlreadyExists) for an exclusive
    /// create of an existing path.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn open(&self, path: impl AsRef<Path>, flags: OpenFlags) -> Result<FileHandle> {
        let path = validate_path(path.as_ref()).or_raise(|| ErrorKind::InvalidPath(path.as_ref().to_path_buf()))?;
        let object = self.lookup(&path).await?;
        let dir = self.dir(path.parent().unwrap_or_else(|| Path::new("")));

        let existing = self.files().get(&path).cloned();
        let mut changed = false;
        let file = match existing {
            Some(file) => {
                if let Some(object) = &object
                    && !file.object().is_some_and(|current| Arc::ptr_eq(&current, object))
                {
                    tracing::debug!(path = %path.display(), "Remote object changed since last open");
                    file.set_object(Some(Arc::clone(object)));
                    changed = true;
                }
                file
            },
            None if object.is_none() && !flags.is_create() => exn::bail!(ErrorKind::NotFound(path)),
            None => {
                let file = File::new(path.clone(), object.clone());
                if object.is_some() {
                    dir.add_file(&file);
                }
                Arc::clone(self.files().entry(path.clone()).or_insert(file))
            },
        };
        if !file.exists() && !flags.is_create() {
            exn::bail!(ErrorKind::NotFound(path));
        }

        let item = self.cache.item(&path).await.or_raise(|| ErrorKind::Cache)?;
        if changed
            && item.written_back()
            && let Some(size) = object.as_ref().and_then(|o| o.size())
        {
            file.set_size(size);
        }
        FileHandle::open(dir, file, item, flags, Arc::clone(&self.options), Arc::clone(&self.stats)).await
    }
}
