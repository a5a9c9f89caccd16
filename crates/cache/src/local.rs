//! Sparse-file cache on the local filesystem.
//!
//! Every item is stored as a sparse file under `<root>/data/` with the same
//! relative path as the remote object, plus a JSON sidecar under
//! `<root>/meta/` recording which byte ranges of the file are resident, the
//! fingerprint of the remote object they were fetched from, and whether the
//! file carries local modifications. Only the sidecar decides residency: a
//! byte that isn't in its range set is treated as missing even if the data
//! file happens to contain it.

use crate::error::{ErrorKind, Result};
use crate::item::{CacheItem, CacheMode};
use crate::path::{metadata_name, validate as validate_path};
use crate::ranges::Ranges;
use async_trait::async_trait;
use exn::ResultExt;
use hoard_remote::{ObjectHandle, RemoteObject};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::create_dir_all as sync_create_dir;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";

/// Cache directory holding one [`LocalItem`] per remote path.
///
/// # Examples
///
/// ```no_run
/// use hoard_cache::{CacheMode, LocalCache};
///
/// # async fn example() -> hoard_cache::error::Result<()> {
/// let cache = LocalCache::new("/var/cache/hoard", CacheMode::Dynamic)?;
/// let item = cache.item("films/clip.mkv").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LocalCache {
    root: PathBuf,
    mode: CacheMode,
    items: tokio::sync::Mutex<HashMap<PathBuf, Arc<LocalItem>>>,
}

impl LocalCache {
    /// Create a cache rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or is not a directory.
    pub fn new(root: impl AsRef<Path>, mode: CacheMode) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Only happens once per filesystem instance; not worth an async constructor.
        sync_create_dir(root.join(DATA_DIR)).map_err(ErrorKind::Io)?;
        sync_create_dir(root.join(META_DIR)).map_err(ErrorKind::Io)?;
        Ok(Self {
            root,
            mode,
            items: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// The item for `path`. Every caller asking for the same path shares the
    /// same item.
    pub async fn item(&self, path: impl AsRef<Path>) -> Result<Arc<LocalItem>> {
        let relative = validate_path(path)?;
        let mut items = self.items.lock().await;
        if let Some(item) = items.get(&relative) {
            return Ok(Arc::clone(item));
        }
        let item = Arc::new(LocalItem::load(&self.root, relative.clone(), self.mode).await?);
        items.insert(relative, Arc::clone(&item));
        Ok(item)
    }
}

/// Identity of the remote object that resident data was fetched from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Fingerprint {
    size: Option<u64>,
    modified_secs: i64,
    modified_nanos: u32,
}
impl Fingerprint {
    fn of(object: &ObjectHandle) -> Self {
        let modified = object.modified();
        Self {
            size: object.size(),
            modified_secs: modified.unix_timestamp(),
            modified_nanos: modified.nanosecond(),
        }
    }
}

/// Persisted item metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ItemInfo {
    size: u64,
    fingerprint: Option<Fingerprint>,
    ranges: Ranges,
    dirty: bool,
}

#[derive(Debug, Default)]
struct ItemState {
    info: Option<ItemInfo>,
    dirty: bool,
    on_disk: bool,
    opens: usize,
    object: Option<ObjectHandle>,
}

/// A single cached file.
#[derive(Debug)]
pub struct LocalItem {
    path: PathBuf,
    data_path: PathBuf,
    meta_path: PathBuf,
    mode: CacheMode,
    state: Mutex<ItemState>,
    // Lock order: `file` before `state`. `state` is never held across an await.
    file: tokio::sync::Mutex<Option<File>>,
}

impl LocalItem {
    async fn load(root: &Path, path: PathBuf, mode: CacheMode) -> Result<Self> {
        let data_path = root.join(DATA_DIR).join(&path);
        let meta_path = root.join(META_DIR).join(metadata_name(&path));
        let on_disk = fs::try_exists(&data_path).await.map_err(ErrorKind::Io)?;
        let info = match fs::read(&meta_path).await {
            Ok(bytes) if on_disk => match serde_json::from_slice::<ItemInfo>(&bytes) {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable cache metadata");
                    None
                },
            },
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        let dirty = info.as_ref().is_some_and(|i| i.dirty);
        Ok(Self {
            path,
            data_path,
            meta_path,
            mode,
            state: Mutex::new(ItemState {
                info,
                dirty,
                on_disk,
                ..ItemState::default()
            }),
            file: tokio::sync::Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_open(&self) -> ErrorKind {
        ErrorKind::NotOpen(self.path.clone())
    }

    /// Snapshot of the metadata as it should be persisted.
    fn snapshot(&self) -> Option<ItemInfo> {
        let state = self.state();
        state.info.clone().map(|mut info| {
            info.dirty = state.dirty;
            info
        })
    }

    async fn save(&self) -> Result<()> {
        let Some(info) = self.snapshot() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&info).or_raise(|| ErrorKind::InvalidMetadata(self.meta_path.clone()))?;
        fs::write(&self.meta_path, bytes).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    /// Work out what the item should look like when opened against `object`.
    /// Returns the info to use and whether the data file must be wiped.
    fn reconcile(&self, object: Option<&ObjectHandle>) -> (ItemInfo, bool) {
        let state = self.state();
        let fingerprint = object.map(Fingerprint::of);
        match state.info.clone() {
            Some(info) if state.dirty || object.is_none() || info.fingerprint == fingerprint => (info, false),
            previous => {
                if previous.is_some() {
                    tracing::debug!(path = %self.path.display(), "Remote object changed, discarding cached data");
                }
                let info = ItemInfo {
                    size: object.and_then(|o| o.size()).unwrap_or(0),
                    fingerprint,
                    ranges: Ranges::new(),
                    dirty: false,
                };
                (info, true)
            },
        }
    }

    async fn open_file(&self, info: &ItemInfo, wipe: bool) -> Result<File> {
        if let Some(parent) = self.data_path.parent() {
            fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        if let Some(parent) = self.meta_path.parent() {
            fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.data_path)
            .await
            .map_err(ErrorKind::Io)?;
        if wipe {
            file.set_len(0).await.map_err(ErrorKind::Io)?;
        }
        file.set_len(info.size).await.map_err(ErrorKind::Io)?;
        Ok(file)
    }

    /// Download every missing span of `range` into the data file.
    async fn materialize(&self, file: &mut File, range: Range<u64>) -> Result<()> {
        let (missing, object) = {
            let state = self.state();
            let info = state.info.as_ref().ok_or_else(|| self.not_open())?;
            (info.ranges.missing(range), state.object.clone())
        };
        for gap in missing {
            let fetched = match &object {
                Some(object) => {
                    tracing::debug!(path = %self.path.display(), off = gap.start, len = gap.end - gap.start, "Fetching missing range");
                    let mut stream = object
                        .open_range(gap.start, Some(gap.end - gap.start))
                        .await
                        .or_raise(|| ErrorKind::Fetch(self.path.clone()))?;
                    let mut data = Vec::new();
                    stream.read_to_end(&mut data).await.or_raise(|| ErrorKind::Fetch(self.path.clone()))?;
                    file.seek(SeekFrom::Start(gap.start)).await.map_err(ErrorKind::Io)?;
                    file.write_all(&data).await.map_err(ErrorKind::Io)?;
                    data.len() as u64
                },
                // Nothing to fetch from: the sparse file's zeros are the content.
                None => gap.end - gap.start,
            };
            let mut state = self.state();
            if let Some(info) = state.info.as_mut() {
                info.ranges.insert(gap.start..gap.start + fetched);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheItem for LocalItem {
    async fn open(&self, object: Option<ObjectHandle>) -> Result<()> {
        let mut file = self.file.lock().await;
        {
            let mut state = self.state();
            state.opens += 1;
            if file.is_some() {
                if object.is_some() {
                    state.object = object;
                }
                return Ok(());
            }
        }
        let (info, wipe) = self.reconcile(object.as_ref());
        match self.open_file(&info, wipe).await {
            Ok(opened) => {
                *file = Some(opened);
                let mut state = self.state();
                state.info = Some(info);
                state.on_disk = true;
                state.object = object;
            },
            Err(e) => {
                self.state().opens -= 1;
                return Err(e);
            },
        }
        drop(file);
        self.save().await
    }

    async fn close(&self) -> Result<Option<ObjectHandle>> {
        let mut file = self.file.lock().await;
        let (last, object) = {
            let mut state = self.state();
            if state.opens == 0 {
                exn::bail!(self.not_open());
            }
            state.opens -= 1;
            (state.opens == 0, state.object.clone())
        };
        if last && let Some(mut f) = file.take() {
            f.flush().await.map_err(ErrorKind::Io)?;
            drop(file);
            self.save().await?;
        }
        Ok(object)
    }

    async fn read_at(&self, buf: &mut [u8], off: u64, read_only: bool) -> Result<usize> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(|| self.not_open())?;
        let size = self.size().ok_or_else(|| self.not_open())?;
        if off >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = (size - off).min(buf.len() as u64);
        if !read_only {
            self.materialize(file, off..off + len).await?;
        } else if !self.range_present(off, len) {
            // The sparse file's zeros are not the content.
            exn::bail!(ErrorKind::NotResident(self.path.clone()));
        }
        file.seek(SeekFrom::Start(off)).await.map_err(ErrorKind::Io)?;
        let want = &mut buf[..len as usize];
        let mut filled = 0;
        while filled < want.len() {
            match file.read(&mut want[filled..]).await.map_err(ErrorKind::Io)? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    async fn write_at(&self, buf: &[u8], off: u64) -> Result<usize> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or_else(|| self.not_open())?;
        file.seek(SeekFrom::Start(off)).await.map_err(ErrorKind::Io)?;
        file.write_all(buf).await.map_err(ErrorKind::Io)?;
        let end = off + buf.len() as u64;
        let mut state = self.state();
        state.dirty = true;
        if let Some(info) = state.info.as_mut() {
            // Bytes between the old end and `off` are local zeros.
            let start = off.min(info.size);
            info.ranges.insert(start..end);
            info.size = info.size.max(end);
        }
        Ok(buf.len())
    }

    async fn truncate(&self, size: u64) -> Result<()> {
        let guard = self.file.lock().await;
        let file = guard.as_ref().ok_or_else(|| self.not_open())?;
        file.set_len(size).await.map_err(ErrorKind::Io)?;
        let mut state = self.state();
        let Some(info) = state.info.as_mut() else {
            exn::bail!(self.not_open());
        };
        if size < info.size {
            info.ranges.truncate(size);
        } else {
            info.ranges.insert(info.size..size);
        }
        let changed = size != info.size;
        info.size = size;
        if changed {
            state.dirty = true;
        }
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        {
            let guard = self.file.lock().await;
            if let Some(file) = guard.as_ref() {
                file.sync_all().await.map_err(ErrorKind::Io)?;
            }
        }
        self.save().await
    }

    fn size(&self) -> Option<u64> {
        self.state().info.as_ref().map(|i| i.size)
    }

    fn range_present(&self, off: u64, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        let state = self.state();
        state.info.as_ref().is_some_and(|i| i.ranges.present(off..off.saturating_add(len)))
    }

    fn allows_dynamic_direct_read(&self) -> bool {
        self.mode == CacheMode::Dynamic && !self.state().dirty
    }

    fn exists(&self) -> bool {
        self.state().on_disk
    }

    fn written_back(&self) -> bool {
        // Uploads are out of scope: anything modified locally stays pending.
        !self.state().dirty
    }

    fn dirty(&self) {
        self.state().dirty = true;
    }
}
