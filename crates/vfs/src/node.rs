//! File and directory nodes.
//!
//! A [`File`] is shared by every handle open on the same path. It holds the
//! metadata those handles have to agree on (current remote object, size,
//! writer count, deferred modification time) behind its own lock, which is
//! always taken after a handle's lock and never held across an await.

use hoard_remote::{ObjectHandle, RemoteObject};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

/// Snapshot of a file's metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: OffsetDateTime,
    pub is_dir: bool,
}

#[derive(Debug)]
struct FileState {
    object: Option<ObjectHandle>,
    size: u64,
    modified: OffsetDateTime,
    pending_modified: Option<OffsetDateTime>,
    writers: usize,
}

#[derive(Debug)]
pub struct File {
    path: PathBuf,
    state: Mutex<FileState>,
    in_dir: AtomicBool,
    // Serializes opening and closing of the backing store across handles.
    open_lock: tokio::sync::Mutex<()>,
}

impl File {
    pub fn new(path: impl Into<PathBuf>, object: Option<ObjectHandle>) -> Arc<Self> {
        let (size, modified) = match &object {
            Some(o) => (o.size().unwrap_or(0), o.modified()),
            None => (0, OffsetDateTime::now_utc()),
        };
        Arc::new(Self {
            path: path.into(),
            state: Mutex::new(FileState {
                object,
                size,
                modified,
                pending_modified: None,
                writers: 0,
            }),
            in_dir: AtomicBool::new(false),
            open_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }

    pub(crate) async fn lock_open(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.open_lock.lock().await
    }

    /// Whether the file exists on the remote or has been added to its
    /// directory by a handle.
    pub fn exists(&self) -> bool {
        self.state().object.is_some() || self.in_dir.load(Ordering::SeqCst)
    }

    pub fn object(&self) -> Option<ObjectHandle> {
        self.state().object.clone()
    }

    pub fn set_object(&self, object: Option<ObjectHandle>) {
        let mut state = self.state();
        if let Some(o) = &object {
            state.modified = o.modified();
        }
        state.object = object;
    }

    pub fn size(&self) -> u64 {
        self.state().size
    }

    pub fn set_size(&self, size: u64) {
        self.state().size = size;
    }

    pub fn modified(&self) -> OffsetDateTime {
        let state = self.state();
        state.pending_modified.unwrap_or(state.modified)
    }

    /// Set the modification time, deferring it while the file is open for
    /// writing.
    pub fn set_modified(&self, modified: OffsetDateTime) {
        let mut state = self.state();
        match state.writers {
            0 => state.modified = modified,
            _ => state.pending_modified = Some(modified),
        }
    }

    /// Apply a deferred modification time. Returns whether there was one.
    pub fn apply_pending_mod_time(&self) -> bool {
        let mut state = self.state();
        match state.pending_modified.take() {
            Some(modified) => {
                state.modified = modified;
                true
            },
            None => false,
        }
    }

    pub fn add_writer(&self) {
        self.state().writers += 1;
    }

    pub fn del_writer(&self) {
        let mut state = self.state();
        state.writers = state.writers.saturating_sub(1);
    }

    pub fn stat(&self) -> Stat {
        let state = self.state();
        Stat {
            path: self.path.clone(),
            name: self.name(),
            size: state.size,
            modified: state.pending_modified.unwrap_or(state.modified),
            is_dir: false,
        }
    }
}

/// A directory listing the files that handles have made visible in it.
#[derive(Debug)]
pub struct Dir {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Arc<File>>>,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Arc<File>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure `file` is listed in this directory.
    pub fn add_file(&self, file: &Arc<File>) {
        file.in_dir.store(true, Ordering::SeqCst);
        self.entries().entry(file.name()).or_insert_with(|| Arc::clone(file));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    pub fn file(&self, name: &str) -> Option<Arc<File>> {
        self.entries().get(name).cloned()
    }

    /// Names of every listed file, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}
