//! Dual-mode file handle.
//!
//! A [`FileHandle`] serves every read either from the backing store or
//! straight from the remote object, deciding afresh on each call:
//!
//! - when the store insists on materializing everything ([`CacheMode::Full`](hoard_cache::CacheMode)),
//!   or holds local modifications, reads and writes go through the store;
//! - otherwise ranges that are fully resident are read from the store without
//!   fetching anything, and everything else is streamed from the remote and
//!   never written back into the store.
//!
//! The handle keeps three positions. `cache_cursor` is the `read`/`write`/
//! `seek` position while the store is in use, `source_cursor` is the same for
//! the remote path, and `reader_offset` is where the remote stream currently
//! is. The two cursors move independently and are never reconciled: a handle
//! that switches paths resumes each one where it left off.
//!
//! Remote reads are strictly sequential on a single stream. Reads arriving a
//! little ahead of the stream wait on a [`SequentialGate`] for it to catch up
//! before falling back to a seek; failed reads reopen the stream and retry
//! according to the configured [`RetryPolicy`](hoard_remote::RetryPolicy).
//! Bytes delivered in sequence from offset zero are hashed and, once the
//! whole object has been read, verified against the remote's digest on
//! close.

use crate::error::{ErrorKind, Result};
use crate::flags::OpenFlags;
use crate::gate::{SequentialGate, Wait};
use crate::integrity;
use crate::node::{Dir, File, Stat};
use crate::options::VfsOptions;
use exn::{Exn, OptionExt, ResultExt};
use hoard_cache::ItemHandle;
use hoard_remote::error::{ErrorKind as RemoteErrorKind, Result as RemoteResult};
use hoard_remote::{Fill, MultiHasher, RemoteObject, SourceReader, TransferStats};
use std::io::{Error as IoError, ErrorKind as IoErrorKind, SeekFrom};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::instrument;

/// Routing chosen by the most recent call. `DirectSource` means direct reads
/// were enabled for it, even if a resident range was then served from the
/// store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Unopened,
    CacheBacked,
    DirectSource,
}

#[derive(Default)]
struct HandleState {
    mode: Mode,
    cache_cursor: u64,
    source_cursor: u64,
    reader_offset: u64,
    /// Size of the remote object; meaningless while `size_unknown`.
    size: u64,
    size_unknown: bool,
    closed: bool,
    close_failed: bool,
    cache_open: bool,
    source: Option<SourceReader>,
    hasher: Option<MultiHasher>,
    read_called: bool,
    write_called: bool,
    verified: bool,
}

pub struct FileHandle {
    file: Arc<File>,
    dir: Arc<Dir>,
    item: ItemHandle,
    flags: OpenFlags,
    options: Arc<VfsOptions>,
    stats: Arc<TransferStats>,
    gate: SequentialGate,
    // Lock order: this, then the file's metadata lock.
    state: Mutex<HandleState>,
}

impl FileHandle {
    /// Create a handle for `file`, applying the create, exclusive and
    /// truncate directives in `flags`.
    #[instrument(level = "debug", skip_all, fields(path = %file.path().display()))]
    pub async fn open(
        dir: Arc<Dir>,
        file: Arc<File>,
        item: ItemHandle,
        flags: OpenFlags,
        options: Arc<VfsOptions>,
        stats: Arc<TransferStats>,
    ) -> Result<Self> {
        let object = file.object();
        // One hash is enough to catch a corrupted transfer.
        let hasher = match &object {
            Some(o) if options.checksum => MultiHasher::new(o.hash_kinds().first().copied()),
            _ => None,
        };
        let exists = file.exists() || (item.exists() && !item.written_back());
        if flags.is_create() && flags.is_exclusive() && exists {
            exn::bail!(ErrorKind::AlreadyExists(file.path().to_path_buf()));
        }

        let size = object.as_ref().and_then(|o| o.size());
        let handle = Self {
            file,
            dir,
            item,
            flags,
            options,
            stats,
            gate: SequentialGate::new(0),
            state: Mutex::new(HandleState {
                size: size.unwrap_or(0),
                size_unknown: object.is_some() && size.is_none(),
                hasher,
                ..HandleState::default()
            }),
        };

        if !flags.is_read_only() && (flags.is_truncate() || (flags.is_create() && !exists)) {
            handle.truncate(0).await?;
            // Even without writes, the file has to be written back now.
            handle.item.dirty();
        }
        if !flags.is_read_only() {
            handle.file.add_writer();
        }
        Ok(handle)
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    /// Routing of the most recent read or write, see [`Mode`].
    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    pub fn name(&self) -> String {
        self.file.path().display().to_string()
    }

    /// Size of the file, as known to the store or else the remote.
    pub async fn size(&self) -> u64 {
        let _state = self.state.lock().await;
        self.cache_size()
    }

    pub async fn stat(&self) -> Stat {
        let _state = self.state.lock().await;
        self.file.stat()
    }

    pub async fn readdir(&self) -> Result<Vec<Stat>> {
        exn::bail!(ErrorKind::NotSupported)
    }

    /// Read at `off`. Returns `Ok(0)` at the end of the file and fewer bytes
    /// than requested when the file ends inside the buffer.
    pub async fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.check_readable(&state)?;
        if !self.direct_reads_allowed() {
            state.mode = Mode::CacheBacked;
            return self.read_cache(state, buf, off, false).await;
        }
        state.mode = Mode::DirectSource;
        // Residency only counts once the store has been checked against the
        // current object; a changed object discards what was cached.
        if self.item.exists() {
            self.open_cache(&mut state).await?;
        }
        if state.cache_open
            && let Some(size) = self.item.size()
        {
            let len = if off >= size { 0 } else { (size - off).min(buf.len() as u64) };
            if len > 0 && self.item.range_present(off, len) {
                tracing::trace!(path = %self.file.path().display(), off, len, "Serving resident range");
                return self.read_cache(state, buf, off, true).await;
            }
        }
        let (_state, result) = self.read_source(state, buf, off).await;
        result
    }

    /// Read from the current position of whichever path is in use.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.check_readable(&state)?;
        if !self.direct_reads_allowed() {
            state.mode = Mode::CacheBacked;
            let off = state.cache_cursor;
            if !self.prepare_cache_read(&mut state, off).await? {
                return Ok(0);
            }
            let n = self.item.read_at(buf, off, false).await.or_raise(|| ErrorKind::Cache)?;
            state.cache_cursor += n as u64;
            return Ok(n);
        }
        state.mode = Mode::DirectSource;
        if !state.size_unknown && state.source_cursor >= state.size {
            return Ok(0);
        }
        let off = state.source_cursor;
        let (mut state, result) = self.read_source(state, buf, off).await;
        let n = result?;
        state.source_cursor += n as u64;
        Ok(n)
    }

    pub async fn write_at(&self, buf: &[u8], off: u64) -> Result<usize> {
        let mut state = self.state.lock().await;
        let off = self.prepare_write(&mut state, off).await?;
        drop(state);
        let written = self.item.write_at(buf, off).await;
        let mut state = self.state.lock().await;
        let n = written.or_raise(|| ErrorKind::Cache)?;
        self.cache_size();
        if self.flags.is_append() {
            state.cache_cursor += n as u64;
        }
        Ok(n)
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let off = state.cache_cursor;
        let off = self.prepare_write(&mut state, off).await?;
        let n = self.item.write_at(buf, off).await.or_raise(|| ErrorKind::Cache)?;
        self.cache_size();
        state.cache_cursor += n as u64;
        Ok(n)
    }

    pub async fn write_str(&self, s: &str) -> Result<usize> {
        self.write(s.as_bytes()).await
    }

    /// Move the cursor of whichever path is in use. Positions are not
    /// checked against the size; the next read does that.
    pub async fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.closed {
            exn::bail!(ErrorKind::AlreadyClosed);
        }
        if state.mode == Mode::DirectSource {
            if self.options.no_seek {
                exn::bail!(ErrorKind::NotSeekable);
            }
            let target = resolve_seek(pos, state.source_cursor, state.size)?;
            state.source_cursor = target;
            return Ok(target);
        }
        if !state.cache_open && matches!(pos, SeekFrom::Start(0) | SeekFrom::Current(0)) {
            return Ok(0);
        }
        self.open_cache(&mut state).await?;
        let target = resolve_seek(pos, state.cache_cursor, self.cache_size())?;
        state.cache_cursor = target;
        Ok(target)
    }

    pub async fn truncate(&self, size: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            exn::bail!(ErrorKind::AlreadyClosed);
        }
        if self.flags.is_read_only() {
            exn::bail!(ErrorKind::BadFileDescriptor);
        }
        self.open_cache(&mut state).await?;
        if size == self.cache_size() {
            return Ok(());
        }
        self.file.set_size(size);
        self.item.truncate(size).await.or_raise(|| ErrorKind::Cache)
    }

    /// Commit written data to stable storage.
    pub async fn sync(&self) -> Result<()> {
        let state = self.state.lock().await;
        if state.closed || !state.cache_open || self.flags.is_read_only() {
            return Ok(());
        }
        self.item.sync().await.or_raise(|| ErrorKind::Cache)
    }

    /// Called every time a descriptor referring to this handle is closed,
    /// so possibly several times.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.update_size(&state);
        if state.source.is_none() {
            return Ok(());
        }
        let verified = self.verify(&mut state).await;
        if let Err(e) = &verified {
            tracing::error!(path = %self.file.path().display(), error = %e, "Flush failed");
        }
        verified
    }

    /// Close the handle, tearing down the store and the remote stream.
    ///
    /// The handle is closed afterwards even if this fails; data already in
    /// the store is left there. Closing again succeeds if the first close
    /// did and fails with [`AlreadyClosed`](ErrorKind::AlreadyClosed)
    /// otherwise.
    #[instrument(level = "debug", skip(self), fields(path = %self.file.path().display()))]
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return match state.close_failed {
                true => Err(Exn::from(ErrorKind::AlreadyClosed)),
                false => Ok(()),
            };
        }
        self.close_locked(&mut state).await
    }

    /// Called when the frontend is finished with the handle. Releasing an
    /// already closed handle is a no-op.
    pub async fn release(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            tracing::debug!(path = %self.file.path().display(), "Release: nothing to do");
            return Ok(());
        }
        let result = self.close_locked(&mut state).await;
        if let Err(e) = &result {
            tracing::error!(path = %self.file.path().display(), error = %e, "Release failed");
        }
        result
    }

    fn check_readable(&self, state: &HandleState) -> Result<()> {
        if state.closed {
            exn::bail!(ErrorKind::AlreadyClosed);
        }
        if self.flags.is_write_only() {
            exn::bail!(ErrorKind::BadFileDescriptor);
        }
        Ok(())
    }

    fn direct_reads_allowed(&self) -> bool {
        self.item.allows_dynamic_direct_read() && self.file.object().is_some()
    }

    fn object_size(&self) -> Option<u64> {
        self.file.object().and_then(|o| o.size())
    }

    /// Size according to the store, falling back to the remote object.
    /// Keeps the shared file node in step.
    fn cache_size(&self) -> u64 {
        let size = self.item.size().or_else(|| self.object_size()).unwrap_or(0);
        self.file.set_size(size);
        size
    }

    fn update_size(&self, state: &HandleState) {
        if self.flags.is_read_only() || !state.cache_open {
            return;
        }
        self.cache_size();
    }

    async fn open_cache(&self, state: &mut HandleState) -> Result<()> {
        if state.cache_open {
            return Ok(());
        }
        let _open = self.file.lock_open().await;
        self.item.open(self.file.object()).await.or_raise(|| ErrorKind::Cache)?;
        let size = self.cache_size();
        state.cache_cursor = match self.flags.is_append() {
            true => {
                tracing::debug!(path = %self.file.path().display(), off = size, "Opened for append");
                size
            },
            false => 0,
        };
        state.cache_open = true;
        self.dir.add_file(&self.file);
        Ok(())
    }

    /// Validate a store read at `off` and open the store. Returns `false`
    /// when `off` is at or past the end.
    async fn prepare_cache_read(&self, state: &mut HandleState, off: u64) -> Result<bool> {
        self.check_readable(state)?;
        // Opening first, so the size is the one reconciled with the object.
        self.open_cache(state).await?;
        Ok(off < self.cache_size())
    }

    /// Positional store read, performed with the handle unlocked.
    async fn read_cache(
        &self,
        mut state: MutexGuard<'_, HandleState>,
        buf: &mut [u8],
        off: u64,
        read_only: bool,
    ) -> Result<usize> {
        if !self.prepare_cache_read(&mut state, off).await? {
            return Ok(0);
        }
        drop(state);
        self.item.read_at(buf, off, read_only).await.or_raise(|| ErrorKind::Cache)
    }

    async fn prepare_write(&self, state: &mut HandleState, off: u64) -> Result<u64> {
        if state.closed {
            exn::bail!(ErrorKind::AlreadyClosed);
        }
        if self.flags.is_read_only() {
            exn::bail!(ErrorKind::BadFileDescriptor);
        }
        self.open_cache(state).await?;
        state.mode = Mode::CacheBacked;
        let off = match self.flags.is_append() {
            // Every write lands at the end of the file, as with O_APPEND.
            true => {
                let size = self.cache_size();
                state.cache_cursor = size;
                size
            },
            false => off,
        };
        state.write_called = true;
        Ok(off)
    }

    fn open_source(&self, state: &mut HandleState) -> Result<()> {
        if state.source.is_some() {
            return Ok(());
        }
        let object = self.file.object().ok_or_raise(|| ErrorKind::NotFound(self.file.path().to_path_buf()))?;
        tracing::debug!(path = %self.file.path().display(), "Opening remote source");
        state.source = Some(SourceReader::new(object, self.options.chunks, self.options.buffer_size, &self.stats));
        state.reader_offset = 0;
        Ok(())
    }

    /// Read from the remote stream at `off`. Takes the lock by value because
    /// waiting for an in-sequence read has to release it.
    async fn read_source<'a>(
        &'a self,
        mut state: MutexGuard<'a, HandleState>,
        buf: &mut [u8],
        off: u64,
    ) -> (MutexGuard<'a, HandleState>, Result<usize>) {
        if state.closed {
            return (state, Err(Exn::from(ErrorKind::AlreadyClosed)));
        }
        if !state.size_unknown && off >= state.size {
            tracing::debug!(path = %self.file.path().display(), off, size = state.size, "Read beyond end of file");
            return (state, Ok(0));
        }
        if let Err(e) = self.open_source(&mut state) {
            return (state, Err(e));
        }
        if off > state.reader_offset && off - state.reader_offset < self.options.sequential_window(buf.len()) {
            tracing::trace!(path = %self.file.path().display(), off, at = state.reader_offset, "Waiting for in-sequence read");
            drop(state);
            let waited = self.gate.wait_for(off, self.options.read_wait).await;
            state = self.state.lock().await;
            if waited == Wait::TimedOut {
                tracing::debug!(path = %self.file.path().display(), off, at = state.reader_offset, "Gave up waiting for in-sequence read");
            }
            if state.closed {
                return (state, Err(Exn::from(ErrorKind::AlreadyClosed)));
            }
        }
        let result = self.fetch(&mut state, buf, off).await;
        self.gate.publish(state.reader_offset);
        (state, result)
    }

    async fn fetch(&self, state: &mut HandleState, buf: &mut [u8], off: u64) -> Result<usize> {
        let mut seek = off != state.reader_offset;
        if seek && self.options.no_seek {
            exn::bail!(ErrorKind::NotSeekable);
        }

        let policy = self.options.retry;
        let mut retry = 0;
        let mut reopen = false;
        let n = loop {
            let err = match self.attempt(state, buf, off, seek, reopen).await {
                Ok(n) => break n,
                Err(e) => e,
            };
            retry += 1;
            // Without seeking the stream can't be repositioned for another go.
            if self.options.no_seek || !policy.should_retry(retry, &err) {
                tracing::error!(path = %self.file.path().display(), off, error = %err, "Remote read failed");
                return Err(err).or_raise(|| ErrorKind::Remote);
            }
            tracing::warn!(
                path = %self.file.path().display(),
                off,
                attempt = retry,
                max = policy.max_retries,
                error = %err,
                "Low level retry"
            );
            policy.wait(retry).await;
            seek = true;
            reopen = true;
        };

        state.reader_offset = off + n as u64;
        if let Some(hasher) = state.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }

    /// One read attempt. A stream ending short of the known size is an
    /// error so that it gets retried.
    async fn attempt(
        &self,
        state: &mut HandleState,
        buf: &mut [u8],
        off: u64,
        seek: bool,
        reopen: bool,
    ) -> RemoteResult<usize> {
        if seek {
            self.seek_source(state, off, reopen)?;
        }
        if !buf.is_empty() {
            state.read_called = true;
        }
        let source = state.source.as_mut().ok_or_raise(|| RemoteErrorKind::Closed)?;
        match source.read_full(buf).await? {
            Fill::Complete => Ok(buf.len()),
            Fill::Eof(n) => {
                let end = state.reader_offset + n as u64;
                if state.size_unknown {
                    tracing::debug!(path = %self.file.path().display(), size = end, "Size discovered at end of stream");
                    state.size_unknown = false;
                    state.size = end;
                    return Ok(n);
                }
                if end == state.size {
                    return Ok(n);
                }
                let msg = format!("stream ended at {end} of {}", state.size);
                exn::bail!(RemoteErrorKind::Io(IoError::new(IoErrorKind::UnexpectedEof, msg)))
            },
        }
    }

    /// Reposition the remote stream: discard buffered bytes if that reaches
    /// `off`, else ask the chunked reader for a new range, else reopen.
    fn seek_source(&self, state: &mut HandleState, off: u64, reopen: bool) -> RemoteResult<()> {
        let from = state.reader_offset;
        if off != from {
            // Bytes are no longer hashed in sequence.
            state.hasher = None;
        }
        let source = state.source.as_mut().ok_or_raise(|| RemoteErrorKind::Closed)?;
        if !reopen {
            let delta = i64::try_from(i128::from(off) - i128::from(from)).unwrap_or(i64::MIN);
            if source.skip_bytes(delta) {
                state.reader_offset = off;
                return Ok(());
            }
            if source.supports_range_seek() {
                tracing::debug!(path = %self.file.path().display(), from, to = off, "Range seek");
                source.range_seek(off)?;
                state.reader_offset = off;
                return Ok(());
            }
        }
        tracing::debug!(path = %self.file.path().display(), from, to = off, "Reopening remote stream");
        source.reopen_at(off)?;
        state.reader_offset = off;
        Ok(())
    }

    /// Compare the hash of everything streamed against the remote's digest,
    /// once, and only if the whole object went through the hasher.
    async fn verify(&self, state: &mut HandleState) -> Result<()> {
        if state.verified || !state.read_called || state.size_unknown || state.reader_offset < state.size {
            return Ok(());
        }
        let Some(sums) = state.hasher.as_ref().map(MultiHasher::sums) else {
            return Ok(());
        };
        let Some(object) = self.file.object() else {
            return Ok(());
        };
        state.verified = true;
        integrity::verify(&sums, &*object).await
    }

    async fn close_locked(&self, state: &mut HandleState) -> Result<()> {
        state.closed = true;
        self.gate.close();
        tracing::debug!(
            path = %self.file.path().display(),
            cache = state.cache_open,
            source = state.source.is_some(),
            written = state.write_called,
            "Closing handle"
        );
        let cache = self.close_cache(state).await;
        let source = self.close_source(state).await;
        let result = cache.and(source);
        if let Err(e) = &result {
            state.close_failed = true;
            tracing::warn!(path = %self.file.path().display(), error = %e, "Close failed, leaving cached data in place");
        }
        result
    }

    async fn close_cache(&self, state: &mut HandleState) -> Result<()> {
        self.update_size(state);
        let result = match state.cache_open {
            true => {
                let _open = self.file.lock_open().await;
                state.cache_open = false;
                match self.item.close().await {
                    Ok(object) => {
                        if object.is_some() {
                            self.file.set_object(object);
                        }
                        Ok(())
                    },
                    Err(e) => Err(e).or_raise(|| ErrorKind::Cache),
                }
            },
            false => {
                self.file.apply_pending_mod_time();
                Ok(())
            },
        };
        if !self.flags.is_read_only() {
            self.file.del_writer();
        }
        result
    }

    async fn close_source(&self, state: &mut HandleState) -> Result<()> {
        let Some(mut source) = state.source.take() else {
            return Ok(());
        };
        if let Err(e) = source.close() {
            source.done(Some(&e.to_string()));
            return Err(e).or_raise(|| ErrorKind::Remote);
        }
        let verified = self.verify(state).await;
        let status = verified.as_ref().err().map(ToString::to_string);
        source.done(status.as_deref());
        verified
    }
}

fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(n) => Some(n),
        SeekFrom::End(delta) => size.checked_add_signed(delta),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
    };
    target.ok_or_raise(|| ErrorKind::InvalidSeek)
}
