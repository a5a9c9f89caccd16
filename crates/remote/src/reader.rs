//! Buffered, accounted source reader.
//!
//! [`SourceReader`] is what a file handle actually talks to when it serves
//! bytes straight from the remote: a [`ChunkedReader`] behind a read-ahead
//! buffer, with every byte pulled off the wire counted against a
//! [`Transfer`]. The buffer is what makes short forward seeks cheap: they are
//! satisfied by discarding already-buffered bytes instead of issuing a new
//! range request.

use crate::accounting::{Transfer, TransferStats};
use crate::chunked::{ChunkOptions, ChunkedReader};
use crate::error::Result;
use crate::object::{ObjectHandle, RemoteObject};
use std::sync::Arc;

/// Default read-ahead buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Outcome of [`SourceReader::read_full`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// The whole buffer was filled.
    Complete,
    /// The object ended after this many bytes.
    Eof(usize),
}

pub struct SourceReader {
    object: ObjectHandle,
    chunks: ChunkOptions,
    inner: ChunkedReader,
    buffer: Vec<u8>,
    consumed: usize,
    buffer_size: usize,
    transfer: Transfer,
}

impl SourceReader {
    /// Create a reader positioned at the start of `object`. No request is
    /// made until the first read.
    pub fn new(object: ObjectHandle, chunks: ChunkOptions, buffer_size: usize, stats: &Arc<TransferStats>) -> Self {
        let transfer = stats.start(object.path());
        Self {
            inner: ChunkedReader::new(Arc::clone(&object), chunks),
            object,
            chunks,
            buffer: Vec::new(),
            consumed: 0,
            buffer_size: buffer_size.max(1),
            transfer,
        }
    }

    /// Bytes read ahead but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// Try to move forward by `delta` bytes by discarding buffered data.
    /// Returns `false` (leaving the reader untouched) when the buffer can't
    /// cover the jump, including any backwards jump.
    pub fn skip_bytes(&mut self, delta: i64) -> bool {
        let Ok(delta) = usize::try_from(delta) else {
            return false;
        };
        if delta > self.buffered() {
            return false;
        }
        self.consumed += delta;
        true
    }

    pub fn supports_range_seek(&self) -> bool {
        self.inner.supports_range_seek()
    }

    /// Reposition the underlying chunked reader to `offset` without
    /// reopening it.
    pub fn range_seek(&mut self, offset: u64) -> Result<()> {
        self.stop_buffering();
        self.inner.range_seek(offset, None)
    }

    /// Throw away the underlying reader and start a fresh one at `offset`.
    pub fn reopen_at(&mut self, offset: u64) -> Result<()> {
        self.stop_buffering();
        if let Err(e) = self.inner.close() {
            tracing::debug!(path = %self.object.path().display(), error = %e, "Closing old reader failed");
        }
        self.inner = ChunkedReader::new(Arc::clone(&self.object), self.chunks);
        self.inner.seek(offset)
    }

    fn stop_buffering(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
    }

    /// Refill the read-ahead buffer. Returns `false` at end of object.
    async fn fill(&mut self) -> Result<bool> {
        self.buffer.resize(self.buffer_size, 0);
        self.consumed = 0;
        match self.inner.read(&mut self.buffer).await {
            Ok(n) => {
                self.buffer.truncate(n);
                self.transfer.account(n);
                Ok(n > 0)
            },
            Err(e) => {
                self.buffer.clear();
                Err(e)
            },
        }
    }

    /// Fill `buf` completely unless the object ends first.
    ///
    /// Bytes copied into `buf` before an error are not reported; callers
    /// are expected to reposition and retry.
    pub async fn read_full(&mut self, buf: &mut [u8]) -> Result<Fill> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.buffered() == 0 && !self.fill().await? {
                return Ok(Fill::Eof(filled));
            }
            let n = self.buffered().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.buffer[self.consumed..self.consumed + n]);
            self.consumed += n;
            filled += n;
        }
        Ok(Fill::Complete)
    }

    pub fn close(&mut self) -> Result<()> {
        self.stop_buffering();
        self.inner.close()
    }

    /// Record the final transfer status.
    pub fn done(&mut self, error: Option<&str>) {
        self.transfer.done(error);
    }
}
