//! Chunked range reads against a remote object.
//!
//! Rather than requesting the whole object at once, a [`ChunkedReader`]
//! issues a sequence of bounded range requests. The first request is
//! `chunk_size` bytes long and every subsequent one doubles in size until it
//! reaches `chunk_size_limit` (or grows without bound when no limit is set).
//! Seeking drops the open stream and resets the growth so that random access
//! does not download huge ranges that will never be consumed.
//!
//! Requests are lazy: nothing is sent to the remote until the first
//! [`read`](ChunkedReader::read) after construction or after a seek.

use crate::error::{ErrorKind, Result};
use crate::object::{BoxAsyncRead, ObjectHandle, RemoteObject};
use tokio::io::AsyncReadExt;

const MIB: u64 = 1024 * 1024;

/// Chunk sizing for range requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Size of the first range request. Zero disables chunking: the rest of
    /// the object is requested in one go and ranged seeks are unsupported.
    pub chunk_size: u64,
    /// Upper bound for chunk growth, `None` for unbounded doubling.
    pub chunk_size_limit: Option<u64>,
}
impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 16 * MIB,
            chunk_size_limit: None,
        }
    }
}

pub struct ChunkedReader {
    object: ObjectHandle,
    options: ChunkOptions,
    /// Absolute offset of the next byte handed out.
    offset: u64,
    /// Length of the next range request.
    next_chunk: u64,
    /// Bytes left in the open range, `None` when the range is unbounded.
    remaining: Option<u64>,
    /// Exclusive end imposed by [`range_seek`](Self::range_seek).
    limit: Option<u64>,
    stream: Option<BoxAsyncRead>,
    closed: bool,
}

impl ChunkedReader {
    pub fn new(object: ObjectHandle, options: ChunkOptions) -> Self {
        Self {
            object,
            options,
            offset: 0,
            next_chunk: options.chunk_size,
            remaining: None,
            limit: None,
            stream: None,
            closed: false,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the reader can move to an arbitrary offset with a fresh range
    /// request. Unchunked readers can only be reopened.
    pub fn supports_range_seek(&self) -> bool {
        self.options.chunk_size > 0
    }

    /// Reposition to `offset`. The next read opens a new range there.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.reset(offset, None)
    }

    /// Reposition to `offset`, optionally bounding how far the reader may go.
    pub fn range_seek(&mut self, offset: u64, length: Option<u64>) -> Result<()> {
        if !self.supports_range_seek() {
            exn::bail!(ErrorKind::Unsupported("ranged seek on an unchunked reader"));
        }
        self.reset(offset, length.map(|l| offset.saturating_add(l)))
    }

    fn reset(&mut self, offset: u64, limit: Option<u64>) -> Result<()> {
        if self.closed {
            exn::bail!(ErrorKind::Closed);
        }
        self.stream = None;
        self.remaining = None;
        self.next_chunk = self.options.chunk_size;
        self.offset = offset;
        self.limit = limit;
        Ok(())
    }

    /// Exclusive end of what this reader may return, if known.
    fn end(&self) -> Option<u64> {
        match (self.limit, self.object.size()) {
            (Some(limit), Some(size)) => Some(limit.min(size)),
            (limit, size) => limit.or(size),
        }
    }

    async fn open_chunk(&mut self) -> Result<()> {
        let mut length = (self.next_chunk > 0).then_some(self.next_chunk);
        if let Some(end) = self.end() {
            let available = end.saturating_sub(self.offset);
            length = Some(length.map_or(available, |l| l.min(available)));
        }
        tracing::trace!(path = %self.object.path().display(), offset = self.offset, ?length, "Opening range");
        self.stream = Some(self.object.open_range(self.offset, length).await?);
        self.remaining = length;
        if self.next_chunk > 0 {
            let grown = self.next_chunk.saturating_mul(2);
            self.next_chunk = self.options.chunk_size_limit.map_or(grown, |max| grown.min(max.max(self.next_chunk)));
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` signals the end of the object
    /// (or of the range set by [`range_seek`](Self::range_seek)).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            exn::bail!(ErrorKind::Closed);
        }
        if buf.is_empty() || self.end().is_some_and(|end| self.offset >= end) {
            return Ok(0);
        }
        if self.stream.is_none() {
            self.open_chunk().await?;
        }
        let want = match self.remaining {
            Some(remaining) => buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        let n = match stream.read(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) => {
                self.stream = None;
                exn::bail!(ErrorKind::Io(e));
            },
        };
        if n == 0 {
            // The range ended before its advertised length: end of object.
            self.stream = None;
            return Ok(0);
        }
        self.offset += n as u64;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= n as u64;
            if *remaining == 0 {
                self.stream = None;
            }
        }
        Ok(n)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            exn::bail!(ErrorKind::Closed);
        }
        self.closed = true;
        self.stream = None;
        Ok(())
    }
}
