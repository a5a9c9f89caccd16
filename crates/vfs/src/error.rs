//! VFS Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors raised by the cache and the
//! remote are wrapped so that their frames stay in the tree, and every kind
//! maps onto the errno a filesystem frontend should report.

use derive_more::{Display, Error};
use hoard_remote::HashKind;
use std::path::PathBuf;

/// A VFS error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for VFS operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The handle has already been closed.
    #[display("file already closed")]
    AlreadyClosed,
    /// Operation not permitted by the handle's access mode.
    #[display("bad file descriptor")]
    BadFileDescriptor,
    /// Seeking is disabled and the read isn't sequential.
    #[display("illegal seek")]
    NotSeekable,
    /// Seek to a negative position.
    #[display("invalid seek position")]
    InvalidSeek,
    /// Exclusive create of a path that already exists.
    #[display("file already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// No such file on the remote or in the cache.
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Path contains invalid characters or escapes the root.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Bytes read from the remote don't hash to the published digest.
    #[display("corrupted on transfer: {kind} hash differ {local:?} vs {remote:?}")]
    CorruptedTransfer {
        #[error(not(source))]
        kind: HashKind,
        #[error(not(source))]
        local: String,
        #[error(not(source))]
        remote: String,
    },
    /// Operation is not implemented for file handles.
    #[display("operation not supported")]
    NotSupported,
    /// The backing store failed.
    #[display("cache error")]
    Cache,
    /// The remote failed, after any retries.
    #[display("remote error")]
    Remote,
}

impl ErrorKind {
    /// The errno a filesystem frontend should report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::AlreadyClosed | Self::BadFileDescriptor => libc::EBADF,
            Self::NotSeekable => libc::ESPIPE,
            Self::InvalidSeek | Self::InvalidPath(_) => libc::EINVAL,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotSupported => libc::ENOSYS,
            Self::CorruptedTransfer { .. } | Self::Cache | Self::Remote => libc::EIO,
        }
    }
}
