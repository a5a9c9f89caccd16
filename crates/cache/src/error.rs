//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path contains invalid characters or escapes the cache root.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Underlying I/O error on the cache file.
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The item was used before being opened (or after its last close).
    #[display("cache item not open: {}", _0.display())]
    NotOpen(#[error(not(source))] PathBuf),
    /// Fetching missing data from the remote failed.
    #[display("failed to fetch {} from remote", _0.display())]
    Fetch(#[error(not(source))] PathBuf),
    /// A read that may not fetch asked for bytes the cache doesn't hold.
    #[display("range not resident in cache: {}", _0.display())]
    NotResident(#[error(not(source))] PathBuf),
    /// Item metadata on disk could not be read or written.
    #[display("invalid cache metadata: {}", _0.display())]
    InvalidMetadata(#[error(not(source))] PathBuf),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

