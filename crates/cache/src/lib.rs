//! Local backing store for hoard file handles.
//!
//! The cache is not the source of truth: the remote is. Items record which
//! byte ranges of a remote object are resident on local disk so that file
//! handles can decide, per read, whether to serve bytes from disk or stream
//! them from the remote.
//!
//! # Architecture
//! - [`CacheItem`] is the seam file handles talk to.
//! - [`LocalCache`] hands out one shared [`LocalItem`] per remote path, stored
//!   as a sparse file plus a small JSON sidecar of resident [`Ranges`].

pub mod error;
mod item;
mod local;
mod path;
mod ranges;

pub use crate::item::{CacheItem, CacheMode, ItemHandle};
pub use crate::local::{LocalCache, LocalItem};
pub use crate::path::validate as validate_path;
pub use crate::ranges::Ranges;
