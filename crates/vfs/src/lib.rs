//! File handles over a remote, backed by a local cache.
//!
//! [`Vfs::open`] hands out [`FileHandle`]s. Each handle reads either from the
//! cache or straight from the remote object depending on the cache mode and
//! on what is already resident; see [`handle`] for the details.

pub mod error;
mod flags;
mod gate;
pub mod handle;
pub mod integrity;
mod node;
mod options;
mod vfs;

pub use crate::flags::{AccessMode, OpenFlags};
pub use crate::gate::{SequentialGate, Wait};
pub use crate::handle::{FileHandle, Mode};
pub use crate::node::{Dir, File, Stat};
pub use crate::options::VfsOptions;
pub use crate::vfs::Vfs;
