pub mod accounting;
pub mod chunked;
pub mod error;
pub mod hash;
pub mod listing;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod object;
pub mod reader;
pub mod retry;

pub use crate::accounting::{Transfer, TransferStats};
pub use crate::chunked::{ChunkOptions, ChunkedReader};
pub use crate::hash::{HashKind, MultiHasher};
pub use crate::listing::{Clock, ManualClock, SystemClock, TimedCache};
pub use crate::object::{BoxAsyncRead, ObjectHandle, ObjectStream, Remote, RemoteHandle, RemoteObject};
pub use crate::reader::{Fill, SourceReader};
pub use crate::retry::RetryPolicy;
