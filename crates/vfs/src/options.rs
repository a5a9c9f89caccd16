use hoard_remote::reader::DEFAULT_BUFFER_SIZE;
use hoard_remote::{ChunkOptions, RetryPolicy};
use std::time::Duration;

/// Runtime options shared by every handle of a [`Vfs`](crate::Vfs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VfsOptions {
    /// Verify bytes streamed from the remote against published digests.
    pub checksum: bool,
    /// Refuse non-sequential reads from the remote instead of seeking.
    pub no_seek: bool,
    /// How long an out-of-order read waits for the stream to catch up.
    pub read_wait: Duration,
    /// How far ahead of the stream a read may be and still wait for it.
    /// `None` uses eight times the read length, capped at 1 MiB per read.
    pub sequential_gap: Option<u64>,
    pub chunks: ChunkOptions,
    /// Read-ahead buffer size for remote streams.
    pub buffer_size: usize,
    /// Retries for failed remote reads, each of which reopens the stream.
    pub retry: RetryPolicy,
    /// How long a remote listing is trusted before being fetched again.
    pub dir_cache_time: Duration,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            checksum: true,
            no_seek: false,
            read_wait: Duration::from_millis(20),
            sequential_gap: None,
            chunks: ChunkOptions::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            retry: RetryPolicy::default(),
            dir_cache_time: Duration::from_secs(5 * 60),
        }
    }
}

impl VfsOptions {
    /// Distance ahead of the stream within which a read of `len` bytes waits
    /// for it rather than seeking.
    pub fn sequential_window(&self, len: usize) -> u64 {
        const MAX_READ: u64 = 1024 * 1024;
        self.sequential_gap.unwrap_or_else(|| 8 * (len as u64).min(MAX_READ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, 100, 800)]
    #[case(None, 4 * 1024 * 1024, 8 * 1024 * 1024)]
    #[case(None, 0, 0)]
    #[case(Some(64), 4096, 64)]
    fn test_sequential_window(#[case] gap: Option<u64>, #[case] len: usize, #[case] expected: u64) {
        let options = VfsOptions {
            sequential_gap: gap,
            ..VfsOptions::default()
        };
        assert_eq!(options.sequential_window(len), expected);
    }
}
