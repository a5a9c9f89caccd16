//! Content hashing for transfer verification.
//!
//! Remotes publish digests for a subset of [`HashKind`]s. A [`MultiHasher`]
//! accumulates digests for several kinds at once over a byte stream so they
//! can be compared against the published values once the stream is complete.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// A supported content hash algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKind {
    /// BLAKE3, hex encoded.
    Blake3,
    /// CRC-32 (IEEE), 8 lowercase hex characters.
    Crc32,
}

impl HashKind {
    /// Returns the short name for display and configuration.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Blake3 => "blake3",
            HashKind::Crc32 => "crc32",
        }
    }

    /// Compute the digest of an in-memory buffer in one go.
    #[must_use]
    pub fn digest(&self, data: &[u8]) -> String {
        let mut state = HashState::new(*self);
        state.update(data);
        state.finalize()
    }
}

impl Display for HashKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

enum HashState {
    Blake3(Box<blake3::Hasher>),
    Crc32(crc32fast::Hasher),
}

impl HashState {
    fn new(kind: HashKind) -> Self {
        match kind {
            HashKind::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
            HashKind::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake3(h) => {
                h.update(data);
            },
            Self::Crc32(h) => h.update(data),
        }
    }

    fn finalize(&self) -> String {
        match self {
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
            Self::Crc32(h) => format!("{:08x}", h.clone().finalize()),
        }
    }
}

/// Accumulates digests for a set of hash kinds over the same byte stream.
pub struct MultiHasher {
    states: Vec<(HashKind, HashState)>,
    written: u64,
}

impl MultiHasher {
    /// Create a hasher for every distinct kind given. Returns `None` when no
    /// kinds were requested, since there would be nothing to verify.
    pub fn new(kinds: impl IntoIterator<Item = HashKind>) -> Option<Self> {
        let mut kinds: Vec<HashKind> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        if kinds.is_empty() {
            return None;
        }
        let states = kinds.into_iter().map(|kind| (kind, HashState::new(kind))).collect();
        Some(Self { states, written: 0 })
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, state) in &mut self.states {
            state.update(data);
        }
        self.written += data.len() as u64;
    }

    /// Total number of bytes fed into the hasher so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn kinds(&self) -> impl Iterator<Item = HashKind> + '_ {
        self.states.iter().map(|(kind, _)| *kind)
    }

    /// Current digests of everything written so far, one per kind.
    pub fn sums(&self) -> Vec<(HashKind, String)> {
        self.states.iter().map(|(kind, state)| (*kind, state.finalize())).collect()
    }
}

/// Compare two hex digests, ignoring case.
#[must_use]
pub fn equals(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
