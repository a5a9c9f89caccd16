//! Layered configuration for hoard.
//!
//! Values are merged from, in increasing priority: built-in defaults, an
//! optional TOML, YAML or JSON file, and `HOARD_`-prefixed environment
//! variables.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use hoard_cache::{CacheMode, LocalCache};
use hoard_remote::{ChunkOptions, RetryPolicy};
use hoard_vfs::VfsOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "HOARD_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the local cache.
    pub cache_dir: PathBuf,
    pub cache_mode: CacheMode,
    /// Verify streamed bytes against the remote's digests.
    pub checksum: bool,
    pub no_seek: bool,
    /// How long an out-of-order read waits for the stream, in milliseconds.
    pub read_wait_ms: u64,
    pub sequential_gap: Option<u64>,
    /// Size of the first range request in bytes; zero disables chunking.
    pub chunk_size: u64,
    pub chunk_size_limit: Option<u64>,
    pub buffer_size: usize,
    pub low_level_retries: u32,
    pub retry_backoff_ms: u64,
    /// How long a remote listing is trusted, in seconds.
    pub dir_cache_time_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let options = VfsOptions::default();
        Self {
            cache_dir: default_cache_dir(),
            cache_mode: CacheMode::default(),
            checksum: options.checksum,
            no_seek: options.no_seek,
            read_wait_ms: u64::try_from(options.read_wait.as_millis()).unwrap_or(u64::MAX),
            sequential_gap: options.sequential_gap,
            chunk_size: options.chunks.chunk_size,
            chunk_size_limit: options.chunks.chunk_size_limit,
            buffer_size: options.buffer_size,
            low_level_retries: options.retry.max_retries,
            retry_backoff_ms: u64::try_from(options.retry.backoff.as_millis()).unwrap_or(u64::MAX),
            dir_cache_time_secs: options.dir_cache_time.as_secs(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match ProjectDirs::from("", "", "hoard") {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => std::env::temp_dir().join("hoard"),
    }
}

impl Config {
    /// The merged sources, without extracting them.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            if !file.is_file() {
                exn::bail!(ErrorKind::Missing(file.to_path_buf()));
            }
            let extension = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file_exact(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().map_err(ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            file = ?file,
            cache_dir = %config.cache_dir.display(),
            cache_mode = ?config.cache_mode,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            exn::bail!(ErrorKind::Invalid("buffer_size must be greater than zero"));
        }
        if let Some(limit) = self.chunk_size_limit
            && limit < self.chunk_size
        {
            exn::bail!(ErrorKind::Invalid("chunk_size_limit must not be smaller than chunk_size"));
        }
        if !self.cache_dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid("cache_dir must be absolute"));
        }
        Ok(())
    }

    pub fn vfs_options(&self) -> VfsOptions {
        let retry = RetryPolicy::new(self.low_level_retries);
        VfsOptions {
            checksum: self.checksum,
            no_seek: self.no_seek,
            read_wait: Duration::from_millis(self.read_wait_ms),
            sequential_gap: self.sequential_gap,
            chunks: ChunkOptions {
                chunk_size: self.chunk_size,
                chunk_size_limit: self.chunk_size_limit,
            },
            buffer_size: self.buffer_size,
            retry: retry.with_backoff(Duration::from_millis(self.retry_backoff_ms), retry.max_backoff),
            dir_cache_time: Duration::from_secs(self.dir_cache_time_secs),
        }
    }

    /// Open the local cache described by this configuration.
    pub fn open_cache(&self) -> Result<LocalCache> {
        LocalCache::new(&self.cache_dir, self.cache_mode).or_raise(|| ErrorKind::Cache(self.cache_dir.clone()))
    }
}
