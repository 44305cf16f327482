use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::CipherSuite;

/// Smallest chunk size accepted through configuration (4 KiB).
pub const MIN_CONFIG_CHUNK_SIZE: u32 = 4 * 1024;

/// Largest chunk size accepted anywhere (16 MiB).
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;

/// Default chunk size for new filesystems (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Filename handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilenameMode {
    /// Names pass through untouched.
    #[default]
    None,
    /// SIV encryption: same name + key always yields the same token.
    Deterministic,
    /// Random UUID tokens backed by a persisted catalog.
    Random,
}

/// Parallel bulk-I/O tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    /// Worker thread cap for bulk chunk crypto. 0 = hardware concurrency.
    pub max_workers: usize,
    /// Requests spanning fewer chunks than this stay on the sequential path.
    pub min_chunks_for_parallel: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 0,
            min_chunks_for_parallel: 4,
        }
    }
}

impl ParallelConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_workers > 1024 {
            return Err(Error::validation(
                "parallel.max_workers",
                format!("{} exceeds the limit of 1024", self.max_workers),
            ));
        }
        if self.min_chunks_for_parallel < 1 || self.min_chunks_for_parallel > 1000 {
            return Err(Error::validation(
                "parallel.min_chunks_for_parallel",
                format!(
                    "{} outside the accepted range 1..=1000",
                    self.min_chunks_for_parallel
                ),
            ));
        }
        Ok(())
    }

    /// Worker count to actually use, after applying the hardware default.
    pub fn effective_workers(&self) -> usize {
        if self.max_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_workers
        }
    }
}

/// Filesystem-level configuration (TOML-loadable).
///
/// The key provider is runtime state, not configuration; it is handed to
/// `EncryptFs::new` next to this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content AEAD. `auto` binds to AES-256-GCM.
    pub cipher: CipherSuite,
    /// Filename handling mode.
    pub filename_encryption: FilenameMode,
    /// Keep the plaintext suffix after the last `.` (deterministic mode only).
    pub preserve_extensions: bool,
    /// Where the token catalog lives on the backing store (random mode).
    pub catalog_path: Option<PathBuf>,
    /// Plaintext bytes per chunk. 0 selects the single-record strategy.
    pub chunk_size: u32,
    pub parallel: ParallelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cipher: CipherSuite::Auto,
            filename_encryption: FilenameMode::None,
            preserve_extensions: false,
            catalog_path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel: ParallelConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size != 0 {
            if self.chunk_size < MIN_CONFIG_CHUNK_SIZE {
                return Err(Error::validation(
                    "chunk_size",
                    format!(
                        "{} below the minimum of {} bytes",
                        self.chunk_size, MIN_CONFIG_CHUNK_SIZE
                    ),
                ));
            }
            if self.chunk_size > MAX_CHUNK_SIZE {
                return Err(Error::validation(
                    "chunk_size",
                    format!(
                        "{} above the maximum of {} bytes",
                        self.chunk_size, MAX_CHUNK_SIZE
                    ),
                ));
            }
        } else if self.parallel.enabled {
            return Err(Error::validation(
                "parallel.enabled",
                "parallel I/O requires a nonzero chunk_size",
            ));
        }

        self.parallel.validate()?;

        if self.filename_encryption == FilenameMode::Random && self.catalog_path.is_none() {
            return Err(Error::validation(
                "catalog_path",
                "required when filename_encryption is \"random\"",
            ));
        }

        Ok(())
    }
}
