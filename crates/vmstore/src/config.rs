//! Store configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `VMSTORE_DB_PATH`: Path of the sled database
//! - `VMSTORE_READONLY`: Set to "true" for read-only mode
//!
//! Default path: `~/.vmstore/db`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration for a checkpoint store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of the sled database.
    pub db_path: PathBuf,

    /// Read-only mode - every mutation fails with `StoreError::ReadOnly`.
    /// Useful for inspection tools pointed at a live store.
    #[serde(default)]
    pub read_only: bool,

    /// Flush to disk after every committed batch.
    #[serde(default = "default_true")]
    pub flush_on_commit: bool,

    /// Sled page cache size.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: u64,

    /// Default log filter for binaries embedding the store.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_db_path(default_db_path())
    }
}

/// Get the default database path (~/.vmstore/db).
fn default_db_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".vmstore").join("db"))
        .unwrap_or_else(|| PathBuf::from(".vmstore/db"))
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `VMSTORE_DB_PATH`: Override the database path
    /// - `VMSTORE_READONLY`: Set to "true" for read-only mode
    pub fn from_env() -> Result<Self> {
        let db_path = env::var("VMSTORE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_db_path());

        let read_only = env::var("VMSTORE_READONLY")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            read_only,
            ..Self::with_db_path(db_path)
        })
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[store]` section:
    /// ```toml
    /// [store]
    /// db_path = "/var/lib/vmstore/db"
    /// read_only = false
    /// flush_on_commit = true
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

        if let Some(section) = table.get("store") {
            let config: StoreConfig = section
                .clone()
                .try_into()
                .context("failed to parse [store] section")?;
            Ok(config)
        } else {
            Self::from_env()
        }
    }

    /// Create a config with a specific database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            read_only: false,
            flush_on_commit: true,
            cache_capacity_bytes: default_cache_capacity(),
            log_level: default_log_level(),
        }
    }

    /// Create a read-only config with a specific database path.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            flush_on_commit: false,
            ..Self::with_db_path(path)
        }
    }
}
