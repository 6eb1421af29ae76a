//! Config - pipeline configuration
//!
//! Worker pool sizing, retry policy and storage locations. Loaded from a
//! TOML file; every section has working defaults so a missing file or a
//! partial file is fine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name
pub const CONFIG_FILE: &str = "filepipe.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub maintenance: MaintenanceConfig,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the task database
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".filepipe"),
        }
    }
}

/// Worker pool and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent worker tasks pulling from the queue
    pub pool_size: usize,

    /// Per-job retry budget recorded on new task records
    pub max_retries: i64,

    /// Base delay before a retried job is re-enqueued
    pub retry_delay_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_retries: 3,
            retry_delay_secs: 60,
        }
    }
}

/// Periodic maintenance sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often stranded retry records are swept back onto the queue
    pub requeue_interval_secs: u64,

    /// How often the retention pass runs
    pub cleanup_interval_secs: u64,

    /// Terminal records older than this are removed (retention policy)
    pub retention_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            requeue_interval_secs: 60,
            cleanup_interval_secs: 1800,     // every 30 minutes
            retention_secs: 7 * 24 * 3600,   // one week
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load from a file if present, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
