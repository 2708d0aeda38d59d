//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Chunked upload configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size used when a client does not request one.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,
    /// Largest chunk size a client may request, and the largest chunk body accepted.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Largest number of chunks a single session may be split into.
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: u64,
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_total_chunks() -> u64 {
    crate::MAX_TOTAL_CHUNKS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            max_total_chunks: default_max_total_chunks(),
        }
    }
}

impl UploadConfig {
    /// Validate chunk size limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("upload.max_chunk_size must be greater than 0".to_string());
        }
        if self.default_chunk_size == 0 || self.default_chunk_size > self.max_chunk_size {
            return Err(format!(
                "upload.default_chunk_size {} must be between 1 and upload.max_chunk_size ({})",
                self.default_chunk_size, self.max_chunk_size
            ));
        }
        if self.max_total_chunks == 0 {
            return Err("upload.max_total_chunks must be greater than 0".to_string());
        }
        // Chunk bodies are buffered in memory by the HTTP layer.
        if usize::try_from(self.max_chunk_size).is_err() {
            return Err(format!(
                "upload.max_chunk_size {} exceeds platform address space",
                self.max_chunk_size
            ));
        }
        Ok(())
    }
}

/// Merge worker pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Number of merge workers. Defaults to the number of CPUs.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Largest slice written to the artifact in one call.
    #[serde(default = "default_merge_buffer_size")]
    pub buffer_size: usize,
}

fn default_merge_buffer_size() -> usize {
    crate::DEFAULT_MERGE_BUFFER_SIZE
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            workers: None,
            buffer_size: default_merge_buffer_size(),
        }
    }
}

impl MergeConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Validate worker pool settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("merge.workers cannot be 0".to_string());
        }
        if self.buffer_size == 0 {
            return Err("merge.buffer_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("storage.path cannot be empty".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path, or `:memory:` for an ephemeral store.
        path: PathBuf,
        /// Advisory timeout for long-running queries, in seconds.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err("metadata.path cannot be empty".to_string())
            }
            MetadataConfig::Sqlite {
                query_timeout_secs: Some(0),
                ..
            } => Err("metadata.query_timeout_secs cannot be 0".to_string()),
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Chunked upload limits.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Merge worker pool.
    #[serde(default)]
    pub merge: MergeConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses an in-memory SQLite store and two merge workers.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            merge: MergeConfig {
                workers: Some(2),
                ..MergeConfig::default()
            },
            storage: StorageConfig::default(),
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: default_sqlite_query_timeout_secs(),
            },
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.upload.validate()?;
        self.merge.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        Ok(())
    }
}
