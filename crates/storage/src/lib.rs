//! Object storage abstraction and backends for stitch.
//!
//! This crate provides:
//! - The `ObjectStore` port used for chunk bytes and merged artifacts
//! - Atomic whole-object writes and streaming writes
//! - A local filesystem backend

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, MAX_RANGE_SIZE, ObjectMeta, ObjectStore, StreamingUpload};

use stitch_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
