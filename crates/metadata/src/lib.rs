//! Upload session registry for stitch.
//!
//! This crate provides the metadata port used by the upload engine:
//! - Upload sessions with completion and merge state
//! - Pre-allocated per-index chunk records
//! - A SQLite implementation whose transactions provide the atomic
//!   completion check

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ChunkProgress, ChunkRecordRow, UploadSessionRow};
pub use repos::{ChunkRepo, UploadRepo};
pub use store::{MetadataStore, SqliteStore};

use stitch_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
