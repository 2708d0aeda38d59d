//! Application state shared across handlers.

use std::sync::Arc;
use stitch_core::config::AppConfig;
use stitch_metadata::MetadataStore;
use stitch_storage::ObjectStore;
use stitch_uploads::FileService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload tracker, merge engine and range reader.
    pub files: Arc<FileService>,
    /// Storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
}

impl AppState {
    /// Create the state and start the merge workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let files = Arc::new(FileService::new(
            config.upload.clone(),
            &config.merge,
            metadata.clone(),
            storage.clone(),
        ));
        Self {
            config: Arc::new(config),
            files,
            storage,
            metadata,
        }
    }
}
