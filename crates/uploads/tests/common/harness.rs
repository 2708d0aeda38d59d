//! Upload engine test harness.

use std::sync::Arc;
use std::time::Duration;
use stitch_core::config::{MergeConfig, UploadConfig};
use stitch_core::{MergeState, SessionId, UploadSession};
use stitch_metadata::{MetadataStore, SqliteStore};
use stitch_storage::{FilesystemBackend, ObjectStore};
use stitch_uploads::FileService;
use tempfile::TempDir;

use super::mocks::InstrumentedStore;

/// A file service over a temp-dir filesystem store and an in-memory registry.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestUploads {
    pub service: Arc<FileService>,
    pub store: Arc<InstrumentedStore>,
    pub metadata: Arc<dyn MetadataStore>,
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestUploads {
    pub async fn new() -> Self {
        Self::with_config(UploadConfig::default(), MergeConfig::default()).await
    }

    pub async fn with_config(upload: UploadConfig, merge: MergeConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path())
                .await
                .expect("Failed to create storage backend"),
        );
        let store = InstrumentedStore::new(backend);
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(":memory:", None)
                .await
                .expect("Failed to create metadata store"),
        );
        let service = Arc::new(FileService::new(
            upload,
            &merge,
            metadata.clone(),
            store.clone(),
        ));

        Self {
            service,
            store,
            metadata,
            temp_dir,
        }
    }

    /// Names of the chunk objects on disk for a session, sorted.
    pub fn chunk_files(&self, id: SessionId) -> Vec<String> {
        let dir = self.temp_dir.path().join("chunks").join(id.to_string());
        let mut names: Vec<String> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .map(|entry| {
                    entry
                        .expect("read chunk dir entry")
                        .file_name()
                        .to_string_lossy()
                        .into_owned()
                })
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => panic!("failed to read {}: {e}", dir.display()),
        };
        names.sort();
        names
    }

    /// Poll until the session's merge settles as merged or failed.
    pub async fn wait_for_merge(&self, id: SessionId) -> UploadSession {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let session = self
                .service
                .get_file_metadata(id)
                .await
                .expect("session should exist");
            if matches!(session.merge_state, MergeState::Merged | MergeState::Failed) {
                return session;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "merge did not settle: {session:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Create a session and upload every chunk of `data` in index order.
    pub async fn upload_all(&self, name: &str, data: &bytes::Bytes, chunk_size: u64) -> SessionId {
        let session = self
            .service
            .initialize_upload(name, "application/octet-stream", data.len() as u64, Some(chunk_size))
            .await
            .expect("initialize upload");
        for (index, chunk) in super::split_chunks(data, chunk_size as usize)
            .into_iter()
            .enumerate()
        {
            self.service
                .upload_chunk(session.id, index as u64, chunk)
                .await
                .expect("upload chunk");
        }
        session.id
    }
}
