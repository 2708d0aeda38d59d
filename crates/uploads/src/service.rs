//! The operations exposed to the boundary layer.

use crate::error::UploadResult;
use crate::merge::MergeEngine;
use crate::reader::{Artifact, RangeReader};
use crate::tracker::{DeleteReport, UploadTracker};
use bytes::Bytes;
use std::sync::Arc;
use stitch_core::config::{MergeConfig, UploadConfig};
use stitch_core::{ChunkStatus, SessionId, UploadSession};
use stitch_metadata::MetadataStore;
use stitch_storage::ObjectStore;

/// Upload tracker, merge engine and range reader wired to the same stores.
pub struct FileService {
    tracker: UploadTracker,
    reader: RangeReader,
    merges: Arc<MergeEngine>,
}

impl FileService {
    /// Build the service and start its merge workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        upload: UploadConfig,
        merge: &MergeConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        let merges = Arc::new(MergeEngine::start(merge, metadata.clone(), storage.clone()));
        let tracker = UploadTracker::new(upload, metadata.clone(), storage.clone(), merges.clone());
        let reader = RangeReader::new(metadata, storage);
        Self {
            tracker,
            reader,
            merges,
        }
    }

    pub fn tracker(&self) -> &UploadTracker {
        &self.tracker
    }

    pub fn reader(&self) -> &RangeReader {
        &self.reader
    }

    pub fn merges(&self) -> &MergeEngine {
        &self.merges
    }

    pub async fn initialize_upload(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
        chunk_size: Option<u64>,
    ) -> UploadResult<UploadSession> {
        self.tracker
            .begin_session(filename, content_type, size, chunk_size)
            .await
    }

    pub async fn upload_chunk(
        &self,
        file_id: SessionId,
        index: u64,
        data: Bytes,
    ) -> UploadResult<ChunkStatus> {
        self.tracker.accept_chunk(file_id, index, data).await
    }

    pub async fn get_file_metadata(&self, file_id: SessionId) -> UploadResult<UploadSession> {
        self.tracker.get_session(file_id).await
    }

    pub async fn list_files(&self) -> UploadResult<Vec<UploadSession>> {
        self.tracker.list_sessions().await
    }

    pub async fn download_whole_file(&self, file_id: SessionId) -> UploadResult<Bytes> {
        self.reader.download_whole_file(file_id).await
    }

    pub async fn open_file(&self, file_id: SessionId) -> UploadResult<Artifact> {
        self.reader.open_artifact(file_id).await
    }

    pub async fn download_chunk(
        &self,
        file_id: SessionId,
        index: u64,
        chunk_size: u64,
    ) -> UploadResult<Bytes> {
        self.reader.download_chunk(file_id, index, chunk_size).await
    }

    pub async fn delete_file(&self, file_id: SessionId) -> UploadResult<DeleteReport> {
        self.tracker.delete_session(file_id).await
    }

    pub async fn retry_merge(&self, file_id: SessionId) -> UploadResult<UploadSession> {
        self.tracker.retry_merge(file_id).await
    }

    /// Stop the merge workers, letting running merges finish.
    pub async fn shutdown(&self) {
        self.merges.shutdown().await;
    }
}
