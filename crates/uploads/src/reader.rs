//! Range reads over merged artifacts.

use crate::error::{UploadError, UploadResult};
use crate::tracker::load_session;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use stitch_core::{SessionId, UploadSession, read_window};
use stitch_metadata::MetadataStore;
use stitch_storage::{ByteStream, MAX_RANGE_SIZE, ObjectStore, StorageError};
use tracing::instrument;

/// A merged artifact opened for streaming.
pub struct Artifact {
    /// The owning session.
    pub session: UploadSession,
    /// Artifact size in bytes.
    pub size: u64,
    /// Artifact contents.
    pub stream: ByteStream,
}

/// Serves reads of merged artifacts. Never touches chunk objects.
pub struct RangeReader {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    /// Longest range requested from the store in one call.
    range_limit: u64,
}

impl RangeReader {
    pub fn new(metadata: Arc<dyn MetadataStore>, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            metadata,
            storage,
            range_limit: MAX_RANGE_SIZE,
        }
    }

    #[cfg(test)]
    fn with_range_limit(mut self, limit: u64) -> Self {
        self.range_limit = limit.clamp(1, MAX_RANGE_SIZE);
        self
    }

    /// Read bytes `[index*chunk_size, min((index+1)*chunk_size, size))` of the artifact.
    ///
    /// A zero `chunk_size` or an index past the end of the artifact yields
    /// empty bytes. Windows longer than the store's range limit are read in
    /// pieces.
    #[instrument(skip_all, fields(session_id = %session_id, index = index, chunk_size = chunk_size))]
    pub async fn download_chunk(
        &self,
        session_id: SessionId,
        index: u64,
        chunk_size: u64,
    ) -> UploadResult<Bytes> {
        let session = self.ready_session(session_id).await?;
        if chunk_size == 0 {
            return Ok(Bytes::new());
        }
        let size = self.storage.head(&session.artifact_key).await?.size;

        let Some(window) = read_window(index, chunk_size, size) else {
            return Ok(Bytes::new());
        };
        if window.end - window.start <= self.range_limit {
            return self
                .read_range(&session.artifact_key, window.start, window.end)
                .await;
        }

        let len = usize::try_from(window.end - window.start).map_err(|_| {
            UploadError::InvalidSize(format!(
                "window {}..{} exceeds platform address space",
                window.start, window.end
            ))
        })?;
        let mut buf = BytesMut::with_capacity(len);
        let mut start = window.start;
        while start < window.end {
            let end = start.saturating_add(self.range_limit).min(window.end);
            buf.extend_from_slice(&self.read_range(&session.artifact_key, start, end).await?);
            start = end;
        }
        Ok(buf.freeze())
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> UploadResult<Bytes> {
        self.storage
            .get_range(key, start, end)
            .await
            .map_err(|e| match e {
                StorageError::InvalidRange(msg) => UploadError::InvalidSize(msg),
                other => UploadError::Storage(other),
            })
    }

    /// Read the whole artifact into memory.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn download_whole_file(&self, session_id: SessionId) -> UploadResult<Bytes> {
        let session = self.ready_session(session_id).await?;
        Ok(self.storage.get(&session.artifact_key).await?)
    }

    /// Open the artifact as a stream.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn open_artifact(&self, session_id: SessionId) -> UploadResult<Artifact> {
        let session = self.ready_session(session_id).await?;
        let size = self.storage.head(&session.artifact_key).await?.size;
        let stream = self.storage.get_stream(&session.artifact_key).await?;
        Ok(Artifact {
            session,
            size,
            stream,
        })
    }

    async fn ready_session(&self, session_id: SessionId) -> UploadResult<UploadSession> {
        let session = load_session(self.metadata.as_ref(), session_id).await?;
        if !session.is_ready() {
            return Err(UploadError::NotReady(session_id));
        }
        Ok(session)
    }
}
