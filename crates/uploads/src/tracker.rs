//! Upload tracker: session creation, chunk acceptance and completion detection.

use crate::error::{UploadError, UploadResult};
use crate::merge::MergeEngine;
use crate::metrics::{
    BYTES_UPLOADED, CHUNK_UPLOAD_DURATION, CHUNKS_UPLOADED, CLEANUP_FAILURES,
    UPLOAD_SESSIONS_CREATED, UPLOAD_SESSIONS_DELETED,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use stitch_core::config::UploadConfig;
use stitch_core::{ChunkRecord, ChunkStatus, MergeState, SessionId, UploadSession, chunk_upload_key};
use stitch_metadata::{ChunkRecordRow, ChunkRepo, MetadataError, MetadataStore, UploadRepo, UploadSessionRow};
use uuid::Uuid;
use stitch_storage::ObjectStore;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Load a session or fail with `SessionNotFound`.
pub(crate) async fn load_session(
    metadata: &dyn MetadataStore,
    session_id: SessionId,
) -> UploadResult<UploadSession> {
    let row = metadata
        .get_session(*session_id.as_uuid())
        .await?
        .ok_or(UploadError::SessionNotFound(session_id))?;
    Ok(UploadSession::try_from(row)?)
}

/// Object left behind by a session deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupFailure {
    /// Object store key that could not be removed.
    pub key: String,
    /// Why the removal failed.
    pub error: String,
}

/// Outcome of deleting a session.
///
/// The session record is gone either way; `failures` lists stored objects
/// that could not be removed.
#[derive(Clone, Debug, Default)]
pub struct DeleteReport {
    /// Objects actually removed from storage.
    pub objects_removed: u64,
    /// Objects that could not be removed.
    pub failures: Vec<CleanupFailure>,
}

impl DeleteReport {
    /// Whether storage cleanup finished without errors.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Tracks upload sessions and their chunks.
pub struct UploadTracker {
    config: UploadConfig,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    merges: Arc<MergeEngine>,
}

impl UploadTracker {
    pub fn new(
        config: UploadConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        merges: Arc<MergeEngine>,
    ) -> Self {
        Self {
            config,
            metadata,
            storage,
            merges,
        }
    }

    /// Upload limits in effect.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Start a new upload.
    ///
    /// Persists the session with `total_chunks` pre-allocated, unuploaded
    /// chunk records. `chunk_size` falls back to the configured default.
    #[instrument(skip(self), fields(session_id = tracing::field::Empty))]
    pub async fn begin_session(
        &self,
        original_name: &str,
        content_type: &str,
        size: u64,
        chunk_size: Option<u64>,
    ) -> UploadResult<UploadSession> {
        let chunk_size = chunk_size.unwrap_or(self.config.default_chunk_size);
        if chunk_size == 0 || chunk_size > self.config.max_chunk_size {
            return Err(UploadError::InvalidSize(format!(
                "chunk size {chunk_size} must be between 1 and {}",
                self.config.max_chunk_size
            )));
        }
        let content_type = if content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };

        let session = UploadSession::new(original_name, content_type, size, chunk_size)?;
        if session.total_chunks > self.config.max_total_chunks {
            return Err(UploadError::InvalidSize(format!(
                "{size} bytes in chunks of {chunk_size} needs {} chunks (max {})",
                session.total_chunks, self.config.max_total_chunks
            )));
        }
        tracing::Span::current().record("session_id", tracing::field::display(session.id));

        let row = UploadSessionRow::try_from(&session)?;
        let chunks = (0..session.total_chunks)
            .map(|index| ChunkRecordRow::try_from(&ChunkRecord::pending(session.id, index)))
            .collect::<Result<Vec<_>, _>>()?;
        self.metadata.create_session(&row, &chunks).await?;
        UPLOAD_SESSIONS_CREATED.inc();

        info!(
            name = %session.original_name,
            size = session.size,
            chunk_size = session.chunk_size,
            total_chunks = session.total_chunks,
            "Upload session created"
        );

        // An empty file has no last chunk to trigger its merge.
        if session.merge_state == MergeState::Merging {
            self.schedule_merge(session.id);
        }

        Ok(session)
    }

    /// Store one chunk and update completion state.
    ///
    /// Every write goes to a fresh object; the registry swaps the chunk's key
    /// only while the session is still open. Re-sending an index before the
    /// session completes replaces the earlier bytes. A write that loses to
    /// completion or deletion removes its own object. The call that delivers
    /// the final missing chunk schedules the merge and returns immediately.
    #[instrument(skip_all, fields(session_id = %session_id, index = index, size = data.len()))]
    pub async fn accept_chunk(
        &self,
        session_id: SessionId,
        index: u64,
        data: Bytes,
    ) -> UploadResult<ChunkStatus> {
        let start = Instant::now();
        let session = load_session(self.metadata.as_ref(), session_id).await?;

        if index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfRange {
                index,
                total: session.total_chunks,
            });
        }
        if session.completed {
            return Err(UploadError::SessionCompleted(session_id));
        }
        let size = data.len() as u64;
        if size > session.chunk_size {
            return Err(UploadError::InvalidSize(format!(
                "chunk {index} is {size} bytes, larger than the session chunk size {}",
                session.chunk_size
            )));
        }

        let key = chunk_upload_key(&session_id, index, Uuid::new_v4());
        self.storage
            .put(&key, data)
            .await
            .map_err(|source| UploadError::ChunkWriteFailure { index, source })?;

        let chunk_index = i64::try_from(index).map_err(|_| UploadError::ChunkIndexOutOfRange {
            index,
            total: session.total_chunks,
        })?;
        let size_bytes = i64::try_from(size)
            .map_err(|_| UploadError::InvalidSize(format!("chunk of {size} bytes")))?;

        let recorded = self
            .metadata
            .record_chunk_upload(
                *session_id.as_uuid(),
                chunk_index,
                &key,
                size_bytes,
                OffsetDateTime::now_utc(),
            )
            .await;
        let progress = match recorded {
            Ok(progress) => progress,
            Err(e) => {
                // The record never pointed at this object.
                self.discard_object(&key).await;
                return Err(match e {
                    MetadataError::InvalidStateTransition { .. } => {
                        UploadError::SessionCompleted(session_id)
                    }
                    MetadataError::NotFound(_) => UploadError::SessionNotFound(session_id),
                    other => UploadError::Metadata(other),
                });
            }
        };
        if let Some(replaced) = &progress.replaced_key {
            self.discard_object(replaced).await;
        }

        CHUNKS_UPLOADED.inc();
        BYTES_UPLOADED.inc_by(size);
        CHUNK_UPLOAD_DURATION.observe(start.elapsed().as_secs_f64());

        debug!(
            index,
            uploaded = progress.uploaded_chunks,
            total = progress.total_chunks,
            "Chunk recorded"
        );

        if progress.merge_claimed {
            info!(total_chunks = progress.total_chunks, "All chunks received");
            self.schedule_merge(session_id);
        }

        Ok(ChunkStatus {
            index,
            uploaded_chunks: stitch_metadata::models::from_db(
                "uploaded_chunks",
                progress.uploaded_chunks,
            )?,
            total_chunks: session.total_chunks,
            completed: progress.completed,
        })
    }

    /// Get a session by ID.
    pub async fn get_session(&self, session_id: SessionId) -> UploadResult<UploadSession> {
        load_session(self.metadata.as_ref(), session_id).await
    }

    /// All sessions in creation order.
    pub async fn list_sessions(&self) -> UploadResult<Vec<UploadSession>> {
        self.metadata
            .list_sessions()
            .await?
            .into_iter()
            .map(|row| UploadSession::try_from(row).map_err(UploadError::from))
            .collect()
    }

    /// Chunk records of a session, ordered by index.
    pub async fn list_chunks(&self, session_id: SessionId) -> UploadResult<Vec<ChunkRecord>> {
        // Distinguish an unknown session from one with zero chunks.
        load_session(self.metadata.as_ref(), session_id).await?;
        self.metadata
            .list_chunks(*session_id.as_uuid())
            .await?
            .into_iter()
            .map(|row| ChunkRecord::try_from(row).map_err(UploadError::from))
            .collect()
    }

    /// Delete a session, its chunks and its artifact.
    ///
    /// The session record goes first, so a chunk write still in flight finds
    /// the session gone and removes its own object. Storage removals are best
    /// effort: missing objects are ignored, other failures are logged and
    /// returned in the report.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn delete_session(&self, session_id: SessionId) -> UploadResult<DeleteReport> {
        let session = load_session(self.metadata.as_ref(), session_id).await?;
        let chunks = self
            .metadata
            .delete_session(*session_id.as_uuid())
            .await
            .map_err(|e| match e {
                MetadataError::NotFound(_) => UploadError::SessionNotFound(session_id),
                other => UploadError::Metadata(other),
            })?;
        UPLOAD_SESSIONS_DELETED.inc();

        let mut report = DeleteReport::default();
        for chunk in chunks.iter().filter(|c| c.uploaded) {
            self.remove_object(&chunk.storage_key, "chunk", &mut report)
                .await;
        }
        self.remove_object(&session.artifact_key, "artifact", &mut report)
            .await;

        info!(
            objects_removed = report.objects_removed,
            cleanup_failures = report.failures.len(),
            "Upload session deleted"
        );
        Ok(report)
    }

    /// Start a new merge for a session whose last merge failed.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn retry_merge(&self, session_id: SessionId) -> UploadResult<UploadSession> {
        let session = load_session(self.metadata.as_ref(), session_id).await?;
        let claimed = self
            .metadata
            .claim_merge_retry(*session_id.as_uuid(), OffsetDateTime::now_utc())
            .await?;
        if !claimed {
            return Err(UploadError::NotRetryable {
                session_id,
                state: session.merge_state.to_string(),
            });
        }

        info!("Retrying merge");
        self.merges.submit(session_id)?;
        load_session(self.metadata.as_ref(), session_id).await
    }

    /// Requeue merges left `merging` by a previous process.
    ///
    /// Returns how many were requeued.
    pub async fn recover_interrupted_merges(&self) -> UploadResult<usize> {
        let rows = self
            .metadata
            .list_sessions_by_merge_state(MergeState::Merging.as_str())
            .await?;
        let count = rows.len();
        for row in rows {
            self.merges
                .submit(SessionId::from_uuid(row.session_id))?;
        }
        if count > 0 {
            info!(count, "Requeued interrupted merges");
        }
        Ok(count)
    }

    fn schedule_merge(&self, session_id: SessionId) {
        // The claim is already recorded; if the queue is gone the session
        // stays `merging` and is requeued on the next start.
        if let Err(e) = self.merges.submit(session_id) {
            warn!(session_id = %session_id, error = %e, "Could not queue merge");
        }
    }

    /// Best-effort removal of a chunk object no record points at.
    async fn discard_object(&self, key: &str) {
        match self.storage.delete(key).await {
            Ok(()) => debug!(key, "Discarded unreferenced chunk object"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                CLEANUP_FAILURES.with_label_values(&["chunk"]).inc();
                warn!(key, error = %e, "Failed to discard unreferenced chunk object");
            }
        }
    }

    async fn remove_object(&self, key: &str, kind: &str, report: &mut DeleteReport) {
        match self.storage.delete(key).await {
            Ok(()) => report.objects_removed += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                CLEANUP_FAILURES.with_label_values(&[kind]).inc();
                warn!(key, error = %e, "Failed to remove {kind}, continuing");
                report.failures.push(CleanupFailure {
                    key: key.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
}
