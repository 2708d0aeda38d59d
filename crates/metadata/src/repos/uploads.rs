//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{ChunkProgress, ChunkRecordRow, UploadSessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for upload session operations.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a session together with its pre-allocated chunk records.
    ///
    /// Both are written in one transaction.
    async fn create_session(
        &self,
        session: &UploadSessionRow,
        chunks: &[ChunkRecordRow],
    ) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, session_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// List every session in creation order.
    async fn list_sessions(&self) -> MetadataResult<Vec<UploadSessionRow>>;

    /// List sessions in the given merge state, in creation order.
    async fn list_sessions_by_merge_state(
        &self,
        merge_state: &str,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Mark a chunk uploaded and run completion detection.
    ///
    /// In one transaction: points the chunk record at `storage_key` and marks
    /// it uploaded with `size_bytes`, recounts uploaded chunks onto the
    /// session and, if every chunk is now present and the session was not
    /// completed, flips `completed` and moves `merge_state` to `merging`.
    /// `merge_claimed` is true only for the call that performed that flip.
    /// `replaced_key` names the object of an earlier upload of the same chunk.
    ///
    /// Returns `NotFound` for an unknown session or chunk index and
    /// `InvalidStateTransition` if the session is already completed. In both
    /// cases the record is left untouched.
    async fn record_chunk_upload(
        &self,
        session_id: Uuid,
        chunk_index: i64,
        storage_key: &str,
        size_bytes: i64,
        uploaded_at: OffsetDateTime,
    ) -> MetadataResult<ChunkProgress>;

    /// Claim a new merge for a session whose last merge failed.
    ///
    /// Returns `true` if the claim succeeded (`failed` -> `merging`, completed again).
    async fn claim_merge_retry(
        &self,
        session_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Record a successful merge (`merging` -> `merged`).
    async fn complete_merge(&self, session_id: Uuid, updated_at: OffsetDateTime)
    -> MetadataResult<()>;

    /// Record a failed merge (`merging` -> `failed`) and clear `completed`.
    async fn fail_merge(
        &self,
        session_id: Uuid,
        error: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a session and all of its chunk records in one transaction.
    ///
    /// Returns the chunk records as they were at deletion time.
    async fn delete_session(&self, session_id: Uuid) -> MetadataResult<Vec<ChunkRecordRow>>;
}
