//! Chunk record repository.

use crate::error::MetadataResult;
use crate::models::ChunkRecordRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for per-session chunk records.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Get one chunk record.
    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: i64,
    ) -> MetadataResult<Option<ChunkRecordRow>>;

    /// List a session's chunk records ordered by index.
    async fn list_chunks(&self, session_id: Uuid) -> MetadataResult<Vec<ChunkRecordRow>>;

    /// Count a session's chunk records marked uploaded.
    async fn count_uploaded_chunks(&self, session_id: Uuid) -> MetadataResult<i64>;
}
