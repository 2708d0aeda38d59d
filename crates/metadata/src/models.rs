//! Database models mapping to the metadata schema.
//!
//! Counts and sizes are `u64` in the domain and `INTEGER` (i64) in SQLite;
//! the conversions here reject values that do not fit either way.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use stitch_core::{ChunkRecord, MergeState, SessionId, UploadSession};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub session_id: Uuid,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub uploaded_chunks: i64,
    pub completed: bool,
    pub merge_state: String,
    pub merge_error: Option<String>,
    pub artifact_key: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<&UploadSession> for UploadSessionRow {
    type Error = MetadataError;

    fn try_from(session: &UploadSession) -> MetadataResult<Self> {
        Ok(Self {
            session_id: *session.id.as_uuid(),
            original_name: session.original_name.clone(),
            content_type: session.content_type.clone(),
            size_bytes: to_db("size_bytes", session.size)?,
            chunk_size: to_db("chunk_size", session.chunk_size)?,
            total_chunks: to_db("total_chunks", session.total_chunks)?,
            uploaded_chunks: to_db("uploaded_chunks", session.uploaded_chunks)?,
            completed: session.completed,
            merge_state: session.merge_state.as_str().to_string(),
            merge_error: session.merge_error.clone(),
            artifact_key: session.artifact_key.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        })
    }
}

impl TryFrom<UploadSessionRow> for UploadSession {
    type Error = MetadataError;

    fn try_from(row: UploadSessionRow) -> MetadataResult<Self> {
        let merge_state: MergeState = row
            .merge_state
            .parse()
            .map_err(|e: stitch_core::Error| MetadataError::Internal(e.to_string()))?;
        Ok(Self {
            id: SessionId::from_uuid(row.session_id),
            original_name: row.original_name,
            content_type: row.content_type,
            size: from_db("size_bytes", row.size_bytes)?,
            chunk_size: from_db("chunk_size", row.chunk_size)?,
            total_chunks: from_db("total_chunks", row.total_chunks)?,
            uploaded_chunks: from_db("uploaded_chunks", row.uploaded_chunks)?,
            completed: row.completed,
            merge_state,
            merge_error: row.merge_error,
            artifact_key: row.artifact_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Chunk records
// =============================================================================

/// One chunk slot of an upload session.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRecordRow {
    pub session_id: Uuid,
    pub chunk_index: i64,
    pub storage_key: String,
    pub size_bytes: i64,
    pub uploaded: bool,
    pub uploaded_at: Option<OffsetDateTime>,
}

impl TryFrom<&ChunkRecord> for ChunkRecordRow {
    type Error = MetadataError;

    fn try_from(record: &ChunkRecord) -> MetadataResult<Self> {
        Ok(Self {
            session_id: *record.session_id.as_uuid(),
            chunk_index: to_db("chunk_index", record.index)?,
            storage_key: record.storage_key.clone(),
            size_bytes: to_db("size_bytes", record.size)?,
            uploaded: record.uploaded,
            uploaded_at: record.uploaded_at,
        })
    }
}

impl TryFrom<ChunkRecordRow> for ChunkRecord {
    type Error = MetadataError;

    fn try_from(row: ChunkRecordRow) -> MetadataResult<Self> {
        Ok(Self {
            session_id: SessionId::from_uuid(row.session_id),
            index: from_db("chunk_index", row.chunk_index)?,
            size: from_db("size_bytes", row.size_bytes)?,
            uploaded: row.uploaded,
            storage_key: row.storage_key,
            uploaded_at: row.uploaded_at,
        })
    }
}

/// Progress after recording one chunk upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Uploaded chunks, recounted inside the recording transaction.
    pub uploaded_chunks: i64,
    /// Total chunks in the session.
    pub total_chunks: i64,
    /// Whether the session is completed after this call.
    pub completed: bool,
    /// True only for the single call that flipped `completed` and now owns the merge.
    pub merge_claimed: bool,
    /// Object key of an earlier upload of the same chunk that this call replaced.
    pub replaced_key: Option<String>,
}

/// Convert a domain count into a database integer.
pub fn to_db(field: &str, value: u64) -> MetadataResult<i64> {
    i64::try_from(value)
        .map_err(|_| MetadataError::Constraint(format!("{field} {value} exceeds i64::MAX")))
}

/// Convert a database integer into a domain count.
pub fn from_db(field: &str, value: i64) -> MetadataResult<u64> {
    u64::try_from(value)
        .map_err(|_| MetadataError::Internal(format!("{field} is negative in database: {value}")))
}
