//! Upload engine error types.

use stitch_core::SessionId;
use stitch_metadata::MetadataError;
use stitch_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the upload tracker, merge engine and range reader.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("upload session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("chunk index {index} out of range (session has {total} chunks)")]
    ChunkIndexOutOfRange { index: u64, total: u64 },

    #[error("failed to store chunk {index}: {source}")]
    ChunkWriteFailure {
        index: u64,
        #[source]
        source: StorageError,
    },

    #[error("upload session {0} is not ready for download")]
    NotReady(SessionId),

    #[error("upload session {0} is already completed")]
    SessionCompleted(SessionId),

    #[error("upload session {session_id} cannot be merged again (merge state: {state})")]
    NotRetryable { session_id: SessionId, state: String },

    #[error("merge failed for upload session {session_id}: {reason}")]
    MergeFailure {
        session_id: SessionId,
        reason: String,
    },

    #[error("merge engine is shut down")]
    Shutdown,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<stitch_core::Error> for UploadError {
    fn from(err: stitch_core::Error) -> Self {
        match err {
            stitch_core::Error::InvalidSize(msg) => Self::InvalidSize(msg),
            other => Self::InvalidSize(other.to_string()),
        }
    }
}

/// Result type for upload engine operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
