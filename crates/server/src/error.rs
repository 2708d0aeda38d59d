//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stitch_metadata::MetadataError;
use stitch_storage::StorageError;
use stitch_uploads::UploadError;
use stitch_uploads::metrics::record_upload_error;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Upload(e) => match e {
                UploadError::InvalidSize(_) => "invalid_size",
                UploadError::SessionNotFound(_) => "session_not_found",
                UploadError::ChunkIndexOutOfRange { .. } => "chunk_index_out_of_range",
                UploadError::ChunkWriteFailure { .. } => "chunk_write_failure",
                UploadError::NotReady(_) => "not_ready",
                UploadError::SessionCompleted(_) => "session_completed",
                UploadError::NotRetryable { .. } => "not_retryable",
                UploadError::MergeFailure { .. } => "merge_failure",
                UploadError::Shutdown => "shutting_down",
                UploadError::Storage(_) => "storage_error",
                UploadError::Metadata(_) => "metadata_error",
            },
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(e) => match e {
                UploadError::InvalidSize(_) | UploadError::ChunkIndexOutOfRange { .. } => {
                    StatusCode::BAD_REQUEST
                }
                UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                UploadError::NotReady(_)
                | UploadError::SessionCompleted(_)
                | UploadError::NotRetryable { .. } => StatusCode::CONFLICT,
                UploadError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::ChunkWriteFailure { .. }
                | UploadError::MergeFailure { .. }
                | UploadError::Storage(_)
                | UploadError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(_) | Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        if let Self::Upload(_) = &self {
            record_upload_error(code);
        }
        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
