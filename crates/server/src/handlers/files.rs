//! Chunked file upload and download handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use stitch_core::{MergeState, SessionId, UploadSession};
use stitch_uploads::UploadError;
use time::OffsetDateTime;

/// Maximum request body size for create requests (64 KiB).
const MAX_CREATE_BODY_SIZE: usize = 64 * 1024;

/// Additional buffer for chunk uploads beyond the max chunk size.
///
/// A body up to this much larger is read and then rejected with
/// `invalid_size` rather than a framing error.
const CHUNK_UPLOAD_BUFFER: usize = 1024;

/// POST /api/files request body.
#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    pub file_size: i64,
    #[serde(default)]
    pub chunk_size: Option<i64>,
}

/// POST /api/files response body.
#[derive(Debug, Serialize)]
pub struct CreateFileResponse {
    pub file_id: SessionId,
    pub total_chunks: u64,
    pub chunk_size: u64,
}

/// PUT /api/files/{file_id}/chunks/{chunk_index} response body.
#[derive(Debug, Serialize)]
pub struct ChunkUploadResponse {
    pub chunk_index: u64,
    pub uploaded: bool,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub completed: bool,
}

/// Session status as reported to clients.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub file_id: SessionId,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub uploaded_chunks: u64,
    pub completed: bool,
    pub merge_state: MergeState,
    /// The artifact can be downloaded.
    pub ready: bool,
    pub merge_failed: bool,
    pub merge_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<UploadSession> for FileResponse {
    fn from(session: UploadSession) -> Self {
        Self {
            file_id: session.id,
            ready: session.is_ready(),
            merge_failed: session.merge_failed(),
            filename: session.original_name,
            content_type: session.content_type,
            file_size: session.size,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            uploaded_chunks: session.uploaded_chunks,
            completed: session.completed,
            merge_state: session.merge_state,
            merge_error: session.merge_error,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// One object a deletion could not remove.
#[derive(Debug, Serialize)]
pub struct CleanupFailureResponse {
    pub key: String,
    pub error: String,
}

/// DELETE /api/files/{file_id} response body.
#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub file_id: SessionId,
    pub deleted: bool,
    pub cleanup_failures: Vec<CleanupFailureResponse>,
}

/// POST /api/files/{file_id}/merge response body.
#[derive(Debug, Serialize)]
pub struct RetryMergeResponse {
    pub file_id: SessionId,
    pub merge_state: MergeState,
}

/// Query string for windowed downloads.
#[derive(Debug, Deserialize)]
pub struct DownloadChunkQuery {
    /// Window size; defaults to the session's chunk size.
    pub chunk_size: Option<u64>,
}

fn parse_file_id(raw: &str) -> ApiResult<SessionId> {
    SessionId::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid file ID: {e}")))
}

fn parse_chunk_index(raw: &str) -> ApiResult<u64> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid chunk index {raw:?}: {e}")))
}

fn non_negative(field: &str, value: i64) -> ApiResult<u64> {
    u64::try_from(value).map_err(|_| {
        ApiError::Upload(UploadError::InvalidSize(format!(
            "{field} must not be negative, got {value}"
        )))
    })
}

/// Content types are echoed on download and must be valid header values.
fn validate_content_type(content_type: &str) -> ApiResult<()> {
    HeaderValue::from_str(content_type)
        .map(|_| ())
        .map_err(|_| ApiError::BadRequest(format!("invalid content type {content_type:?}")))
}

/// Build a `Content-Disposition: attachment` value with a quoted-string filename.
fn attachment_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    if safe.is_empty() {
        "attachment".to_string()
    } else {
        format!("attachment; filename=\"{safe}\"")
    }
}

/// POST /api/files - Start a chunked upload.
#[tracing::instrument(skip(state, req))]
pub async fn create_file(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateFileResponse>)> {
    let body: CreateFileRequest = {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_CREATE_BODY_SIZE)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?
    };

    if body.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename must not be empty".to_string()));
    }
    validate_content_type(&body.content_type)?;
    let file_size = non_negative("file_size", body.file_size)?;
    let chunk_size = body
        .chunk_size
        .map(|size| non_negative("chunk_size", size))
        .transpose()?;

    let session = state
        .files
        .initialize_upload(&body.filename, &body.content_type, file_size, chunk_size)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateFileResponse {
            file_id: session.id,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
        }),
    ))
}

/// PUT /api/files/{file_id}/chunks/{chunk_index} - Upload one chunk.
#[tracing::instrument(skip(state, req), fields(file_id = %file_id, chunk_index = %chunk_index))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((file_id, chunk_index)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let file_id = parse_file_id(&file_id)?;
    let index = parse_chunk_index(&chunk_index)?;

    let max_chunk_size = state.config.upload.max_chunk_size as usize;
    let data = axum::body::to_bytes(req.into_body(), max_chunk_size + CHUNK_UPLOAD_BUFFER)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read chunk: {e}")))?;

    if data.len() > max_chunk_size {
        return Err(ApiError::Upload(UploadError::InvalidSize(format!(
            "chunk size {} exceeds maximum {max_chunk_size}",
            data.len()
        ))));
    }

    let status = state.files.upload_chunk(file_id, index, data).await?;

    Ok(Json(ChunkUploadResponse {
        chunk_index: status.index,
        uploaded: true,
        uploaded_chunks: status.uploaded_chunks,
        total_chunks: status.total_chunks,
        completed: status.completed,
    }))
}

/// GET /api/files/{file_id} - Upload and merge status.
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<FileResponse>> {
    let file_id = parse_file_id(&file_id)?;
    let session = state.files.get_file_metadata(file_id).await?;
    Ok(Json(session.into()))
}

/// GET /api/files - All sessions in creation order.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<Vec<FileResponse>>> {
    let sessions = state.files.list_files().await?;
    Ok(Json(sessions.into_iter().map(FileResponse::from).collect()))
}

/// GET /api/files/{file_id}/download - Stream the merged file.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Response> {
    let file_id = parse_file_id(&file_id)?;
    let artifact = state.files.open_file(file_id).await?;

    let body_stream = artifact
        .stream
        .map_err(|e| std::io::Error::other(e.to_string()));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, artifact.session.content_type.clone()),
            (CONTENT_LENGTH, artifact.size.to_string()),
            (
                CONTENT_DISPOSITION,
                attachment_disposition(&artifact.session.original_name),
            ),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// GET /api/files/{file_id}/chunks/{chunk_index} - Read one window of the merged file.
#[tracing::instrument(skip(state, query), fields(file_id = %file_id, chunk_index = %chunk_index))]
pub async fn download_chunk(
    State(state): State<AppState>,
    Path((file_id, chunk_index)): Path<(String, String)>,
    Query(query): Query<DownloadChunkQuery>,
) -> ApiResult<Response> {
    let file_id = parse_file_id(&file_id)?;
    let index = parse_chunk_index(&chunk_index)?;

    let chunk_size = match query.chunk_size {
        Some(size) => size,
        None => state.files.get_file_metadata(file_id).await?.chunk_size,
    };
    let data = state.files.download_chunk(file_id, index, chunk_size).await?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/octet-stream")],
        Body::from(data),
    )
        .into_response())
}

/// DELETE /api/files/{file_id} - Delete a session and its stored bytes.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<DeleteFileResponse>> {
    let file_id = parse_file_id(&file_id)?;
    let report = state.files.delete_file(file_id).await?;

    Ok(Json(DeleteFileResponse {
        file_id,
        deleted: true,
        cleanup_failures: report
            .failures
            .into_iter()
            .map(|f| CleanupFailureResponse {
                key: f.key,
                error: f.error,
            })
            .collect(),
    }))
}

/// POST /api/files/{file_id}/merge - Retry a failed merge.
#[tracing::instrument(skip(state), fields(file_id = %file_id))]
pub async fn retry_merge(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<(StatusCode, Json<RetryMergeResponse>)> {
    let file_id = parse_file_id(&file_id)?;
    let session = state.files.retry_merge(file_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RetryMergeResponse {
            file_id,
            merge_state: session.merge_state,
        }),
    ))
}
