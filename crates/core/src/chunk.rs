//! Chunk records and chunk arithmetic.

use crate::upload::SessionId;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use time::OffsetDateTime;
use uuid::Uuid;

/// Number of chunks needed to carry `size` bytes, `ceil(size / chunk_size)`.
pub fn total_chunks(size: u64, chunk_size: u64) -> crate::Result<u64> {
    if chunk_size == 0 {
        return Err(crate::Error::InvalidSize(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    Ok(size.div_ceil(chunk_size))
}

/// Object store key for one uploaded chunk.
pub fn chunk_object_key(session_id: &SessionId, index: u64) -> String {
    format!("chunks/{}/{:08}", session_id, index)
}

/// Object store key for one write attempt of a chunk.
///
/// Each attempt gets its own object; the registry decides which one the slot
/// points at. Keys share the `chunk_object_key` prefix and sort by index.
pub fn chunk_upload_key(session_id: &SessionId, index: u64, attempt: Uuid) -> String {
    format!("{}.{}", chunk_object_key(session_id, index), attempt.simple())
}

/// Byte range `[index*chunk_size, min((index+1)*chunk_size, total_size))`.
///
/// Returns `None` when the window starts at or past `total_size`, including
/// when `index * chunk_size` does not fit in a `u64`.
pub fn read_window(index: u64, chunk_size: u64, total_size: u64) -> Option<Range<u64>> {
    let start = index.checked_mul(chunk_size)?;
    if start >= total_size {
        return None;
    }
    let end = start.saturating_add(chunk_size).min(total_size);
    Some(start..end)
}

/// Metadata for one chunk slot of a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Owning session.
    pub session_id: SessionId,
    /// Position in the file (0-indexed).
    pub index: u64,
    /// Size of the stored bytes (0 until uploaded).
    pub size: u64,
    /// Whether bytes for this slot have been written.
    pub uploaded: bool,
    /// Object store key of the chunk bytes.
    pub storage_key: String,
    /// When the chunk was last written.
    #[serde(with = "time::serde::rfc3339::option")]
    pub uploaded_at: Option<OffsetDateTime>,
}

impl ChunkRecord {
    /// Create an unuploaded slot.
    pub fn pending(session_id: SessionId, index: u64) -> Self {
        Self {
            session_id,
            index,
            size: 0,
            uploaded: false,
            storage_key: chunk_object_key(&session_id, index),
            uploaded_at: None,
        }
    }
}
