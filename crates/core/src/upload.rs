//! Upload session types and lifecycle.

use crate::chunk::total_chunks;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidSessionId(format!("{s}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Object store key of the merged artifact for this session.
    ///
    /// Fanned out by the first two hex digits so a single directory never
    /// holds every artifact.
    pub fn artifact_key(&self) -> String {
        let hex = self.0.simple().to_string();
        format!("artifacts/{}/{}", &hex[..2], hex)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of the merge that turns uploaded chunks into the artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeState {
    /// Waiting for chunks.
    Pending,
    /// All chunks arrived and a merge has been claimed.
    Merging,
    /// Artifact written successfully.
    Merged,
    /// The last merge attempt failed.
    Failed,
}

impl MergeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for MergeState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "merging" => Ok(Self::Merging),
            "merged" => Ok(Self::Merged),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidMergeState(other.to_string())),
        }
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunked upload and the artifact it produces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// File name supplied by the client.
    pub original_name: String,
    /// Declared content type.
    pub content_type: String,
    /// Declared total size in bytes.
    pub size: u64,
    /// Chunk size for this upload.
    pub chunk_size: u64,
    /// Number of chunks, `ceil(size / chunk_size)`.
    pub total_chunks: u64,
    /// Number of chunks marked uploaded.
    pub uploaded_chunks: u64,
    /// Set once every chunk has arrived and the merge has been claimed.
    pub completed: bool,
    /// Merge progress.
    pub merge_state: MergeState,
    /// Error recorded by the last failed merge.
    pub merge_error: Option<String>,
    /// Object store key of the merged artifact.
    pub artifact_key: String,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new upload session.
    ///
    /// A zero-byte upload has no chunks, so it starts out completed with
    /// its (empty) merge already claimed.
    pub fn new(
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
        chunk_size: u64,
    ) -> crate::Result<Self> {
        let total_chunks = total_chunks(size, chunk_size)?;
        let id = SessionId::new();
        let now = OffsetDateTime::now_utc();
        let empty = total_chunks == 0;
        Ok(Self {
            id,
            original_name: original_name.into(),
            content_type: content_type.into(),
            size,
            chunk_size,
            total_chunks,
            uploaded_chunks: 0,
            completed: empty,
            merge_state: if empty {
                MergeState::Merging
            } else {
                MergeState::Pending
            },
            merge_error: None,
            artifact_key: id.artifact_key(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the artifact can be downloaded.
    pub fn is_ready(&self) -> bool {
        self.completed && self.merge_state == MergeState::Merged
    }

    /// Whether the last merge attempt failed.
    pub fn merge_failed(&self) -> bool {
        self.merge_state == MergeState::Failed
    }

    /// Whether every chunk has been uploaded.
    pub fn all_chunks_uploaded(&self) -> bool {
        self.uploaded_chunks == self.total_chunks
    }
}

/// Result of accepting one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStatus {
    /// Index of the chunk just written.
    pub index: u64,
    /// Chunks uploaded so far, including this one.
    pub uploaded_chunks: u64,
    /// Total chunks in the session.
    pub total_chunks: u64,
    /// Whether the session is complete.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrips_through_display() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn session_id_rejects_garbage() {
        assert!(matches!(
            SessionId::parse("not-a-uuid"),
            Err(crate::Error::InvalidSessionId(_))
        ));
    }

    #[test]
    fn artifact_key_is_fanned_out() {
        let id = SessionId::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
        assert_eq!(
            id.artifact_key(),
            "artifacts/3f/3f2504e04f8911d39a0c0305e82c3301"
        );
    }

    #[test]
    fn new_session_counts_chunks() {
        let session = UploadSession::new("video.mp4", "video/mp4", 3_000_000, 1_048_576).unwrap();
        assert_eq!(session.total_chunks, 3);
        assert_eq!(session.uploaded_chunks, 0);
        assert!(!session.completed);
        assert_eq!(session.merge_state, MergeState::Pending);
        assert!(!session.is_ready());
        assert_eq!(session.artifact_key, session.id.artifact_key());
    }

    #[test]
    fn empty_session_starts_merging() {
        let session = UploadSession::new("empty.bin", "application/octet-stream", 0, 1024).unwrap();
        assert_eq!(session.total_chunks, 0);
        assert!(session.completed);
        assert_eq!(session.merge_state, MergeState::Merging);
        assert!(!session.is_ready());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(UploadSession::new("a", "b", 10, 0).is_err());
    }

    #[test]
    fn merge_state_parses_its_own_names() {
        for state in [
            MergeState::Pending,
            MergeState::Merging,
            MergeState::Merged,
            MergeState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<MergeState>().unwrap(), state);
        }
        assert!("done".parse::<MergeState>().is_err());
    }

    #[test]
    fn ready_requires_completed_and_merged() {
        let mut session = UploadSession::new("a", "b", 10, 4).unwrap();
        session.merge_state = MergeState::Merged;
        assert!(!session.is_ready());
        session.completed = true;
        assert!(session.is_ready());
        session.merge_state = MergeState::Failed;
        assert!(!session.is_ready());
        assert!(session.merge_failed());
    }
}
