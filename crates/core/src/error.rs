//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid chunk size: {size} (must be between 1 and {max})")]
    InvalidChunkSize { size: u64, max: u64 },

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("invalid merge state: {0}")]
    InvalidMergeState(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
