//! Core domain types and shared logic for stitch.
//!
//! This crate defines the data model used across all other crates:
//! - Upload session identity and lifecycle
//! - Chunk records, storage keys and byte-range arithmetic
//! - Configuration shared by the server and the upload engine

pub mod chunk;
pub mod config;
pub mod error;
pub mod upload;

pub use chunk::{ChunkRecord, chunk_object_key, chunk_upload_key, read_window, total_chunks};
pub use error::{Error, Result};
pub use upload::{ChunkStatus, MergeState, SessionId, UploadSession};

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Maximum chunk size: 64 MiB
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum number of chunks per session
pub const MAX_TOTAL_CHUNKS: u64 = 100_000;

/// Default merge copy buffer: 8 KiB
pub const DEFAULT_MERGE_BUFFER_SIZE: usize = 8 * 1024;
