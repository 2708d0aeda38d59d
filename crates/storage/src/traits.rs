//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Longest range a single `get_range` call returns (128 MiB).
pub const MAX_RANGE_SIZE: u64 = 128 * 1024 * 1024;

/// A stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object storage backend trait.
///
/// Keys are `/`-separated relative paths. Writes replace the whole object
/// atomically, so a reader racing a rewrite of the same key sees either
/// the old or the new bytes, never a mix.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get object metadata.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's full contents.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Get a byte range `[start, end)` of an object.
    ///
    /// Ranges longer than [`MAX_RANGE_SIZE`] fail with `InvalidRange`.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Put an object, replacing any previous contents.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Check backend health.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Object metadata.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
