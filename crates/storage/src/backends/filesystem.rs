//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, MAX_RANGE_SIZE, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Read size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
///
/// Every key maps to a file under `root`. Whole-object writes go through a
/// uniquely named temp file in the same directory followed by a rename, so
/// concurrent writers to distinct keys never contend and a rewrite of one
/// key never exposes a partially written file.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Canonicalization touches the filesystem, so it runs on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<fs::File> {
        let path = self.key_path(key).await?;
        fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, key))
    }
}

/// Map a missing file to `NotFound`, anything else to `Io`.
fn not_found_or_io(err: std::io::Error, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// Sibling path used while a write is in flight.
fn temp_path_for(path: &Path) -> PathBuf {
    let suffix = format!(".tmp.{}", Uuid::new_v4());
    let name = path
        .file_name()
        .map(|n| format!("{}{}", n.to_string_lossy(), suffix))
        .unwrap_or(suffix);
    path.with_file_name(name)
}

/// Validate `key` and join it onto `root`.
///
/// Rejects absolute keys and `..`/`.` components outright. For paths that
/// already exist, and otherwise for their nearest existing ancestor, the
/// canonical form must stay under the canonical root, so a symlink planted
/// inside the store cannot redirect reads or writes elsewhere.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.starts_with('/') || key.starts_with('\\') || key.contains("..") {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "contains unsafe path component: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    // Check the key itself if present, else walk up to the first ancestor
    // that exists.
    let mut ancestor = Some(path.as_path());
    while let Some(candidate) = ancestor {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let canonical = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                ancestor = candidate.parent();
            }
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }
    }

    Ok(path)
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, key))?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(e, key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let file = self.open(key).await?;
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        let range_size = end - start;
        if range_size > MAX_RANGE_SIZE {
            return Err(StorageError::InvalidRange(format!(
                "range size {range_size} exceeds maximum {MAX_RANGE_SIZE} bytes"
            )));
        }
        let len = usize::try_from(range_size).map_err(|_| {
            StorageError::InvalidRange(format!(
                "range size {range_size} exceeds platform address space"
            ))
        })?;

        let mut file = self.open(key).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                StorageError::InvalidRange(format!("range {start}..{end} past end of {key}"))
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(Bytes::from(buf))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file: Some(file),
            temp_path,
            final_path: path,
            bytes_written: 0,
            settled: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(e, key))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload into a temp file, renamed over the key on finish.
///
/// Dropped without `finish` or `abort`, it removes the temp file.
struct FilesystemUpload {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
    settled: bool,
}

impl FilesystemUpload {
    fn file(&mut self) -> StorageResult<&mut fs::File> {
        self.file.as_mut().ok_or_else(|| {
            StorageError::Io(std::io::Error::other(format!(
                "upload to {:?} already closed",
                self.final_path
            )))
        })
    }
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file()?.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        self.file()?.sync_all().await?;
        drop(self.file.take());
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.settled = true;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        self.settled = true;
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

impl Drop for FilesystemUpload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(path = ?self.temp_path, error = %e, "Failed to remove abandoned temp file");
        }
    }
}
