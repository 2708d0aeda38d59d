//! Merge engine: turns a completed session's chunks into its artifact.
//!
//! Merges run on a fixed pool of worker tasks fed from one shared queue.
//! [`MergeEngine::submit`] only enqueues, so the chunk upload that completes
//! a session never waits for the merge it triggered. Merge outcomes are
//! written back to the session record, where `get_session` reports them.

use crate::error::{UploadError, UploadResult};
use crate::metrics::{MERGE_DURATION, MERGED_BYTES, MERGES_FAILED, MERGES_STARTED, MERGES_SUCCEEDED};
use crate::tracker::load_session;
use futures::TryStreamExt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use stitch_core::SessionId;
use stitch_core::config::MergeConfig;
use stitch_metadata::{ChunkRecordRow, ChunkRepo, MetadataError, MetadataStore, UploadRepo};
use stitch_storage::{ObjectStore, StreamingUpload};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Bounded pool of merge workers.
pub struct MergeEngine {
    merger: Arc<Merger>,
    queue: mpsc::UnboundedSender<SessionId>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl MergeEngine {
    /// Spawn the worker pool on the current Tokio runtime.
    pub fn start(
        config: &MergeConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        let worker_count = config.worker_count();
        let merger = Arc::new(Merger {
            metadata,
            storage,
            buffer_size: config.buffer_size.max(1),
        });
        let (queue, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    rx.clone(),
                    merger.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers = worker_count, buffer_size = merger.buffer_size, "Merge engine started");

        Self {
            merger,
            queue,
            shutdown,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Number of worker tasks.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue a merge. Never waits for a worker.
    ///
    /// The caller must already own the merge claim for this session.
    pub fn submit(&self, session_id: SessionId) -> UploadResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(UploadError::Shutdown);
        }
        self.queue
            .send(session_id)
            .map_err(|_| UploadError::Shutdown)?;
        debug!(session_id = %session_id, "Merge queued");
        Ok(())
    }

    /// Run the merge algorithm inline and return the artifact size.
    ///
    /// Does not touch the session's merge state; workers do that around this call.
    pub async fn run_merge(&self, session_id: SessionId) -> UploadResult<u64> {
        self.merger.merge(session_id).await
    }

    /// Stop taking new work and wait for the workers to exit.
    ///
    /// A merge that is already running finishes first. Queued merges stay
    /// `merging` in the registry and are picked up again on the next start.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Merge worker exited abnormally");
            }
        }
        info!("Merge engine stopped");
    }
}

impl Drop for MergeEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionId>>>,
    merger: Arc<Merger>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Merge worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(session_id) = next else {
            break;
        };

        merger
            .merge_and_record(session_id)
            .instrument(info_span!("merge", worker_id, session_id = %session_id))
            .await;
    }

    debug!(worker_id, "Merge worker stopped");
}

struct Merger {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    buffer_size: usize,
}

impl Merger {
    /// Merge, then write the outcome to the session record.
    async fn merge_and_record(&self, session_id: SessionId) {
        MERGES_STARTED.inc();
        let start = Instant::now();
        let result = self.merge(session_id).await;
        MERGE_DURATION.observe(start.elapsed().as_secs_f64());
        let now = OffsetDateTime::now_utc();
        let id = *session_id.as_uuid();

        match result {
            Ok(bytes) => match self.metadata.complete_merge(id, now).await {
                Ok(()) => {
                    MERGES_SUCCEEDED.inc();
                    MERGED_BYTES.inc_by(bytes);
                    info!(
                        bytes,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Merge completed"
                    );
                }
                Err(MetadataError::NotFound(_)) => {
                    // Deleted while merging: the artifact we just wrote is orphaned.
                    warn!("Session deleted during merge, removing artifact");
                    self.remove_orphaned_artifact(session_id).await;
                }
                Err(e) => error!(error = %e, "Merge succeeded but recording it failed"),
            },
            Err(UploadError::SessionNotFound(_)) => {
                warn!("Session deleted before merge started");
            }
            Err(e) => {
                MERGES_FAILED.inc();
                error!(error = %e, "Merge failed");
                let reason = match &e {
                    UploadError::MergeFailure { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                if let Err(record_err) = self.metadata.fail_merge(id, &reason, now).await {
                    error!(error = %record_err, "Failed to record merge failure");
                }
            }
        }
    }

    /// The merge algorithm. Idempotent: re-running truncates and rewrites the artifact.
    async fn merge(&self, session_id: SessionId) -> UploadResult<u64> {
        let session = load_session(self.metadata.as_ref(), session_id).await?;
        let fail = |reason: String| UploadError::MergeFailure { session_id, reason };

        let chunks = self
            .metadata
            .list_chunks(*session_id.as_uuid())
            .await
            .map_err(|e| fail(format!("listing chunks: {e}")))?;
        if chunks.len() as u64 != session.total_chunks {
            return Err(fail(format!(
                "expected {} chunk records, found {}",
                session.total_chunks,
                chunks.len()
            )));
        }
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.chunk_index != expected as i64 {
                return Err(fail(format!(
                    "chunk records out of sequence at position {expected}"
                )));
            }
            if !chunk.uploaded {
                return Err(fail(format!("chunk {expected} has not been uploaded")));
            }
        }

        let mut upload = self
            .storage
            .put_stream(&session.artifact_key)
            .await
            .map_err(|e| fail(format!("opening artifact: {e}")))?;

        if let Err(e) = self.copy_chunks(&chunks, upload.as_mut()).await {
            if let Err(abort_err) = upload.abort().await {
                warn!(error = %abort_err, "Failed to discard partial artifact");
            }
            return Err(fail(e));
        }

        let written = upload
            .finish()
            .await
            .map_err(|e| fail(format!("finishing artifact: {e}")))?;

        if written != session.size {
            warn!(
                written,
                declared = session.size,
                "Artifact size differs from declared file size"
            );
        }
        Ok(written)
    }

    /// Stream every chunk, in index order, into the artifact.
    async fn copy_chunks(
        &self,
        chunks: &[ChunkRecordRow],
        upload: &mut dyn StreamingUpload,
    ) -> Result<(), String> {
        for chunk in chunks {
            let index = chunk.chunk_index;
            let mut stream = self
                .storage
                .get_stream(&chunk.storage_key)
                .await
                .map_err(|e| format!("reading chunk {index}: {e}"))?;

            while let Some(mut piece) = stream
                .try_next()
                .await
                .map_err(|e| format!("reading chunk {index}: {e}"))?
            {
                while !piece.is_empty() {
                    let take = piece.len().min(self.buffer_size);
                    upload
                        .write(piece.split_to(take))
                        .await
                        .map_err(|e| format!("writing chunk {index} to artifact: {e}"))?;
                }
            }
        }
        Ok(())
    }

    async fn remove_orphaned_artifact(&self, session_id: SessionId) {
        match self.storage.delete(&session_id.artifact_key()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(error = %e, "Failed to remove orphaned artifact"),
        }
    }
}
