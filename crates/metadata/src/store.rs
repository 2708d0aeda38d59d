//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + ChunkRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// The pool holds a single connection, so every transaction below runs
/// serialized. That serialization is what makes the completion check in
/// [`UploadRepo::record_chunk_upload`] an atomic check-and-set.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store. `:memory:` opens an ephemeral database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == ":memory:";
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        if !in_memory && let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_opts = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(query_timeout);
        if in_memory {
            // Closing the only connection would drop the database.
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = store.query_timeout.as_secs(),
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Tell a missing session apart from one in the wrong state after a
    /// guarded UPDATE matched nothing.
    async fn explain_noop(
        store: &SqliteStore,
        session_id: Uuid,
        to: &str,
    ) -> MetadataResult<MetadataError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT merge_state FROM upload_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&store.pool)
                .await?;
        Ok(match state {
            None => MetadataError::NotFound(format!("upload session {session_id}")),
            Some(from) => MetadataError::InvalidStateTransition {
                from,
                to: to.to_string(),
            },
        })
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session(
            &self,
            session: &UploadSessionRow,
            chunks: &[ChunkRecordRow],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    session_id, original_name, content_type, size_bytes, chunk_size,
                    total_chunks, uploaded_chunks, completed, merge_state, merge_error,
                    artifact_key, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.session_id)
            .bind(&session.original_name)
            .bind(&session.content_type)
            .bind(session.size_bytes)
            .bind(session.chunk_size)
            .bind(session.total_chunks)
            .bind(session.uploaded_chunks)
            .bind(session.completed)
            .bind(&session.merge_state)
            .bind(&session.merge_error)
            .bind(&session.artifact_key)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&mut *tx)
            .await;

            if let Err(sqlx::Error::Database(db_err)) = &result
                && db_err.is_unique_violation()
            {
                return Err(MetadataError::AlreadyExists(format!(
                    "upload session {}",
                    session.session_id
                )));
            }
            result?;

            for chunk in chunks {
                if chunk.session_id != session.session_id {
                    return Err(MetadataError::Constraint(format!(
                        "chunk {} belongs to session {}, not {}",
                        chunk.chunk_index, chunk.session_id, session.session_id
                    )));
                }
                sqlx::query(
                    r#"
                    INSERT INTO chunk_records (
                        session_id, chunk_index, storage_key, size_bytes, uploaded, uploaded_at
                    ) VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(chunk.session_id)
                .bind(chunk.chunk_index)
                .bind(&chunk.storage_key)
                .bind(chunk.size_bytes)
                .bind(chunk.uploaded)
                .bind(chunk.uploaded_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn get_session(&self, session_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_sessions(&self) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows =
                sqlx::query_as::<_, UploadSessionRow>("SELECT * FROM upload_sessions ORDER BY seq")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }

        async fn list_sessions_by_merge_state(
            &self,
            merge_state: &str,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE merge_state = ? ORDER BY seq",
            )
            .bind(merge_state)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn record_chunk_upload(
            &self,
            session_id: Uuid,
            chunk_index: i64,
            storage_key: &str,
            size_bytes: i64,
            uploaded_at: OffsetDateTime,
        ) -> MetadataResult<ChunkProgress> {
            let mut tx = self.pool.begin().await?;

            let session: Option<(i64, bool)> = sqlx::query_as(
                "SELECT total_chunks, completed FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some((total_chunks, completed)) = session else {
                return Err(MetadataError::NotFound(format!(
                    "upload session {session_id}"
                )));
            };
            if completed {
                return Err(MetadataError::InvalidStateTransition {
                    from: "completed".to_string(),
                    to: "uploading".to_string(),
                });
            }

            let previous: Option<(String, bool)> = sqlx::query_as(
                "SELECT storage_key, uploaded FROM chunk_records WHERE session_id = ? AND chunk_index = ?",
            )
            .bind(session_id)
            .bind(chunk_index)
            .fetch_optional(&mut *tx)
            .await?;
            let Some((previous_key, was_uploaded)) = previous else {
                return Err(MetadataError::NotFound(format!(
                    "chunk {chunk_index} of upload session {session_id}"
                )));
            };

            sqlx::query(
                r#"
                UPDATE chunk_records
                SET uploaded = 1, storage_key = ?, size_bytes = ?, uploaded_at = ?
                WHERE session_id = ? AND chunk_index = ?
                "#,
            )
            .bind(storage_key)
            .bind(size_bytes)
            .bind(uploaded_at)
            .bind(session_id)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await?;

            let uploaded_chunks: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM chunk_records WHERE session_id = ? AND uploaded = 1",
            )
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE upload_sessions SET uploaded_chunks = ?, updated_at = ? WHERE session_id = ?",
            )
            .bind(uploaded_chunks)
            .bind(uploaded_at)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

            // Completion check-and-set: only one caller can move completed 0 -> 1.
            let claimed = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET completed = 1, merge_state = 'merging', merge_error = NULL, updated_at = ?
                WHERE session_id = ? AND completed = 0 AND uploaded_chunks = total_chunks
                "#,
            )
            .bind(uploaded_at)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            let merge_claimed = claimed.rows_affected() > 0;
            Ok(ChunkProgress {
                uploaded_chunks,
                total_chunks,
                completed: merge_claimed,
                merge_claimed,
                replaced_key: (was_uploaded && previous_key != storage_key).then_some(previous_key),
            })
        }

        async fn claim_merge_retry(
            &self,
            session_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET completed = 1, merge_state = 'merging', merge_error = NULL, updated_at = ?
                WHERE session_id = ? AND merge_state = 'failed' AND uploaded_chunks = total_chunks
                "#,
            )
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn complete_merge(
            &self,
            session_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET merge_state = 'merged', merge_error = NULL, updated_at = ?
                WHERE session_id = ? AND merge_state = 'merging'
                "#,
            )
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(explain_noop(self, session_id, "merged").await?);
            }
            Ok(())
        }

        async fn fail_merge(
            &self,
            session_id: Uuid,
            error: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET merge_state = 'failed', merge_error = ?, completed = 0, updated_at = ?
                WHERE session_id = ? AND merge_state = 'merging'
                "#,
            )
            .bind(error)
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(explain_noop(self, session_id, "failed").await?);
            }
            Ok(())
        }

        async fn delete_session(&self, session_id: Uuid) -> MetadataResult<Vec<ChunkRecordRow>> {
            let mut tx = self.pool.begin().await?;

            let chunks = sqlx::query_as::<_, ChunkRecordRow>(
                "SELECT * FROM chunk_records WHERE session_id = ? ORDER BY chunk_index",
            )
            .bind(session_id)
            .fetch_all(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM chunk_records WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;

            let result = sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "upload session {session_id}"
                )));
            }

            tx.commit().await?;
            Ok(chunks)
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn get_chunk(
            &self,
            session_id: Uuid,
            chunk_index: i64,
        ) -> MetadataResult<Option<ChunkRecordRow>> {
            let row = sqlx::query_as::<_, ChunkRecordRow>(
                "SELECT * FROM chunk_records WHERE session_id = ? AND chunk_index = ?",
            )
            .bind(session_id)
            .bind(chunk_index)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_chunks(&self, session_id: Uuid) -> MetadataResult<Vec<ChunkRecordRow>> {
            let rows = sqlx::query_as::<_, ChunkRecordRow>(
                "SELECT * FROM chunk_records WHERE session_id = ? ORDER BY chunk_index",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_uploaded_chunks(&self, session_id: Uuid) -> MetadataResult<i64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM chunk_records WHERE session_id = ? AND uploaded = 1",
            )
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(count)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions; seq preserves creation order for listings
CREATE TABLE IF NOT EXISTS upload_sessions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id BLOB NOT NULL UNIQUE,
    original_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    chunk_size INTEGER NOT NULL CHECK (chunk_size > 0),
    total_chunks INTEGER NOT NULL CHECK (total_chunks >= 0),
    uploaded_chunks INTEGER NOT NULL DEFAULT 0
        CHECK (uploaded_chunks >= 0 AND uploaded_chunks <= total_chunks),
    completed INTEGER NOT NULL DEFAULT 0,
    merge_state TEXT NOT NULL DEFAULT 'pending'
        CHECK (merge_state IN ('pending', 'merging', 'merged', 'failed')),
    merge_error TEXT,
    artifact_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_upload_sessions_merge_state
    ON upload_sessions(merge_state);

-- One row per (session, index), pre-allocated at session creation
CREATE TABLE IF NOT EXISTS chunk_records (
    session_id BLOB NOT NULL REFERENCES upload_sessions(session_id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL CHECK (chunk_index >= 0),
    storage_key TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0 CHECK (size_bytes >= 0),
    uploaded INTEGER NOT NULL DEFAULT 0,
    uploaded_at TEXT,
    PRIMARY KEY (session_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunk_records_uploaded
    ON chunk_records(session_id, uploaded);
"#;
