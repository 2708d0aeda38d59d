//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use stitch_core::config::{AppConfig, StorageConfig};
use stitch_metadata::{MetadataStore, SqliteStore};
use stitch_server::{AppState, create_router};
use stitch_storage::{FilesystemBackend, ObjectStore};
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(":memory:", None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path,
        };
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and return the status and raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    /// Send a request with an optional JSON body and parse the JSON response.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let (status, _, bytes) = self.send(builder.body(body).unwrap()).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// PUT raw chunk bytes.
    pub async fn put_chunk(&self, file_id: &str, index: u64, data: &[u8]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/api/files/{file_id}/chunks/{index}"))
            .header("Content-Type", "application/octet-stream")
            .body(Body::from(data.to_vec()))
            .unwrap();
        let (status, _, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// GET raw bytes.
    pub async fn get_bytes(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Poll file status until the merge settles.
    pub async fn wait_for_merge(&self, file_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (status, body) = self.json("GET", &format!("/api/files/{file_id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            let state = body["merge_state"].as_str().unwrap_or_default();
            if state == "merged" || state == "failed" {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "merge did not settle: {body}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Create a file and upload every chunk in order. Returns the file ID.
    pub async fn upload_file(&self, filename: &str, data: &[u8], chunk_size: u64) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/api/files",
                Some(serde_json::json!({
                    "filename": filename,
                    "content_type": "application/octet-stream",
                    "file_size": data.len(),
                    "chunk_size": chunk_size,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let file_id = body["file_id"].as_str().unwrap().to_string();

        for (index, chunk) in data.chunks(chunk_size as usize).enumerate() {
            let (status, body) = self.put_chunk(&file_id, index as u64, chunk).await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }
        file_id
    }
}
