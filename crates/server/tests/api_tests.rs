//! Integration tests for HTTP API endpoints.

mod common;

use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use common::{TestServer, test_file_data};
use serde_json::json;

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::new().await;
    let (status, body) = server.json("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_follows_config() {
    let server = TestServer::new().await;
    let (status, _, _) = server.get_bytes("/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let server = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    let (status, _, _) = server.get_bytes("/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_file_returns_chunk_layout() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({
                "filename": "video.mp4",
                "content_type": "video/mp4",
                "file_size": 3_000_000,
                "chunk_size": 1_048_576,
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_chunks"], 3);
    assert_eq!(body["chunk_size"], 1_048_576);
    assert!(body["file_id"].as_str().is_some());
}

#[tokio::test]
async fn create_file_validates_input() {
    let server = TestServer::new().await;

    let (status, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "a", "file_size": -1})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_size");

    let (status, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "a", "file_size": 10, "chunk_size": 0})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_size");

    let (status, body) = server
        .json("POST", "/api/files", Some(json!({"file_size": 10})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "a", "content_type": "text/plain\r\nX-A: 1", "file_size": 10})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    let (_, body) = server.json("GET", "/api/files", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn upload_merge_and_download_end_to_end() {
    let server = TestServer::new().await;
    let data = test_file_data(10_000);
    let file_id = server.upload_file("report.pdf", &data, 4096).await;

    let file = server.wait_for_merge(&file_id).await;
    assert_eq!(file["merge_state"], "merged");
    assert_eq!(file["ready"], true);
    assert_eq!(file["completed"], true);
    assert_eq!(file["uploaded_chunks"], 3);
    assert_eq!(file["filename"], "report.pdf");

    let (status, headers, body) = server
        .get_bytes(&format!("/api/files/{file_id}/download"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);
    assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
    assert_eq!(
        headers[CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
}

#[tokio::test]
async fn chunk_upload_reports_progress() {
    let server = TestServer::new().await;
    let (_, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "p.bin", "file_size": 20, "chunk_size": 10})),
        )
        .await;
    let file_id = body["file_id"].as_str().unwrap().to_string();

    let (status, body) = server.put_chunk(&file_id, 1, &[1; 10]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunk_index"], 1);
    assert_eq!(body["uploaded"], true);
    assert_eq!(body["uploaded_chunks"], 1);
    assert_eq!(body["total_chunks"], 2);
    assert_eq!(body["completed"], false);

    let (_, body) = server.put_chunk(&file_id, 0, &[0; 10]).await;
    assert_eq!(body["completed"], true);

    let (status, body) = server.put_chunk(&file_id, 0, &[9; 10]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "session_completed");
}

#[tokio::test]
async fn chunk_upload_errors() {
    let server = TestServer::with_config(|c| c.upload.max_chunk_size = 1024).await;
    let (_, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "e.bin", "file_size": 2000, "chunk_size": 1000})),
        )
        .await;
    let file_id = body["file_id"].as_str().unwrap().to_string();

    let (status, body) = server.put_chunk(&file_id, 2, &[0; 10]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "chunk_index_out_of_range");

    let (status, body) = server.put_chunk(&file_id, 0, &[0; 1001]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_size");

    let (status, body) = server.put_chunk(&file_id, 0, &[0; 1500]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_size");

    let missing = uuid_like();
    let (status, body) = server.put_chunk(&missing, 0, &[0; 10]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "session_not_found");

    let (status, body) = server.put_chunk("not-a-uuid", 0, &[0; 10]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn download_before_merge_is_conflict() {
    let server = TestServer::new().await;
    let (_, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "n.bin", "file_size": 20, "chunk_size": 10})),
        )
        .await;
    let file_id = body["file_id"].as_str().unwrap().to_string();

    let (status, _, body) = server
        .get_bytes(&format!("/api/files/{file_id}/download"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "not_ready");

    let (status, _, _) = server
        .get_bytes(&format!("/api/files/{file_id}/chunks/0"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn download_chunk_windows() {
    let server = TestServer::new().await;
    let data = test_file_data(2500);
    let file_id = server.upload_file("w.bin", &data, 1000).await;
    server.wait_for_merge(&file_id).await;

    // Defaults to the session chunk size.
    let (status, _, body) = server
        .get_bytes(&format!("/api/files/{file_id}/chunks/2"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, &data[2000..]);

    let (status, _, body) = server
        .get_bytes(&format!("/api/files/{file_id}/chunks/1?chunk_size=300"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, &data[300..600]);

    let (status, _, body) = server
        .get_bytes(&format!("/api/files/{file_id}/chunks/9"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (status, _, body) = server
        .get_bytes(&format!("/api/files/{file_id}/chunks/0?chunk_size=0"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (status, _, body) = server
        .get_bytes(&format!("/api/files/{file_id}/chunks/0?chunk_size=2500"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);
}

#[tokio::test]
async fn list_files_in_creation_order() {
    let server = TestServer::new().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let (_, body) = server
            .json(
                "POST",
                "/api/files",
                Some(json!({"filename": name, "file_size": 5})),
            )
            .await;
        ids.push(body["file_id"].as_str().unwrap().to_string());
    }

    let (status, body) = server.json("GET", "/api/files", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["file_id"].as_str().unwrap())
        .collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn delete_file_then_not_found() {
    let server = TestServer::new().await;
    let data = test_file_data(100);
    let file_id = server.upload_file("d.bin", &data, 64).await;
    server.wait_for_merge(&file_id).await;

    let (status, body) = server
        .json("DELETE", &format!("/api/files/{file_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["cleanup_failures"], json!([]));

    let (status, body) = server
        .json("GET", &format!("/api/files/{file_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "session_not_found");

    let (status, _) = server
        .json("DELETE", &format!("/api/files/{file_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_merge_requires_failed_merge() {
    let server = TestServer::new().await;
    let data = test_file_data(50);
    let file_id = server.upload_file("m.bin", &data, 25).await;
    server.wait_for_merge(&file_id).await;

    let (status, body) = server
        .json("POST", &format!("/api/files/{file_id}/merge"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "not_retryable");
}

#[tokio::test]
async fn empty_file_is_immediately_downloadable() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json(
            "POST",
            "/api/files",
            Some(json!({"filename": "empty.txt", "content_type": "text/plain", "file_size": 0})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_chunks"], 0);
    let file_id = body["file_id"].as_str().unwrap().to_string();

    let file = server.wait_for_merge(&file_id).await;
    assert_eq!(file["ready"], true);

    let (status, headers, body) = server
        .get_bytes(&format!("/api/files/{file_id}/download"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(headers[CONTENT_TYPE], "text/plain");
}

fn uuid_like() -> String {
    stitch_core::SessionId::new().to_string()
}
