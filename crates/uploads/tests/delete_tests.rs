//! Session deletion and best-effort object cleanup.

mod common;

use bytes::Bytes;
use common::{TestUploads, seeded_bytes};
use stitch_core::{SessionId, chunk_object_key};
use stitch_storage::ObjectStore;
use stitch_uploads::UploadError;

#[tokio::test]
async fn delete_removes_session_chunks_and_artifact() {
    let t = TestUploads::new().await;
    let data = seeded_bytes(31, 100);
    let id = t.upload_all("d.bin", &data, 40).await;
    let session = t.wait_for_merge(id).await;
    let chunks = t.service.tracker().list_chunks(id).await.unwrap();
    assert_eq!(t.chunk_files(id).len(), 3);

    let report = t.service.delete_file(id).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.objects_removed, 4);

    for chunk in &chunks {
        assert!(!t.store.exists(&chunk.storage_key).await.unwrap());
    }
    assert!(t.chunk_files(id).is_empty());
    assert!(!t.store.exists(&session.artifact_key).await.unwrap());
    assert!(matches!(
        t.service.get_file_metadata(id).await,
        Err(UploadError::SessionNotFound(_))
    ));
    assert!(t.service.list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_partial_upload_ignores_missing_objects() {
    let t = TestUploads::new().await;
    let session = t
        .service
        .initialize_upload("p.bin", "b", 30, Some(10))
        .await
        .unwrap();
    t.service
        .upload_chunk(session.id, 1, Bytes::from(vec![1; 10]))
        .await
        .unwrap();

    let report = t.service.delete_file(session.id).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.objects_removed, 1);
    assert!(matches!(
        t.service.get_file_metadata(session.id).await,
        Err(UploadError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn delete_reports_cleanup_failures_and_still_removes_session() {
    let t = TestUploads::new().await;
    let data = seeded_bytes(32, 50);
    let id = t.upload_all("f.bin", &data, 25).await;
    let session = t.wait_for_merge(id).await;

    t.store.fail_deletes_under(Some("chunks/"));
    let report = t.service.delete_file(id).await.unwrap();
    t.store.fail_deletes_under(None);

    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.key.starts_with("chunks/")));
    assert_eq!(report.objects_removed, 1);
    assert!(!t.store.exists(&session.artifact_key).await.unwrap());
    assert!(matches!(
        t.service.get_file_metadata(id).await,
        Err(UploadError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn chunk_write_racing_delete_leaves_nothing_behind() {
    let t = TestUploads::new().await;
    let session = t
        .service
        .initialize_upload("race.bin", "b", 20, Some(10))
        .await
        .unwrap();
    t.service
        .upload_chunk(session.id, 0, Bytes::from(vec![0; 10]))
        .await
        .unwrap();

    let gate = t.store.gate_puts_under(&chunk_object_key(&session.id, 1));
    let upload = tokio::spawn({
        let service = t.service.clone();
        let id = session.id;
        async move { service.upload_chunk(id, 1, Bytes::from(vec![1; 10])).await }
    });
    gate.arrived().await;

    let report = t.service.delete_file(session.id).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.objects_removed, 1);

    gate.release();
    assert!(matches!(
        upload.await.unwrap(),
        Err(UploadError::SessionNotFound(_))
    ));
    assert!(t.chunk_files(session.id).is_empty());
}

#[tokio::test]
async fn delete_unknown_session_fails() {
    let t = TestUploads::new().await;

    assert!(matches!(
        t.service.delete_file(SessionId::new()).await,
        Err(UploadError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn delete_twice_fails_second_time() {
    let t = TestUploads::new().await;
    let session = t
        .service
        .initialize_upload("x.bin", "b", 10, Some(10))
        .await
        .unwrap();

    t.service.delete_file(session.id).await.unwrap();
    assert!(matches!(
        t.service.delete_file(session.id).await,
        Err(UploadError::SessionNotFound(_))
    ));
    assert!(matches!(
        t.service
            .upload_chunk(session.id, 0, Bytes::from(vec![0; 10]))
            .await,
        Err(UploadError::SessionNotFound(_))
    ));
}
