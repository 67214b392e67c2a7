//! Local storage tests.

use bytes::Bytes;
use recmux_storage::{FileType, LocalStorage, StorageClient, StorageError, StorageSettings};

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_upload_deletes_local_copy() {
    let bucket = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let local = work.path().join("stream1.mp4");
    std::fs::write(&local, b"recording").unwrap();

    let storage = LocalStorage::new(bucket.path());
    let key = FileType::Stream.key("stream1.mp4");
    assert!(!storage.exists(&key).await.unwrap());

    storage.upload(&key, &local).await.unwrap();

    assert!(storage.exists(&key).await.unwrap());
    assert!(storage.file_exists(FileType::Stream, "stream1.mp4").await.unwrap());
    assert!(!local.exists());
    assert_eq!(storage.get(&key).await.unwrap(), Bytes::from_static(b"recording"));
}

#[tokio::test]
async fn test_upload_keeps_local_copy() {
    let bucket = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let local = work.path().join("keep.mp4");
    std::fs::write(&local, b"data").unwrap();

    let storage = LocalStorage::new(bucket.path()).with_delete_local(false);
    storage.upload("streams/keep.mp4", &local).await.unwrap();

    assert!(local.exists());
    assert!(bucket.path().join("streams/keep.mp4").exists());
}

#[tokio::test]
async fn test_upload_missing_file() {
    let bucket = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(bucket.path());
    let err = storage
        .upload("streams/x.mp4", bucket.path().join("missing.mp4").as_path())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::UploadFailed(_)));
}

// =============================================================================
// Object Tests
// =============================================================================

#[tokio::test]
async fn test_delete() {
    let bucket = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(bucket.path());
    storage.put("previews/a.png", Bytes::from_static(b"png")).await.unwrap();

    storage.delete("previews/a.png").await.unwrap();
    assert!(!storage.exists("previews/a.png").await.unwrap());
    assert!(matches!(
        storage.delete("previews/a.png").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_keys_rejected() {
    let bucket = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(bucket.path());
    assert!(matches!(storage.exists("../outside").await, Err(StorageError::InvalidKey(_))));
    assert!(matches!(storage.get("").await, Err(StorageError::InvalidKey(_))));
}

// =============================================================================
// Settings Tests
// =============================================================================

#[test]
fn test_settings_from_json() {
    let settings: StorageSettings =
        serde_json::from_str(r#"{"endpoint": "http://localhost:9000", "region": "eu-west-1"}"#).unwrap();
    assert_eq!(settings.endpoint.as_deref(), Some("http://localhost:9000"));
    assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
    assert_eq!(settings.permission, "public-read");

    let storage = LocalStorage::new("/tmp").with_settings(settings.clone());
    assert_eq!(storage.settings(), &settings);
}
