//! Store tests (filesystem only; no network).

use super::*;
use tempfile::tempdir;

#[test]
fn test_artifact_key_layout() {
    let key = artifact_key("ctx-1", "task-9", "svg").unwrap();
    let parts: Vec<&str> = key.split('/').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "ctx-1");
    assert_eq!(parts[1], "task-9");
    let (id, ext) = parts[2].split_once('.').unwrap();
    assert_eq!(ext, "svg");
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert_ne!(key, artifact_key("ctx-1", "task-9", "svg").unwrap());
}

#[test]
fn test_traversal_rejected() {
    assert!(matches!(
        artifact_key("..", "t", "svg"),
        Err(StoreError::InvalidKey { .. })
    ));
    assert!(artifact_key("a/b", "t", "svg").is_err());
    assert!(artifact_key(".hidden", "t", "svg").is_err());
    assert!(validate_key("a/../b.svg").is_err());
    assert!(validate_key("/abs.svg").is_err());
    assert!(validate_key("a/b/c.svg").is_ok());
}

#[tokio::test]
async fn test_fs_store_writes_file_url() {
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let key = artifact_key("ctx", "task", "svg").unwrap();

    let url = store.put(&key, b"<svg/>".to_vec(), "image/svg+xml").await.unwrap();
    assert!(url.starts_with("file://"));
    assert!(url.ends_with(".svg"));
    let written = std::fs::read(dir.path().join(&key)).unwrap();
    assert_eq!(written, b"<svg/>");
}

#[tokio::test]
async fn test_fs_store_public_base_url() {
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path())
        .with_public_base_url("https://cdn.example.com/charts")
        .unwrap();

    let url = store.put("c/t/chart.svg", vec![1, 2, 3], "image/svg+xml").await.unwrap();
    assert_eq!(url, "https://cdn.example.com/charts/c/t/chart.svg");
}

#[tokio::test]
async fn test_reserved_url_characters_stay_in_path() {
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path())
        .with_public_base_url("https://static.example.com/charts/")
        .unwrap();
    let key = artifact_key("ctx:1", "t#2?x", "svg").unwrap();

    let url = store.put(&key, b"<svg/>".to_vec(), "image/svg+xml").await.unwrap();
    let parsed = url::Url::parse(&url).unwrap();
    assert_eq!(parsed.host_str(), Some("static.example.com"));
    assert_eq!(parsed.fragment(), None);
    assert_eq!(parsed.query(), None);
    assert!(url.starts_with("https://static.example.com/charts/ctx:1/t%232%3Fx/"));
    let segments: Vec<&str> = parsed.path_segments().unwrap().collect();
    assert_eq!(segments.len(), 4);
    assert!(dir.path().join(&key).exists());

    let file_url = FsArtifactStore::new(dir.path())
        .put(&key, b"<svg/>".to_vec(), "image/svg+xml")
        .await
        .unwrap();
    let path = url::Url::parse(&file_url).unwrap().to_file_path().unwrap();
    assert_eq!(path, dir.path().join(&key));
}

#[tokio::test]
async fn test_fs_store_rejects_bad_key() {
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let err = store.put("../escape.svg", vec![], "image/svg+xml").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidKey { .. }));
    assert!(!dir.path().parent().unwrap().join("escape.svg").exists());
}

#[cfg(feature = "http")]
#[test]
fn test_http_store_urls() {
    let store = HttpArtifactStore::new(HttpStoreConfig::new("https://storage.local/", "charts")).unwrap();
    assert_eq!(
        store.url_for("c/t/x.svg").unwrap().as_str(),
        "https://storage.local/charts/c/t/x.svg"
    );
    assert_eq!(
        store.url_for("ctx:1/t#2/x.svg").unwrap().as_str(),
        "https://storage.local/charts/ctx:1/t%232/x.svg"
    );
    assert!(HttpArtifactStore::new(HttpStoreConfig::new("ftp://storage.local", "charts")).is_err());
    assert!(HttpArtifactStore::new(HttpStoreConfig::new("https://storage.local", "")).is_err());
}
