use bytes::Bytes;
use file_attacher::object_store::{LocalStore, MemoryStore, ObjectStore, ObjectStoreError, UrlOptions};
use file_attacher::FileMetadata;
use serde_json::json;

fn meta() -> FileMetadata {
    FileMetadata::default()
}

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let data = Bytes::from("hello world");
    store.put("test-key", data.clone(), &meta()).await.unwrap();

    let retrieved = store.get("test-key").await.unwrap();
    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn test_local_store_nested_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store
        .put("photos/2024/a.jpg", Bytes::from("jpeg"), &meta())
        .await
        .unwrap();

    assert!(dir.path().join("photos/2024/a.jpg").exists());
    assert_eq!(
        store.get("photos/2024/a.jpg").await.unwrap(),
        Bytes::from("jpeg")
    );
}

#[tokio::test]
async fn test_local_store_exists() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    assert!(!store.exists("missing").await.unwrap());

    store.put("present", Bytes::from("data"), &meta()).await.unwrap();
    assert!(store.exists("present").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store.put("to-delete", Bytes::from("data"), &meta()).await.unwrap();
    assert!(store.exists("to-delete").await.unwrap());

    store.delete("to-delete").await.unwrap();
    assert!(!store.exists("to-delete").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let result = store.delete("nonexistent").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store.put("key", Bytes::from("first"), &meta()).await.unwrap();
    store.put("key", Bytes::from("second"), &meta()).await.unwrap();

    let data = store.get("key").await.unwrap();
    assert_eq!(data, Bytes::from("second"));
}

#[tokio::test]
async fn test_local_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path().join("inner")).unwrap();

    for key in ["", "../outside", "a/../../b", "/etc/passwd"] {
        let result = store.put(key, Bytes::from("x"), &meta()).await;
        assert!(
            matches!(result, Err(ObjectStoreError::InvalidKey(_))),
            "key {key:?} should be rejected"
        );
    }
    assert!(!dir.path().join("outside").exists());
}

#[test]
fn test_local_store_url() {
    let dir = tempfile::tempdir().unwrap();
    let plain = LocalStore::new(dir.path()).unwrap();
    let prefixed = LocalStore::with_url_prefix(dir.path(), "/files/store/").unwrap();

    assert_eq!(plain.url("abc.jpg", &UrlOptions::new()), "/abc.jpg");
    assert_eq!(
        prefixed.url("abc.jpg", &UrlOptions::new()),
        "/files/store/abc.jpg"
    );

    let mut options = UrlOptions::new();
    options.insert("host".into(), json!("https://cdn.example.com/"));
    assert_eq!(
        prefixed.url("abc.jpg", &options),
        "https://cdn.example.com/files/store/abc.jpg"
    );
}

#[tokio::test]
async fn test_memory_store_lifecycle() {
    let store = MemoryStore::new();
    assert!(store.is_empty().await);

    store.put("a", Bytes::from("1"), &meta()).await.unwrap();
    store.put("b", Bytes::from("2"), &meta()).await.unwrap();
    assert_eq!(store.len().await, 2);
    assert!(store.exists("a").await.unwrap());
    assert_eq!(store.get("b").await.unwrap(), Bytes::from("2"));
    assert_eq!(store.url("a", &UrlOptions::new()), "memory://a");

    store.delete("a").await.unwrap();
    assert!(matches!(
        store.delete("a").await,
        Err(ObjectStoreError::NotFound(_))
    ));
    assert!(matches!(
        store.get("a").await,
        Err(ObjectStoreError::NotFound(_))
    ));
    assert_eq!(store.len().await, 1);
}
