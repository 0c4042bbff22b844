mod common;

use std::sync::Arc;

use file_attacher::object_store::{MemoryStore, UrlOptions};
use file_attacher::{
    AttachError, Attacher, AttachmentConfig, ByteFile, Context, FileData, MemoryRecord, Record,
    StorageKey, Storages, UploadedFile,
};
use serde_json::json;

fn avatar_config(storages: Storages) -> Arc<AttachmentConfig> {
    AttachmentConfig::builder("avatar", storages).build().unwrap()
}

fn image(name: &str) -> ByteFile {
    ByteFile::new(format!("contents of {name}")).with_filename(name)
}

#[tokio::test]
async fn test_set_from_upload_caches_and_writes_column() {
    let (storages, cache, store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");

    let mut attacher = Attacher::new(config, &mut record).unwrap();
    let file = attacher
        .set_from_upload(&image("me.jpg"))
        .await
        .unwrap()
        .clone();

    assert!(attacher.is_cached());
    assert!(!attacher.is_stored());
    assert_eq!(file.mime_type(), Some("image/jpeg"));
    assert_eq!(cache.len().await, 1);
    assert!(store.is_empty().await);

    let column = record.read_attribute("avatar_data").unwrap();
    assert_eq!(FileData::from_json(&column).unwrap(), *file.data());
}

#[tokio::test]
async fn test_attacher_loads_existing_column() {
    let (storages, _cache, _store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    record.write_attribute(
        "avatar_data",
        Some(r#"{"id":"abc.jpg","storage":"store","metadata":{"size":3}}"#.to_string()),
    );

    let attacher = Attacher::new(config.clone(), &mut record).unwrap();
    let file = attacher.get().unwrap();
    assert_eq!(file.id(), "abc.jpg");
    assert_eq!(file.size(), Some(3));
    assert!(attacher.is_stored());

    let mut broken = MemoryRecord::new("2");
    broken.write_attribute("avatar_data", Some("{oops".to_string()));
    assert!(matches!(
        Attacher::new(config, &mut broken),
        Err(AttachError::Parse(_))
    ));
}

#[tokio::test]
async fn test_replace_deletes_previous_file() {
    let (storages, cache, _store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let first = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    let second = attacher.set_from_upload(&image("b.jpg")).await.unwrap().clone();
    assert_eq!(attacher.pending_replace(), Some(&first));

    attacher.replace().await.unwrap();

    assert!(!first.exists().await.unwrap());
    assert!(second.exists().await.unwrap());
    assert_eq!(cache.len().await, 1);
    assert_eq!(attacher.pending_replace(), None);
}

#[tokio::test]
async fn test_replace_skips_reattached_file() {
    let (storages, _cache, _store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let first = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    attacher
        .set_from_trusted_state(Some(&first.to_json().unwrap()))
        .unwrap();
    attacher.replace().await.unwrap();

    assert!(first.exists().await.unwrap());
}

#[tokio::test]
async fn test_only_latest_previous_value_is_replaced() {
    let (storages, _cache, _store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let a = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    let b = attacher.set_from_upload(&image("b.jpg")).await.unwrap().clone();
    attacher.clear().unwrap();
    assert_eq!(attacher.pending_replace(), Some(&b));

    attacher.replace().await.unwrap();
    assert!(a.exists().await.unwrap());
    assert!(!b.exists().await.unwrap());
}

#[tokio::test]
async fn test_failed_replace_stays_pending() {
    let flaky = Arc::new(common::FlakyStore::new());
    let storages = Storages::new()
        .register(StorageKey::Cache, flaky.clone())
        .register(StorageKey::Store, Arc::new(MemoryStore::new()));
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let first = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    attacher.set_from_upload(&image("b.jpg")).await.unwrap();

    flaky.fail_deletes_containing(first.id());
    assert!(matches!(
        attacher.replace().await,
        Err(AttachError::Storage(_))
    ));
    assert_eq!(attacher.pending_replace(), Some(&first));

    flaky.heal_deletes();
    attacher.replace().await.unwrap();
    assert!(!first.exists().await.unwrap());
}

#[tokio::test]
async fn test_rejected_upload_is_removed() {
    let (storages, cache, _store) = common::memory_storages();
    let config = AttachmentConfig::builder("avatar", storages)
        .validator(|file: &UploadedFile, _context: &Context| {
            if file.size().unwrap_or(0) > 4 {
                vec!["is too large (max is 4 bytes)".to_string()]
            } else {
                Vec::new()
            }
        })
        .build()
        .unwrap();
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let err = attacher
        .set_from_upload(&ByteFile::new("too many bytes"))
        .await
        .unwrap_err();
    assert_eq!(
        err.validation_errors(),
        ["is too large (max is 4 bytes)".to_string()]
    );
    assert!(attacher.get().is_none());
    assert!(cache.is_empty().await);

    attacher.set_from_upload(&ByteFile::new("ok")).await.unwrap();
    assert!(attacher.is_cached());
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_trusted_state_validation_depends_on_storage() {
    let (storages, _cache, _store) = common::memory_storages();
    let config = AttachmentConfig::builder("avatar", storages)
        .validator(|_file: &UploadedFile, _context: &Context| vec!["never valid".to_string()])
        .build()
        .unwrap();

    let context = Context::new("avatar");
    let stored = config
        .store()
        .upload(&ByteFile::new("x"), &context)
        .await
        .unwrap();
    let cached = config
        .cache()
        .upload(&ByteFile::new("x"), &context)
        .await
        .unwrap();

    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    attacher
        .set_from_trusted_state(Some(&stored.to_json().unwrap()))
        .unwrap();
    assert!(attacher.is_stored());

    let result = attacher.set_from_trusted_state(Some(&cached.to_json().unwrap()));
    assert!(matches!(result, Err(AttachError::Validation(_))));
    assert_eq!(attacher.get(), Some(&stored));

    attacher.set_from_trusted_state(None).unwrap();
    assert!(attacher.get().is_none());
    assert!(attacher.record().read_attribute("avatar_data").is_none());
}

#[tokio::test]
async fn test_url_and_default_url() {
    let (storages, _cache, _store) = common::memory_storages();
    let config = AttachmentConfig::builder("avatar", storages)
        .default_url(|context: &Context, options: &UrlOptions| {
            let size = options.get("size").and_then(|s| s.as_str()).unwrap_or("full");
            Some(format!(
                "/defaults/{}-{}-{}.png",
                context.name(),
                context.record().unwrap_or("new"),
                size
            ))
        })
        .build()
        .unwrap();
    let mut record = MemoryRecord::new("7");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    assert_eq!(
        attacher.url(&UrlOptions::new()).as_deref(),
        Some("/defaults/avatar-7-full.png")
    );
    let mut options = UrlOptions::new();
    options.insert("size".into(), json!("small"));
    assert_eq!(
        attacher.url(&options).as_deref(),
        Some("/defaults/avatar-7-small.png")
    );

    let file = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    assert_eq!(
        attacher.url(&options),
        Some(format!("memory://{}", file.id()))
    );
}

#[tokio::test]
async fn test_url_without_default_is_none() {
    let (storages, _cache, _store) = common::memory_storages();
    let mut record = MemoryRecord::unsaved();
    let attacher = Attacher::new(avatar_config(storages), &mut record).unwrap();

    assert_eq!(attacher.url(&UrlOptions::new()), None);
    assert_eq!(attacher.context().to_map()["record"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_promote_copies_into_store() {
    let (storages, cache, store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let cached = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    let stored = attacher.promote(&cached).await.unwrap();

    assert_eq!(stored.storage_key(), &StorageKey::Store);
    assert_ne!(stored.id(), cached.id());
    assert_eq!(stored.original_filename(), Some("a.jpg"));
    assert_eq!(stored.read().await.unwrap(), cached.read().await.unwrap());
    assert_eq!(store.len().await, 1);
    assert_eq!(cache.len().await, 1);
    // Promotion alone doesn't reassign
    assert_eq!(attacher.get(), Some(&cached));
}

#[tokio::test]
async fn test_finalize_promotes_and_replaces() {
    let (storages, _cache, store) = common::memory_storages();
    let config = avatar_config(storages);

    let old = config
        .store()
        .upload(&image("old.jpg"), &Context::new("avatar"))
        .await
        .unwrap();
    let mut record = MemoryRecord::new("1");
    record.write_attribute("avatar_data", Some(old.to_json().unwrap()));

    let mut attacher = Attacher::new(config, &mut record).unwrap();
    attacher.set_from_upload(&image("new.jpg")).await.unwrap();
    attacher.finalize().await.unwrap();

    assert!(attacher.is_stored());
    assert!(!old.exists().await.unwrap());
    assert_eq!(store.len().await, 1);

    let stored = attacher.get().unwrap().clone();
    assert_eq!(stored.original_filename(), Some("new.jpg"));
    let column = record.read_attribute("avatar_data").unwrap();
    assert_eq!(FileData::from_json(&column).unwrap(), *stored.data());
}

#[tokio::test]
async fn test_swap_discards_stale_promotion() {
    let (storages, _cache, store) = common::memory_storages();
    let config = avatar_config(storages);
    let mut record = MemoryRecord::new("1");
    let mut attacher = Attacher::new(config, &mut record).unwrap();

    let first = attacher.set_from_upload(&image("a.jpg")).await.unwrap().clone();
    let promoted = attacher.promote(&first).await.unwrap();
    let second = attacher.set_from_upload(&image("b.jpg")).await.unwrap().clone();

    let swapped = attacher.swap(&first, promoted.clone()).await.unwrap();

    assert!(!swapped);
    assert_eq!(attacher.get(), Some(&second));
    assert!(!promoted.exists().await.unwrap());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_destroy_deletes_attached_file() {
    let (storages, _cache, store) = common::memory_storages();
    let config = avatar_config(storages);
    let stored = config
        .store()
        .upload(&image("a.jpg"), &Context::new("avatar"))
        .await
        .unwrap();

    let mut record = MemoryRecord::new("1");
    record.write_attribute("avatar_data", Some(stored.to_json().unwrap()));
    let attacher = Attacher::new(config.clone(), &mut record).unwrap();
    attacher.destroy().await.unwrap();
    assert!(store.is_empty().await);

    let mut empty = MemoryRecord::new("2");
    Attacher::new(config, &mut empty)
        .unwrap()
        .destroy()
        .await
        .unwrap();
}

#[test]
fn test_invalid_configuration() {
    let (storages, _cache, _store) = common::memory_storages();

    let same = AttachmentConfig::builder("avatar", storages.clone())
        .store_key(StorageKey::Cache)
        .build();
    assert!(matches!(same, Err(AttachError::Configuration(_))));

    let missing = AttachmentConfig::builder("avatar", storages.clone())
        .store_key(StorageKey::from("backup"))
        .build();
    assert!(matches!(missing, Err(AttachError::Configuration(_))));

    let unnamed = AttachmentConfig::builder(" ", storages.clone()).build();
    assert!(matches!(unnamed, Err(AttachError::Configuration(_))));

    let orphan_validator = AttachmentConfig::builder("avatar", storages)
        .version_validator(|_file: &UploadedFile, _context: &Context| Vec::new())
        .build();
    assert!(matches!(
        orphan_validator,
        Err(AttachError::Configuration(_))
    ));
}
