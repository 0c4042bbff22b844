#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use file_attacher::object_store::{MemoryStore, ObjectStore, ObjectStoreError, UrlOptions};
use file_attacher::{FileMetadata, StorageKey, Storages};

/// In-memory cache and store, returned alongside the registry for inspection.
pub fn memory_storages() -> (Storages, Arc<MemoryStore>, Arc<MemoryStore>) {
    let cache = Arc::new(MemoryStore::new());
    let store = Arc::new(MemoryStore::new());
    let storages = Storages::new()
        .register(StorageKey::Cache, cache.clone())
        .register(StorageKey::Store, store.clone());
    (storages, cache, store)
}

/// Memory store whose writes and deletes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_puts: Mutex<Vec<String>>,
    failing_deletes: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes of keys containing `pattern` fail. An empty pattern refuses every write.
    pub fn fail_puts_containing(&self, pattern: &str) {
        self.failing_puts.lock().unwrap().push(pattern.to_string());
    }

    /// Deletes of keys containing `pattern` fail until `heal_deletes`.
    pub fn fail_deletes_containing(&self, pattern: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .push(pattern.to_string());
    }

    pub fn heal_deletes(&self) {
        self.failing_deletes.lock().unwrap().clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: &FileMetadata,
    ) -> Result<(), ObjectStoreError> {
        if matches_any(&self.failing_puts, key) {
            return Err(ObjectStoreError::Backend(format!("write of {key} refused")));
        }
        self.inner.put(key, data, metadata).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        if matches_any(&self.failing_deletes, key) {
            return Err(ObjectStoreError::Backend(format!("delete of {key} refused")));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        self.inner.exists(key).await
    }

    fn url(&self, key: &str, options: &UrlOptions) -> String {
        self.inner.url(key, options)
    }
}

fn matches_any(patterns: &Mutex<Vec<String>>, key: &str) -> bool {
    patterns
        .lock()
        .unwrap()
        .iter()
        .any(|pattern| key.contains(pattern.as_str()))
}
