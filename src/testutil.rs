//! Shared test helpers for the HTTP handlers.

use std::sync::Arc;

use crate::config::{Config, ServerConfig, StorageConfig};
use crate::object_store::LocalStore;
use crate::uploaded_file::StorageKey;
use crate::{AppState, Storages, Uploader};

/// Create a test AppState with cache and store directories under `temp_dir`.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    test_state_with_limit(temp_dir, 1024) // 1KB for tests
}

pub fn test_state_with_limit(temp_dir: &tempfile::TempDir, max_upload_size: u64) -> Arc<AppState> {
    let mut cache_config = StorageConfig::local("cache");
    cache_config.local_path = temp_dir.path().join("cache").to_string_lossy().to_string();
    let mut store_config = StorageConfig::local("store");
    store_config.local_path = temp_dir.path().join("store").to_string_lossy().to_string();

    let config = Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
        },
        cache: cache_config,
        store: store_config,
        max_upload_size,
    };

    let cache = LocalStore::with_url_prefix(&config.cache.local_path, &config.cache.url_prefix)
        .expect("Failed to create test cache store");
    let store = LocalStore::with_url_prefix(&config.store.local_path, &config.store.url_prefix)
        .expect("Failed to create test store");

    let storages = Storages::new()
        .register(StorageKey::Cache, Arc::new(cache))
        .register(StorageKey::Store, Arc::new(store));
    let cache_uploader =
        Uploader::for_storage(&storages, StorageKey::Cache).expect("cache storage registered");

    Arc::new(AppState {
        config,
        storages,
        cache: cache_uploader,
    })
}
