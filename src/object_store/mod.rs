mod gcs;
mod local;
mod memory;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};
use crate::uploaded_file::FileMetadata;

/// Arbitrary options forwarded from `url()` callers to the backend.
pub type UrlOptions = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Abstraction over object storage backends.
/// Keys are generated locations; the blobs mean nothing without the serialized file data.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, metadata: &FileMetadata)
        -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Fails with `NotFound` when nothing is stored under `key`.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    fn url(&self, key: &str, options: &UrlOptions) -> String;
}

/// Build the backend described by a storage config section.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, anyhow::Error> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Local => Arc::new(LocalStore::with_url_prefix(
            &config.local_path,
            &config.url_prefix,
        )?),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Gcs => {
            let bucket = config
                .gcs_bucket
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("GCS bucket missing from storage config"))?;
            Arc::new(GcsStore::new(bucket, config.gcs_credentials_file.as_deref()).await?)
        }
    };
    Ok(store)
}
