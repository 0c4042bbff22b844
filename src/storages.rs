use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AttachError, AttachResult};
use crate::object_store::ObjectStore;
use crate::uploaded_file::{FileData, StorageKey, UploadedFile};

/// Registry of the storages files can live in, keyed by `StorageKey`.
///
/// Built once at startup and shared; there is no global registry.
#[derive(Clone, Default)]
pub struct Storages {
    stores: HashMap<StorageKey, Arc<dyn ObjectStore>>,
}

impl Storages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, key: StorageKey, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(key, store);
        self
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.stores.contains_key(key)
    }

    pub fn get(&self, key: &StorageKey) -> AttachResult<Arc<dyn ObjectStore>> {
        self.stores
            .get(key)
            .cloned()
            .ok_or_else(|| AttachError::Configuration(format!("storage {key} isn't registered")))
    }

    /// Resolve serialized file data against its storage.
    pub fn uploaded_file(&self, data: FileData) -> AttachResult<UploadedFile> {
        let storage = self.get(&data.storage)?;
        Ok(UploadedFile::new(data, storage))
    }

    pub fn uploaded_file_from_json(&self, json: &str) -> AttachResult<UploadedFile> {
        self.uploaded_file(FileData::from_json(json)?)
    }
}
