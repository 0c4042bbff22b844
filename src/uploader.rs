use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{AttachError, AttachResult};
use crate::io::FileLike;
use crate::object_store::ObjectStore;
use crate::storages::Storages;
use crate::uploaded_file::{FileData, FileMetadata, StorageKey, UploadedFile};
use crate::versions::VersionSet;

const GENERIC_MIME_TYPE: &str = "application/octet-stream";

/// Chooses the id ("location") a new upload is stored under.
pub trait LocationGenerator: Send + Sync {
    fn generate(&self, io: &dyn FileLike, context: &Context) -> String;
}

impl<F> LocationGenerator for F
where
    F: Fn(&dyn FileLike, &Context) -> String + Send + Sync,
{
    fn generate(&self, io: &dyn FileLike, context: &Context) -> String {
        self(io, context)
    }
}

/// Random hex token, then `-<version>` when versioned, then the original extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomLocation;

impl LocationGenerator for RandomLocation {
    fn generate(&self, io: &dyn FileLike, context: &Context) -> String {
        let mut location = uuid::Uuid::new_v4().simple().to_string();
        if let Some(version) = context.version() {
            location.push('-');
            location.push_str(version);
        }
        let extension = io
            .original_filename()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str());
        if let Some(ext) = extension {
            location.push('.');
            location.push_str(ext);
        }
        location
    }
}

/// Writes file-like inputs into one storage and describes the result as an `UploadedFile`.
#[derive(Clone)]
pub struct Uploader {
    storage_key: StorageKey,
    storage: Arc<dyn ObjectStore>,
    location: Arc<dyn LocationGenerator>,
}

impl Uploader {
    pub fn new(storage_key: StorageKey, storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage_key,
            storage,
            location: Arc::new(RandomLocation),
        }
    }

    /// Uploader for a registered storage.
    pub fn for_storage(storages: &Storages, key: StorageKey) -> AttachResult<Self> {
        let storage = storages.get(&key)?;
        Ok(Self::new(key, storage))
    }

    pub fn with_location(mut self, location: Arc<dyn LocationGenerator>) -> Self {
        self.location = location;
        self
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub async fn upload(&self, io: &dyn FileLike, context: &Context) -> AttachResult<UploadedFile> {
        let mut metadata = extract_metadata(io);
        let id = self.location.generate(io, context);

        let data = io.read().await?;
        if metadata.size.is_none() {
            metadata.size = Some(data.len() as u64);
        }

        self.storage
            .put(&id, data, &metadata)
            .await
            .map_err(AttachError::Upload)?;

        tracing::debug!(
            storage = %self.storage_key,
            id = %id,
            version = context.version().unwrap_or(""),
            size = metadata.size,
            "Uploaded file"
        );

        let data = FileData::new(id, self.storage_key.clone(), metadata);
        Ok(UploadedFile::new(data, Arc::clone(&self.storage)))
    }

    /// Upload every entry, folding the version name into the context.
    ///
    /// Stops at the first failure; entries already written are left for the caller.
    pub async fn upload_versions(
        &self,
        files: &BTreeMap<String, &dyn FileLike>,
        context: &Context,
    ) -> AttachResult<VersionSet> {
        let mut versions = VersionSet::new();
        for (name, io) in files {
            let file = self.upload(*io, &context.with_version(name.as_str())).await?;
            versions.insert(name.clone(), file);
        }
        Ok(versions)
    }

    pub fn is_uploaded(&self, file: &UploadedFile) -> bool {
        file.storage_key() == &self.storage_key
    }

    /// True for a non-empty version mapping whose entries all live in this storage.
    pub fn is_uploaded_versions(&self, versions: &VersionSet) -> bool {
        !versions.is_empty() && versions.values().all(|file| self.is_uploaded(file))
    }

    /// Structural check on serialized state: a single file or a version mapping in this storage.
    pub fn is_uploaded_json(&self, json: &str) -> bool {
        let Ok(serde_json::Value::Object(object)) = serde_json::from_str(json) else {
            return false;
        };
        let in_storage = |value: serde_json::Value| {
            FileData::from_value(value).is_ok_and(|data| data.storage == self.storage_key)
        };

        if object.contains_key("id") {
            in_storage(serde_json::Value::Object(object))
        } else {
            !object.is_empty() && object.into_iter().all(|(_, value)| in_storage(value))
        }
    }
}

fn extract_metadata(io: &dyn FileLike) -> FileMetadata {
    let filename = io.original_filename().map(str::to_string);
    let mime_type = io
        .content_type()
        .filter(|ct| !ct.is_empty() && *ct != GENERIC_MIME_TYPE)
        .map(str::to_string)
        .or_else(|| {
            filename
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first())
                .map(|mime| mime.to_string())
        });

    FileMetadata {
        filename,
        size: io.size(),
        mime_type,
    }
}
