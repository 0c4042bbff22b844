use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{AttachError, AttachResult};
use crate::object_store::{ObjectStore, ObjectStoreError, UrlOptions};

/// Name of the storage a file lives in.
///
/// Keys compare and hash by name, so `Named("cache")` is the same key as `Cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StorageKey {
    /// Temporary storage for uploads that are not yet committed.
    Cache,
    /// Permanent storage for promoted files.
    Store,
    Named(String),
}

impl StorageKey {
    pub fn as_str(&self) -> &str {
        match self {
            StorageKey::Cache => "cache",
            StorageKey::Store => "store",
            StorageKey::Named(name) => name,
        }
    }

    pub fn is_cache(&self) -> bool {
        self.as_str() == "cache"
    }
}

impl PartialEq for StorageKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StorageKey {}

impl Hash for StorageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<String> for StorageKey {
    fn from(s: String) -> Self {
        match s.as_str() {
            "cache" => StorageKey::Cache,
            "store" => StorageKey::Store,
            _ => StorageKey::Named(s),
        }
    }
}

impl From<&str> for StorageKey {
    fn from(s: &str) -> Self {
        StorageKey::from(s.to_string())
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        match key {
            StorageKey::Named(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic facts about an upload, collected when it is first stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Serialized form of an uploaded file, as persisted in the attachment column.
///
/// Equality and hashing only consider `storage` and `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileData {
    pub id: String,
    pub storage: StorageKey,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl FileData {
    pub fn new(id: impl Into<String>, storage: StorageKey, metadata: FileMetadata) -> Self {
        Self {
            id: id.into(),
            storage,
            metadata,
        }
    }

    /// Parse serialized file data.
    ///
    /// Malformed JSON is a `Parse` error; a missing or non-string `id` or
    /// `storage` is a `Validation` error.
    pub fn from_json(json: &str) -> AttachResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> AttachResult<Self> {
        let serde_json::Value::Object(mut object) = value else {
            return Err(AttachError::Validation(vec![
                "uploaded file data must be a JSON object".to_string(),
            ]));
        };

        let mut errors = Vec::new();
        let id = take_string(&mut object, "id", &mut errors);
        let storage = take_string(&mut object, "storage", &mut errors);
        let (Some(id), Some(storage)) = (id, storage) else {
            return Err(AttachError::Validation(errors));
        };

        let metadata = match object.remove("metadata") {
            None | Some(serde_json::Value::Null) => FileMetadata::default(),
            Some(raw) => serde_json::from_value(raw)?,
        };

        Ok(Self::new(id, StorageKey::from(storage), metadata))
    }

    pub fn to_json(&self) -> AttachResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn take_string(
    object: &mut serde_json::Map<String, serde_json::Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match object.remove(field) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(_) => {
            errors.push(format!("{field} must be a non-empty string"));
            None
        }
        None => {
            errors.push(format!("{field} is missing"));
            None
        }
    }
}

impl PartialEq for FileData {
    fn eq(&self, other: &Self) -> bool {
        self.storage == other.storage && self.id == other.id
    }
}

impl Eq for FileData {}

impl Hash for FileData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.storage.hash(state);
        self.id.hash(state);
    }
}

/// A file that has been written to a storage.
///
/// Immutable: promotion and replacement produce new instances. Reads,
/// deletes and URLs go through the storage the file lives in.
#[derive(Clone)]
pub struct UploadedFile {
    data: FileData,
    storage: Arc<dyn ObjectStore>,
}

impl UploadedFile {
    pub fn new(data: FileData, storage: Arc<dyn ObjectStore>) -> Self {
        Self { data, storage }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.data.storage
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.data.metadata
    }

    pub fn data(&self) -> &FileData {
        &self.data
    }

    pub fn into_data(self) -> FileData {
        self.data
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.data.metadata.filename.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.data.metadata.mime_type.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.data.metadata.size
    }

    /// Extension of the original filename, falling back to the id.
    pub fn extension(&self) -> Option<&str> {
        self.original_filename()
            .and_then(|name| Path::new(name).extension())
            .or_else(|| Path::new(self.id()).extension())
            .and_then(|ext| ext.to_str())
    }

    pub fn is_cached(&self) -> bool {
        self.data.storage.is_cache()
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub async fn read(&self) -> AttachResult<Bytes> {
        Ok(self.storage.get(self.id()).await?)
    }

    pub async fn exists(&self) -> AttachResult<bool> {
        Ok(self.storage.exists(self.id()).await?)
    }

    pub fn url(&self, options: &UrlOptions) -> String {
        self.storage.url(self.id(), options)
    }

    /// Delete the stored object. Deleting an object that is already gone succeeds.
    pub async fn delete(&self) -> AttachResult<()> {
        match self.storage.delete(self.id()).await {
            Ok(()) => {
                tracing::debug!(storage = %self.storage_key(), id = %self.id(), "Deleted file");
                Ok(())
            }
            Err(ObjectStoreError::NotFound(_)) => {
                tracing::debug!(
                    storage = %self.storage_key(),
                    id = %self.id(),
                    "File already absent on delete"
                );
                Ok(())
            }
            Err(e) => Err(AttachError::Storage(e)),
        }
    }

    pub fn to_json(&self) -> AttachResult<String> {
        self.data.to_json()
    }
}

impl PartialEq for UploadedFile {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for UploadedFile {}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("id", &self.data.id)
            .field("storage", &self.data.storage)
            .field("metadata", &self.data.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_round_trip() {
        assert_eq!(StorageKey::from("cache"), StorageKey::Cache);
        assert_eq!(StorageKey::from("store"), StorageKey::Store);
        assert_eq!(
            StorageKey::from("backup"),
            StorageKey::Named("backup".to_string())
        );
        assert_eq!(String::from(StorageKey::Named("backup".into())), "backup");
        assert_eq!(
            serde_json::to_string(&StorageKey::Cache).unwrap(),
            "\"cache\""
        );
    }

    #[test]
    fn test_named_builtin_keys_are_canonical() {
        use std::collections::HashSet;

        let spelled = StorageKey::Named("cache".to_string());
        assert_eq!(spelled, StorageKey::Cache);
        assert!(spelled.is_cache());
        assert_ne!(StorageKey::Named("store".to_string()), StorageKey::Cache);

        let keys: HashSet<StorageKey> = [spelled, StorageKey::Cache].into_iter().collect();
        assert_eq!(keys.len(), 1);

        let data = FileData::new(
            "a",
            StorageKey::Named("cache".to_string()),
            FileMetadata::default(),
        );
        let restored = FileData::from_json(&data.to_json().unwrap()).unwrap();
        assert_eq!(restored, data);
        assert_eq!(restored.storage, data.storage);
    }

    #[test]
    fn test_file_data_equality_ignores_metadata() {
        let a = FileData::new("abc", StorageKey::Cache, FileMetadata::default());
        let b = FileData::new(
            "abc",
            StorageKey::Cache,
            FileMetadata {
                filename: Some("a.jpg".to_string()),
                ..Default::default()
            },
        );
        let c = FileData::new("abc", StorageKey::Store, FileMetadata::default());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_json_missing_fields() {
        let err = FileData::from_json(r#"{"metadata": {}}"#).unwrap_err();
        assert_eq!(err.validation_errors(), ["id is missing", "storage is missing"]);

        let err = FileData::from_json(r#"{"id": 1, "storage": "cache"}"#).unwrap_err();
        assert_eq!(err.validation_errors(), ["id must be a non-empty string"]);
    }

    #[test]
    fn test_from_json_malformed() {
        assert!(matches!(
            FileData::from_json("{not json").unwrap_err(),
            AttachError::Parse(_)
        ));
        assert!(matches!(
            FileData::from_json("[1, 2]").unwrap_err(),
            AttachError::Validation(_)
        ));
    }

    #[test]
    fn test_serialized_shape() {
        let data = FileData::new(
            "abc.jpg",
            StorageKey::Store,
            FileMetadata {
                filename: Some("photo.jpg".to_string()),
                size: Some(5),
                mime_type: Some("image/jpeg".to_string()),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "abc.jpg",
                "storage": "store",
                "metadata": {"filename": "photo.jpg", "size": 5, "mime_type": "image/jpeg"}
            })
        );
    }

    #[test]
    fn test_metadata_defaults_when_absent() {
        let data = FileData::from_json(r#"{"id": "x", "storage": "cache"}"#).unwrap();
        assert_eq!(data.metadata, FileMetadata::default());
    }
}
