//! Inputs accepted by the uploader.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use crate::object_store::ObjectStoreError;
use crate::uploaded_file::UploadedFile;

/// Anything that can be uploaded: readable bytes plus whatever the client told us about them.
#[async_trait]
pub trait FileLike: Send + Sync {
    async fn read(&self) -> std::io::Result<Bytes>;

    fn original_filename(&self) -> Option<&str> {
        None
    }

    fn content_type(&self) -> Option<&str> {
        None
    }

    fn size(&self) -> Option<u64> {
        None
    }
}

/// An in-memory upload.
#[derive(Debug, Clone, Default)]
pub struct ByteFile {
    data: Bytes,
    filename: Option<String>,
    content_type: Option<String>,
}

impl ByteFile {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[async_trait]
impl FileLike for ByteFile {
    async fn read(&self) -> std::io::Result<Bytes> {
        Ok(self.data.clone())
    }

    fn original_filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// A multipart form upload spooled to a temporary file by the web layer.
///
/// Mirrors the parts a form upload arrives with: the tempfile, the
/// client-side filename, the declared type and the raw part head.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub tempfile: PathBuf,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub head: Option<String>,
}

impl FormFile {
    pub fn new(tempfile: impl Into<PathBuf>) -> Self {
        Self {
            tempfile: tempfile.into(),
            filename: None,
            content_type: None,
            head: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_head(mut self, head: impl Into<String>) -> Self {
        self.head = Some(head.into());
        self
    }
}

#[async_trait]
impl FileLike for FormFile {
    async fn read(&self) -> std::io::Result<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&self.tempfile).await?))
    }

    fn original_filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// An uploaded file can be re-uploaded elsewhere, which is how promotion copies cache to store.
#[async_trait]
impl FileLike for UploadedFile {
    async fn read(&self) -> std::io::Result<Bytes> {
        self.storage().get(self.id()).await.map_err(|e| match e {
            ObjectStoreError::Io(io) => io,
            ObjectStoreError::NotFound(key) => std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} has no object {key}", self.storage_key()),
            ),
            other => std::io::Error::other(other.to_string()),
        })
    }

    fn original_filename(&self) -> Option<&str> {
        UploadedFile::original_filename(self)
    }

    fn content_type(&self) -> Option<&str> {
        self.mime_type()
    }

    fn size(&self) -> Option<u64> {
        UploadedFile::size(self)
    }
}
