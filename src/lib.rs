//! file-attacher - file attachments for application records
//!
//! This crate provides:
//! - Swappable object storage backends (local filesystem, in-memory, GCS)
//! - Uploaders that store file-like inputs and describe them as serializable metadata
//! - An attacher state machine: cache on assignment, validate, promote to
//!   permanent storage, replace and destroy
//! - Versions: named variants of an upload managed as one attachment
//! - A small HTTP surface for direct uploads to the cache and downloads

pub mod api;
pub mod attacher;
pub mod config;
pub mod context;
pub mod error;
pub mod io;
pub mod object_store;
pub mod record;
pub mod storages;
#[cfg(test)]
pub mod testutil;
pub mod uploaded_file;
pub mod uploader;
pub mod versions;

pub use attacher::{Attacher, AttachmentConfig, DefaultUrl, Validator};
pub use context::Context;
pub use error::{AttachError, AttachResult};
pub use io::{ByteFile, FileLike, FormFile};
pub use record::{MemoryRecord, Record};
pub use storages::Storages;
pub use uploaded_file::{FileData, FileMetadata, StorageKey, UploadedFile};
pub use uploader::{LocationGenerator, RandomLocation, Uploader};
pub use versions::{AttachmentData, VersionSet, VersionsAttacher};

use config::Config;

/// Shared application state for the HTTP endpoints
pub struct AppState {
    pub config: Config,
    pub storages: Storages,
    pub cache: Uploader,
}
