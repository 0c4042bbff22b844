use thiserror::Error;

use crate::object_store::ObjectStoreError;

pub type AttachResult<T> = Result<T, AttachError>;

#[derive(Debug, Error)]
pub enum AttachError {
    /// A registered validator rejected the file.
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("Upload failed: {0}")]
    Upload(#[source] ObjectStoreError),
    #[error("Storage error: {0}")]
    Storage(#[source] ObjectStoreError),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Programmer error: unregistered storage, ambiguous version, disallowed hook.
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown version: {0}")]
    UnknownVersion(String),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Per-version failures collected by a fan-out operation, in version order.
    #[error("{} version(s) failed: {}", .0.len(), describe_versions(.0))]
    Versions(Vec<(String, AttachError)>),
}

impl From<ObjectStoreError> for AttachError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(key) => AttachError::NotFound(key),
            other => AttachError::Storage(other),
        }
    }
}

impl AttachError {
    /// Validation messages, if this is a validation failure.
    pub fn validation_errors(&self) -> &[String] {
        match self {
            AttachError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

fn describe_versions(failures: &[(String, AttachError)]) -> String {
    failures
        .iter()
        .map(|(version, e)| format!("{version}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
