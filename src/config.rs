use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Temporary storage for fresh uploads
    pub cache: StorageConfig,
    /// Permanent storage for promoted files
    pub store: StorageConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Gcs,
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the local backend
    pub local_path: String,
    /// Prefix for URLs of locally stored files
    pub url_prefix: String,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to the metadata server)
    pub gcs_credentials_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl StorageConfig {
    /// Local storage under `./files/<name>`, served from `/files/<name>`.
    pub fn local(name: &str) -> Self {
        Self {
            backend: StorageBackend::Local,
            local_path: format!("./files/{name}"),
            url_prefix: format!("/files/{name}"),
            gcs_bucket: None,
            gcs_credentials_file: None,
        }
    }

    /// Read the `<PREFIX>_*` variables, defaulting to local storage.
    fn from_env(prefix: &str, name: &str) -> Self {
        let defaults = Self::local(name);
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();

        let backend = match var("BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Local,
        };

        Self {
            backend,
            local_path: var("PATH").unwrap_or(defaults.local_path),
            url_prefix: var("URL_PREFIX").unwrap_or(defaults.url_prefix),
            gcs_bucket: var("GCS_BUCKET"),
            gcs_credentials_file: std::env::var("GCS_CREDENTIALS_FILE").ok(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let config = Config {
            server: ServerConfig { bind_address },
            cache: StorageConfig::from_env("CACHE", "cache"),
            store: StorageConfig::from_env("STORE", "store"),
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, storage) in [("CACHE", &self.cache), ("STORE", &self.store)] {
            if storage.backend == StorageBackend::Gcs && storage.gcs_bucket.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "{name}_GCS_BUCKET is required when {name}_BACKEND=gcs"
                )));
            }
        }

        if self.cache.backend == StorageBackend::Local
            && self.store.backend == StorageBackend::Local
            && self.cache.local_path == self.store.local_path
        {
            return Err(ConfigError::ValidationError(
                "CACHE_PATH and STORE_PATH must point to different directories".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.cache.backend == StorageBackend::Memory {
            tracing::warn!("Cache storage is in memory; cached uploads are lost on restart.");
        }

        Ok(())
    }
}
