//! The attach / promote / replace / destroy protocol for a single file.
//!
//! An `Attacher` is built per record and attachment name, holds the
//! deserialized attachment column in memory and writes every assignment back
//! to the record. The held file's storage decides its state: nothing held
//! (empty), a file in the cache storage (cached) or in the store (stored).

use std::sync::Arc;

use crate::context::Context;
use crate::error::{AttachError, AttachResult};
use crate::io::FileLike;
use crate::object_store::UrlOptions;
use crate::record::Record;
use crate::storages::Storages;
use crate::uploaded_file::{StorageKey, UploadedFile};
use crate::uploader::{LocationGenerator, RandomLocation, Uploader};

/// Checks a newly cached file. Returns the list of problems; empty means valid.
pub trait Validator: Send + Sync {
    fn validate(&self, file: &UploadedFile, context: &Context) -> Vec<String>;
}

impl<F> Validator for F
where
    F: Fn(&UploadedFile, &Context) -> Vec<String> + Send + Sync,
{
    fn validate(&self, file: &UploadedFile, context: &Context) -> Vec<String> {
        self(file, context)
    }
}

/// URL to show when nothing is attached.
pub trait DefaultUrl: Send + Sync {
    fn default_url(&self, context: &Context, options: &UrlOptions) -> Option<String>;
}

impl<F> DefaultUrl for F
where
    F: Fn(&Context, &UrlOptions) -> Option<String> + Send + Sync,
{
    fn default_url(&self, context: &Context, options: &UrlOptions) -> Option<String> {
        self(context, options)
    }
}

/// Everything an attacher needs to know about one attachment, fixed at startup.
pub struct AttachmentConfig {
    name: String,
    storages: Storages,
    cache: Uploader,
    store: Uploader,
    validator: Option<Arc<dyn Validator>>,
    default_url: Option<Arc<dyn DefaultUrl>>,
    versions: Vec<String>,
    version_validator: Option<Arc<dyn Validator>>,
}

impl AttachmentConfig {
    pub fn builder(name: impl Into<String>, storages: Storages) -> AttachmentConfigBuilder {
        AttachmentConfigBuilder {
            name: name.into(),
            storages,
            cache_key: StorageKey::Cache,
            store_key: StorageKey::Store,
            location: Arc::new(RandomLocation),
            validator: None,
            default_url: None,
            versions: Vec::new(),
            version_validator: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record column holding the serialized attachment.
    pub fn column(&self) -> String {
        format!("{}_data", self.name)
    }

    pub fn storages(&self) -> &Storages {
        &self.storages
    }

    pub fn cache(&self) -> &Uploader {
        &self.cache
    }

    pub fn store(&self) -> &Uploader {
        &self.store
    }

    /// Registered version names, sorted.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn is_version(&self, name: &str) -> bool {
        self.versions.iter().any(|v| v == name)
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub(crate) fn validator(&self) -> Option<&dyn Validator> {
        self.validator.as_deref()
    }

    pub(crate) fn version_validator(&self) -> Option<&dyn Validator> {
        self.version_validator.as_deref()
    }

    pub(crate) fn default_url(&self, context: &Context, options: &UrlOptions) -> Option<String> {
        self.default_url
            .as_ref()
            .and_then(|hook| hook.default_url(context, options))
    }

    /// Run `validator` against a cached file. Files outside the cache are trusted.
    pub(crate) fn check(
        &self,
        validator: Option<&dyn Validator>,
        file: &UploadedFile,
        context: &Context,
    ) -> AttachResult<()> {
        let Some(validator) = validator else {
            return Ok(());
        };
        if !self.cache.is_uploaded(file) {
            return Ok(());
        }
        let errors = validator.validate(file, context);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AttachError::Validation(errors))
        }
    }

    /// Upload to the cache and validate. A rejected upload is removed again.
    pub(crate) async fn cache_validated(
        &self,
        validator: Option<&dyn Validator>,
        io: &dyn FileLike,
        context: &Context,
    ) -> AttachResult<UploadedFile> {
        let cached = self
            .cache
            .upload(io, &context.with("phase", "cache"))
            .await?;

        if let Err(e) = self.check(validator, &cached, context) {
            if let Err(delete_error) = cached.delete().await {
                tracing::warn!(
                    id = %cached.id(),
                    error = %delete_error,
                    "Failed to remove rejected upload from cache"
                );
            }
            return Err(e);
        }
        Ok(cached)
    }

    pub(crate) async fn promote_file(
        &self,
        file: &UploadedFile,
        context: &Context,
    ) -> AttachResult<UploadedFile> {
        self.store.upload(file, &context.with("phase", "store")).await
    }
}

pub struct AttachmentConfigBuilder {
    name: String,
    storages: Storages,
    cache_key: StorageKey,
    store_key: StorageKey,
    location: Arc<dyn LocationGenerator>,
    validator: Option<Arc<dyn Validator>>,
    default_url: Option<Arc<dyn DefaultUrl>>,
    versions: Vec<String>,
    version_validator: Option<Arc<dyn Validator>>,
}

impl AttachmentConfigBuilder {
    pub fn cache_key(mut self, key: StorageKey) -> Self {
        self.cache_key = key;
        self
    }

    pub fn store_key(mut self, key: StorageKey) -> Self {
        self.store_key = key;
        self
    }

    pub fn location(mut self, location: impl LocationGenerator + 'static) -> Self {
        self.location = Arc::new(location);
        self
    }

    /// Validation for the attachment as a whole.
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn default_url(mut self, default_url: impl DefaultUrl + 'static) -> Self {
        self.default_url = Some(Arc::new(default_url));
        self
    }

    pub fn versions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions = names.into_iter().map(Into::into).collect();
        self
    }

    /// Validation applied to each version entry, with the version in the context.
    pub fn version_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.version_validator = Some(Arc::new(validator));
        self
    }

    pub fn build(mut self) -> AttachResult<Arc<AttachmentConfig>> {
        if self.name.trim().is_empty() {
            return Err(AttachError::Configuration(
                "attachment name must not be empty".to_string(),
            ));
        }
        if self.cache_key == self.store_key {
            return Err(AttachError::Configuration(format!(
                "cache and store must be different storages (both are {})",
                self.cache_key
            )));
        }
        if self.version_validator.is_some() && self.versions.is_empty() {
            return Err(AttachError::Configuration(
                "a version validator needs registered versions".to_string(),
            ));
        }

        self.versions.sort();
        self.versions.dedup();

        let cache = Uploader::for_storage(&self.storages, self.cache_key)?
            .with_location(Arc::clone(&self.location));
        let store = Uploader::for_storage(&self.storages, self.store_key)?
            .with_location(self.location);

        Ok(Arc::new(AttachmentConfig {
            name: self.name,
            storages: self.storages,
            cache,
            store,
            validator: self.validator,
            default_url: self.default_url,
            versions: self.versions,
            version_validator: self.version_validator,
        }))
    }
}

/// Controller for one attachment on one record.
///
/// Not meant to be shared: scope an attacher to a single logical operation.
pub struct Attacher<'a, R: Record> {
    config: Arc<AttachmentConfig>,
    record: &'a mut R,
    current: Option<UploadedFile>,
    replaced: Option<UploadedFile>,
}

impl<'a, R: Record> Attacher<'a, R> {
    /// Load the attachment currently stored in the record's column.
    pub fn new(config: Arc<AttachmentConfig>, record: &'a mut R) -> AttachResult<Self> {
        let current = match record.read_attribute(&config.column()) {
            Some(json) => Some(config.storages().uploaded_file_from_json(&json)?),
            None => None,
        };
        Ok(Self {
            config,
            record,
            current,
            replaced: None,
        })
    }

    pub fn config(&self) -> &AttachmentConfig {
        &self.config
    }

    pub fn record(&self) -> &R {
        &*self.record
    }

    pub fn context(&self) -> Context {
        Context::for_record(self.config.name(), self.record.record_id())
    }

    pub fn get(&self) -> Option<&UploadedFile> {
        self.current.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|file| self.config.cache().is_uploaded(file))
    }

    pub fn is_stored(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|file| self.config.store().is_uploaded(file))
    }

    /// The file the next `replace()` will delete.
    pub fn pending_replace(&self) -> Option<&UploadedFile> {
        self.replaced.as_ref()
    }

    /// Upload a raw file to the cache, validate it and attach it.
    pub async fn set_from_upload(&mut self, io: &dyn FileLike) -> AttachResult<&UploadedFile> {
        let context = self.context();
        let cached = self
            .config
            .cache_validated(self.config.validator(), io, &context)
            .await?;
        self.write_column(Some(&cached))?;
        self.remember_replaced(Some(&cached));
        let attached: &UploadedFile = self.current.insert(cached);
        Ok(attached)
    }

    /// Attach previously serialized file data as-is. `None` clears the attachment.
    pub fn set_from_trusted_state(
        &mut self,
        json: Option<&str>,
    ) -> AttachResult<Option<&UploadedFile>> {
        let file = match json {
            Some(json) => Some(self.config.storages().uploaded_file_from_json(json)?),
            None => None,
        };
        self.set_file(file)
    }

    /// Attach an already uploaded file. Cached files are validated; stored ones are trusted.
    pub fn set_file(&mut self, file: Option<UploadedFile>) -> AttachResult<Option<&UploadedFile>> {
        if let Some(file) = &file {
            self.config
                .check(self.config.validator(), file, &self.context())?;
        }
        self.assign(file)?;
        Ok(self.current.as_ref())
    }

    pub fn clear(&mut self) -> AttachResult<()> {
        self.assign(None)
    }

    pub fn url(&self, options: &UrlOptions) -> Option<String> {
        match &self.current {
            Some(file) => Some(file.url(options)),
            None => self.config.default_url(&self.context(), options),
        }
    }

    /// Copy `file` into the store under a fresh id. The caller assigns the result.
    pub async fn promote(&self, file: &UploadedFile) -> AttachResult<UploadedFile> {
        self.config.promote_file(file, &self.context()).await
    }

    /// Delete the file superseded by the last assignment, unless it is attached again.
    pub async fn replace(&mut self) -> AttachResult<()> {
        let Some(old) = self.replaced.take() else {
            return Ok(());
        };
        if self.current.as_ref() == Some(&old) {
            return Ok(());
        }
        if let Err(e) = old.delete().await {
            self.replaced = Some(old);
            return Err(e);
        }
        Ok(())
    }

    /// Assign `new` only if `expected` is still attached; otherwise delete `new`.
    ///
    /// Returns whether the assignment happened.
    pub async fn swap(&mut self, expected: &UploadedFile, new: UploadedFile) -> AttachResult<bool> {
        if self.current.as_ref() != Some(expected) {
            tracing::debug!(
                attachment = %self.config.name(),
                id = %new.id(),
                "Attachment changed in the meantime, discarding promoted file"
            );
            new.delete().await?;
            return Ok(false);
        }
        self.write_column(Some(&new))?;
        self.current = Some(new);
        Ok(true)
    }

    /// Delete the replaced file, then promote a cached attachment into the store.
    pub async fn finalize(&mut self) -> AttachResult<()> {
        self.replace().await?;
        let cached = match &self.current {
            Some(file) if self.config.cache().is_uploaded(file) => file.clone(),
            _ => return Ok(()),
        };
        let stored = self.promote(&cached).await?;
        self.swap(&cached, stored).await?;
        Ok(())
    }

    /// Delete the attached file. Used when the owning record is destroyed.
    pub async fn destroy(self) -> AttachResult<()> {
        match self.current {
            Some(file) => file.delete().await,
            None => Ok(()),
        }
    }

    fn assign(&mut self, file: Option<UploadedFile>) -> AttachResult<()> {
        self.write_column(file.as_ref())?;
        self.remember_replaced(file.as_ref());
        self.current = file;
        Ok(())
    }

    /// Only the most recent non-empty value is kept as the replace target.
    fn remember_replaced(&mut self, next: Option<&UploadedFile>) {
        if self.current.as_ref() != next {
            if let Some(previous) = self.current.take() {
                self.replaced = Some(previous);
            }
        }
    }

    fn write_column(&mut self, file: Option<&UploadedFile>) -> AttachResult<()> {
        let json = file.map(UploadedFile::to_json).transpose()?;
        self.record.write_attribute(&self.config.column(), json);
        Ok(())
    }
}
