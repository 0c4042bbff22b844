//! Attachments made of several named variants ("versions") of one upload.
//!
//! `VersionsAttacher` runs the single-file protocol per entry over a mapping
//! of version names to files. The mapping is always filtered to the
//! registered version names: unknown keys coming from serialized state or
//! uploads are dropped without being uploaded or stored.
//!
//! Deleting (`replace`, `destroy`) is best-effort per entry: every entry is
//! attempted and failures are reported together as `AttachError::Versions`.
//! Creating (`set_versions_from_upload`, `promote`) stops at the first
//! failure and removes the copies it already wrote.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attacher::AttachmentConfig;
use crate::context::Context;
use crate::error::{AttachError, AttachResult};
use crate::io::FileLike;
use crate::object_store::UrlOptions;
use crate::record::Record;
use crate::storages::Storages;
use crate::uploaded_file::{FileData, UploadedFile};

/// Version name to file, ordered by name.
pub type VersionSet = BTreeMap<String, UploadedFile>;

/// Label used for the unversioned file in aggregated errors.
const ORIGINAL: &str = "original";

/// What a versioned attachment holds: a raw file before versions exist, or the versions.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentData {
    Single(UploadedFile),
    Versions(VersionSet),
}

impl AttachmentData {
    /// Parse serialized state. Mapping keys outside `registered` are dropped;
    /// an empty result is `None`.
    pub fn from_json(
        json: &str,
        storages: &Storages,
        registered: &[String],
    ) -> AttachResult<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Object(object) = value else {
            return Err(AttachError::Validation(vec![
                "attachment data must be a JSON object".to_string(),
            ]));
        };

        if object.contains_key("id") {
            let data = FileData::from_value(serde_json::Value::Object(object))?;
            return Ok(Some(AttachmentData::Single(storages.uploaded_file(data)?)));
        }

        let mut versions = VersionSet::new();
        for (name, raw) in object {
            if !registered.contains(&name) {
                tracing::debug!(version = %name, "Dropping unregistered version");
                continue;
            }
            let file = storages.uploaded_file(FileData::from_value(raw)?)?;
            versions.insert(name, file);
        }

        Ok((!versions.is_empty()).then_some(AttachmentData::Versions(versions)))
    }

    pub fn to_json(&self) -> AttachResult<String> {
        let json = match self {
            AttachmentData::Single(file) => serde_json::to_string(file.data())?,
            AttachmentData::Versions(versions) => {
                let data: BTreeMap<&str, &FileData> = versions
                    .iter()
                    .map(|(name, file)| (name.as_str(), file.data()))
                    .collect();
                serde_json::to_string(&data)?
            }
        };
        Ok(json)
    }

    /// Every file with its label: the version name, or `original` for a single file.
    pub fn files(&self) -> Vec<(&str, &UploadedFile)> {
        match self {
            AttachmentData::Single(file) => vec![(ORIGINAL, file)],
            AttachmentData::Versions(versions) => versions
                .iter()
                .map(|(name, file)| (name.as_str(), file))
                .collect(),
        }
    }

    fn contains(&self, file: &UploadedFile) -> bool {
        self.files().iter().any(|(_, held)| *held == file)
    }
}

/// Controller for a versioned attachment on one record.
pub struct VersionsAttacher<'a, R: Record> {
    config: Arc<AttachmentConfig>,
    record: &'a mut R,
    current: Option<AttachmentData>,
    replaced: Option<AttachmentData>,
}

impl<'a, R: Record> VersionsAttacher<'a, R> {
    pub fn new(config: Arc<AttachmentConfig>, record: &'a mut R) -> AttachResult<Self> {
        if config.versions().is_empty() {
            return Err(AttachError::Configuration(format!(
                "attachment {} has no registered versions",
                config.name()
            )));
        }
        let current = match record.read_attribute(&config.column()) {
            Some(json) => AttachmentData::from_json(&json, config.storages(), config.versions())?,
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

    pub fn get(&self) -> Option<&AttachmentData> {
        self.current.as_ref()
    }

    /// The held versions, or `None` when empty or not versioned yet.
    pub fn versions(&self) -> Option<&VersionSet> {
        match &self.current {
            Some(AttachmentData::Versions(versions)) => Some(versions),
            _ => None,
        }
    }

    pub fn pending_replace(&self) -> Option<&AttachmentData> {
        self.replaced.as_ref()
    }

    /// Attach a raw file before any versions have been generated.
    pub async fn set_single_from_upload(
        &mut self,
        io: &dyn FileLike,
    ) -> AttachResult<Option<&AttachmentData>> {
        let context = self.context();
        let cached = self
            .config
            .cache_validated(self.config.validator(), io, &context)
            .await?;
        self.assign(Some(AttachmentData::Single(cached)))?;
        Ok(self.current.as_ref())
    }

    /// Upload each registered entry to the cache and attach the resulting versions.
    pub async fn set_versions_from_upload(
        &mut self,
        files: &BTreeMap<String, &dyn FileLike>,
    ) -> AttachResult<Option<&AttachmentData>> {
        self.ensure_per_version_validation()?;
        let context = self.context();

        let mut cached = VersionSet::new();
        for (name, io) in files {
            if !self.config.is_version(name) {
                tracing::debug!(version = %name, "Dropping unregistered version");
                continue;
            }
            let version_context = context.with_version(name.as_str());
            let result = self
                .config
                .cache_validated(self.config.version_validator(), *io, &version_context)
                .await;
            match result {
                Ok(file) => {
                    cached.insert(name.clone(), file);
                }
                Err(e) => {
                    discard(&cached).await;
                    return Err(e);
                }
            }
        }

        let data = (!cached.is_empty()).then_some(AttachmentData::Versions(cached));
        self.assign(data)?;
        Ok(self.current.as_ref())
    }

    /// Attach serialized state as-is: a single file or a version mapping. `None` clears.
    pub fn set_from_trusted_state(
        &mut self,
        json: Option<&str>,
    ) -> AttachResult<Option<&AttachmentData>> {
        let data = match json {
            Some(json) => {
                AttachmentData::from_json(json, self.config.storages(), self.config.versions())?
            }
            None => None,
        };
        self.set_data(data)
    }

    /// Attach already uploaded files. Cached entries are validated; unregistered names are dropped.
    pub fn set_data(
        &mut self,
        data: Option<AttachmentData>,
    ) -> AttachResult<Option<&AttachmentData>> {
        let data = match data {
            Some(AttachmentData::Versions(versions)) => {
                self.ensure_per_version_validation()?;
                let versions: VersionSet = versions
                    .into_iter()
                    .filter(|(name, _)| self.config.is_version(name))
                    .collect();
                let context = self.context();
                for (name, file) in &versions {
                    self.config.check(
                        self.config.version_validator(),
                        file,
                        &context.with_version(name.as_str()),
                    )?;
                }
                (!versions.is_empty()).then_some(AttachmentData::Versions(versions))
            }
            Some(AttachmentData::Single(file)) => {
                self.config
                    .check(self.config.validator(), &file, &self.context())?;
                Some(AttachmentData::Single(file))
            }
            None => None,
        };
        self.assign(data)?;
        Ok(self.current.as_ref())
    }

    pub fn clear(&mut self) -> AttachResult<()> {
        self.assign(None)
    }

    /// URL of a version.
    ///
    /// Unregistered names fail with `UnknownVersion`. A raw single file answers
    /// for every version. Versions without a name are ambiguous and fail with
    /// `Configuration`. Missing files fall back to the default URL with the
    /// version in the context.
    pub fn url(&self, version: Option<&str>, options: &UrlOptions) -> AttachResult<Option<String>> {
        if let Some(name) = version {
            if !self.config.is_version(name) {
                return Err(AttachError::UnknownVersion(name.to_string()));
            }
        }

        match (&self.current, version) {
            (None, _) => Ok(self.default_url(version, options)),
            (Some(AttachmentData::Single(file)), _) => Ok(Some(file.url(options))),
            (Some(AttachmentData::Versions(_)), None) => Err(AttachError::Configuration(format!(
                "attachment {} is versioned, a version name is required for its URL",
                self.config.name()
            ))),
            (Some(AttachmentData::Versions(versions)), Some(name)) => match versions.get(name) {
                Some(file) => Ok(Some(file.url(options))),
                None => Ok(self.default_url(version, options)),
            },
        }
    }

    /// Copy every entry into the store. On failure the copies made so far are deleted.
    pub async fn promote(&self, versions: &VersionSet) -> AttachResult<VersionSet> {
        let context = self.context();
        let mut promoted = VersionSet::new();
        for (name, file) in versions {
            let result = self
                .config
                .promote_file(file, &context.with_version(name.as_str()))
                .await;
            match result {
                Ok(stored) => {
                    promoted.insert(name.clone(), stored);
                }
                Err(e) => {
                    discard(&promoted).await;
                    return Err(e);
                }
            }
        }
        Ok(promoted)
    }

    /// Delete whatever the last assignment superseded, skipping files still attached.
    pub async fn replace(&mut self) -> AttachResult<()> {
        let Some(old) = self.replaced.take() else {
            return Ok(());
        };

        let stale: Vec<(&str, &UploadedFile)> = old
            .files()
            .into_iter()
            .filter(|(_, file)| !self.current.as_ref().is_some_and(|c| c.contains(file)))
            .collect();
        let failures = delete_each(&stale).await;
        if failures.is_empty() {
            return Ok(());
        }

        let failed: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
        self.replaced = match &old {
            AttachmentData::Single(_) => Some(old.clone()),
            AttachmentData::Versions(versions) => Some(AttachmentData::Versions(
                versions
                    .iter()
                    .filter(|(name, _)| failed.contains(&name.as_str()))
                    .map(|(name, file)| (name.clone(), file.clone()))
                    .collect(),
            )),
        };
        Err(into_error(failures))
    }

    /// Assign `new` only if `expected` is still attached; otherwise delete `new`.
    pub async fn swap(
        &mut self,
        expected: &AttachmentData,
        new: AttachmentData,
    ) -> AttachResult<bool> {
        if self.current.as_ref() != Some(expected) {
            tracing::debug!(
                attachment = %self.config.name(),
                "Attachment changed in the meantime, discarding promoted versions"
            );
            let failures = delete_each(&new.files()).await;
            if !failures.is_empty() {
                return Err(into_error(failures));
            }
            return Ok(false);
        }
        self.write_column(Some(&new))?;
        self.current = Some(new);
        Ok(true)
    }

    /// Delete the replaced files, then promote whatever is still cached.
    pub async fn finalize(&mut self) -> AttachResult<()> {
        self.replace().await?;
        let Some(current) = self.current.clone() else {
            return Ok(());
        };

        let promoted = match &current {
            AttachmentData::Single(file) if self.config.cache().is_uploaded(file) => {
                let stored = self.config.promote_file(file, &self.context()).await?;
                AttachmentData::Single(stored)
            }
            AttachmentData::Versions(versions)
                if versions.values().any(|f| self.config.cache().is_uploaded(f)) =>
            {
                let cached: VersionSet = versions
                    .iter()
                    .filter(|(_, f)| self.config.cache().is_uploaded(f))
                    .map(|(name, f)| (name.clone(), f.clone()))
                    .collect();
                let mut merged = versions.clone();
                merged.extend(self.promote(&cached).await?);
                AttachmentData::Versions(merged)
            }
            _ => return Ok(()),
        };

        self.swap(&current, promoted).await?;
        Ok(())
    }

    /// Delete every held file, attempting all of them.
    pub async fn destroy(self) -> AttachResult<()> {
        match &self.current {
            Some(AttachmentData::Single(file)) => file.delete().await,
            Some(data @ AttachmentData::Versions(_)) => {
                let failures = delete_each(&data.files()).await;
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(into_error(failures))
                }
            }
            None => Ok(()),
        }
    }

    fn default_url(&self, version: Option<&str>, options: &UrlOptions) -> Option<String> {
        let context = match version {
            Some(name) => self.context().with_version(name),
            None => self.context(),
        };
        self.config.default_url(&context, options)
    }

    fn ensure_per_version_validation(&self) -> AttachResult<()> {
        if self.config.has_validator() {
            return Err(AttachError::Configuration(format!(
                "attachment {} validates the whole attachment, which versions don't support; \
                 register a version validator instead",
                self.config.name()
            )));
        }
        Ok(())
    }

    fn assign(&mut self, data: Option<AttachmentData>) -> AttachResult<()> {
        self.write_column(data.as_ref())?;
        if self.current != data {
            if let Some(previous) = self.current.take() {
                self.replaced = Some(previous);
            }
        }
        self.current = data;
        Ok(())
    }

    fn write_column(&mut self, data: Option<&AttachmentData>) -> AttachResult<()> {
        let json = data.map(AttachmentData::to_json).transpose()?;
        self.record.write_attribute(&self.config.column(), json);
        Ok(())
    }
}

/// Delete each file, collecting failures instead of stopping.
async fn delete_each(files: &[(&str, &UploadedFile)]) -> Vec<(String, AttachError)> {
    let mut failures = Vec::new();
    for (name, file) in files {
        if let Err(e) = file.delete().await {
            tracing::warn!(version = %name, id = %file.id(), error = %e, "Failed to delete version");
            failures.push((name.to_string(), e));
        }
    }
    failures
}

/// Best-effort removal of copies written by an operation that failed part-way.
async fn discard(files: &VersionSet) {
    let entries: Vec<(&str, &UploadedFile)> =
        files.iter().map(|(name, file)| (name.as_str(), file)).collect();
    delete_each(&entries).await;
}

fn into_error(mut failures: Vec<(String, AttachError)>) -> AttachError {
    if failures.len() == 1 && failures[0].0 == ORIGINAL {
        return failures.remove(0).1;
    }
    AttachError::Versions(failures)
}
