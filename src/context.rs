use std::collections::BTreeMap;

use serde_json::Value;

/// Immutable bag of facts about the operation in progress, handed to every hook.
///
/// Extending a context returns a copy; the original is never changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    name: String,
    record: Option<String>,
    version: Option<String>,
    extra: BTreeMap<String, Value>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Context for the attachment `name` on the record identified by `record`.
    pub fn for_record(name: impl Into<String>, record: Option<String>) -> Self {
        Self {
            name: name.into(),
            record,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> Option<&str> {
        self.record.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn with_version(&self, version: impl Into<String>) -> Self {
        let mut context = self.clone();
        context.version = Some(version.into());
        context
    }

    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut context = self.clone();
        context.extra.insert(key.into(), value.into());
        context
    }

    /// Flatten into a JSON map: `name`, `record`, `version` (when set) and the extra keys.
    pub fn to_map(&self) -> serde_json::Map<String, Value> {
        let mut map: serde_json::Map<String, Value> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert("name".to_string(), Value::from(self.name.clone()));
        map.insert(
            "record".to_string(),
            self.record.clone().map(Value::from).unwrap_or(Value::Null),
        );
        if let Some(version) = &self.version {
            map.insert("version".to_string(), Value::from(version.clone()));
        }
        map
    }
}
