use std::collections::HashMap;

/// The host model an attachment belongs to.
///
/// Attachment state is persisted as a JSON string in a column; reading and
/// writing that column is all the attacher needs from the host.
pub trait Record: Send + Sync {
    /// Identifier exposed to hooks through the context.
    fn record_id(&self) -> Option<String>;
    fn read_attribute(&self, column: &str) -> Option<String>;
    fn write_attribute(&mut self, column: &str, value: Option<String>);
}

/// A record held entirely in memory, e.g. a form object that is not persisted yet.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecord {
    id: Option<String>,
    columns: HashMap<String, String>,
}

impl MemoryRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            columns: HashMap::new(),
        }
    }

    pub fn unsaved() -> Self {
        Self::default()
    }
}

impl Record for MemoryRecord {
    fn record_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn read_attribute(&self, column: &str) -> Option<String> {
        self.columns.get(column).cloned()
    }

    fn write_attribute(&mut self, column: &str, value: Option<String>) {
        match value {
            Some(value) => {
                self.columns.insert(column.to_string(), value);
            }
            None => {
                self.columns.remove(column);
            }
        }
    }
}
