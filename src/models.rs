//! Core data models shared by every store backend.
//!
//! A [`Document`] is the generic, schemaless unit of storage. Typed views
//! over known doctypes live in [`doctypes`](crate::doctypes).

use serde::Serialize;
use serde_json::{Map, Value};

/// A schemaless document identified by `(doctype, key)`.
///
/// `id` is unset until the first successful save and never changes
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: Option<String>,
    pub doctype: String,
    pub key: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(doctype: &str, key: &str, data: Map<String, Value>) -> Self {
        Self {
            id: None,
            doctype: doctype.to_string(),
            key: key.to_string(),
            data,
        }
    }

    /// Generic accessor for a field of `data`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(Value::as_bool)
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.data.insert(name.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_accessors() {
        let mut doc = Document::new("number", "one", Map::new());
        doc.set_field("name", "One");
        doc.set_field("value", 1);
        doc.set_field("odd", true);

        assert_eq!(doc.str_field("name"), Some("One"));
        assert_eq!(doc.bool_field("odd"), Some(true));
        assert_eq!(doc.field("missing"), None);
        assert_eq!(doc.str_field("value"), None);
    }

    #[test]
    fn test_data_keeps_insertion_order() {
        let mut doc = Document::new("course", "alpha", Map::new());
        doc.set_field("zeta", 1);
        doc.set_field("alpha", 2);
        doc.set_field("mid", json!({"b": 1, "a": 2}));
        let keys: Vec<_> = doc.data.keys().cloned().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }
}
