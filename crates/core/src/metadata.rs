use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A small untyped sum type standing in for the "dynamic metadata bag" the
/// original services pass around as free-form JSON. Restricting it to a
/// closed set of shapes keeps every caller exhaustive-matchable instead of
/// threading `serde_json::Value` (and its arbitrary nesting) through the
/// whole workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<MetadataValue>),
    Nested(HashMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

/// Convenience alias for the map form most call sites actually construct.
pub type Metadata = HashMap<String, MetadataValue>;
