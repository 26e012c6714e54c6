//! Declarative promotion of nested payload fields into partition-level
//! indexable attributes.

use serde_derive::{Deserialize, Serialize};

use crate::value::Value;

/// An index declaration: either a dotted path extracting a nested field
/// from the payload, or a constant value. Registered on the client and
/// propagated to every datastore it opens; the extracted value is promoted
/// into the record's `idx` map at prepare time, which backends materialize
/// as an `idx_<name>` attribute for secondary indexing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub path: String,
    pub value: Option<Value>,
}

impl IndexDef {
    pub fn path(name: impl Into<String>, path: impl Into<String>) -> Self {
        IndexDef { name: name.into(), path: path.into(), value: None }
    }

    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        IndexDef { name: name.into(), path: String::new(), value: Some(value) }
    }

    /// The value this declaration promotes for a given payload, if any.
    pub fn extract(&self, dat: &Value) -> Option<Value> {
        if let Some(value) = &self.value {
            return Some(value.clone());
        }
        if self.path.is_empty() {
            return None;
        }
        dat.at_path(&self.path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_by_path() {
        let dat = Value::from(serde_json::json!({"user": {"email": "a@b"}}));
        let idx = IndexDef::path("email", "user.email");
        assert_eq!(idx.extract(&dat), Some(Value::from("a@b")));
        assert_eq!(idx.extract(&Value::Null), None);
    }

    #[test]
    fn extract_constant() {
        let idx = IndexDef::constant("shard", Value::Int(3));
        assert_eq!(idx.extract(&Value::Null), Some(Value::Int(3)));
    }

    #[test]
    fn empty_declaration_extracts_nothing() {
        assert_eq!(IndexDef::default().extract(&Value::Int(1)), None);
    }
}
