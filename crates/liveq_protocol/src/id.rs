//! Typed row identifiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A row identifier with value equality.
///
/// Identifiers cross the wire as bare JSON scalars: an integer id
/// serializes as a JSON number, a text id as a JSON string. Two ids are
/// equal when their values are equal; an integer id never equals a text
/// id, even if the text looks numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    /// Integer identifier.
    Int(i64),
    /// Text identifier.
    Text(String),
}

impl ItemId {
    /// Extracts an identifier from a JSON scalar.
    ///
    /// Returns `None` for non-scalar values and for numbers that do not
    /// fit in an `i64`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(ItemId::Int),
            Value::String(s) => Some(ItemId::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the identifier back to a JSON scalar.
    pub fn to_value(&self) -> Value {
        match self {
            ItemId::Int(n) => Value::from(*n),
            ItemId::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Int(n) => write!(f, "{}", n),
            ItemId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Int(value)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        ItemId::Text(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        ItemId::Text(value)
    }
}
