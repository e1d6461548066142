//! Serializable filter, sort and pagination options.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One sort segment of an order-by clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSegment {
    /// Field to sort by.
    pub field: String,
    /// Sort descending instead of ascending.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub descending: bool,
}

/// Filter, sort and pagination for a repository query.
///
/// Options serialize to a canonical JSON object (keys sorted), so the
/// serialized form doubles as the query-signature component that decides
/// whether two subscriptions can share state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Field equality filter.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub filter: Map<String, Value>,
    /// Sort segments, applied in order.
    #[serde(rename = "orderBy", default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortSegment>,
    /// Maximum number of rows to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Creates empty options (match everything, unsorted, unlimited).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality filter on a field.
    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter.insert(field.into(), value);
        self
    }

    /// Adds an ascending sort segment.
    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(SortSegment {
            field: field.into(),
            descending: false,
        });
        self
    }

    /// Adds a descending sort segment.
    pub fn with_order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(SortSegment {
            field: field.into(),
            descending: true,
        });
        self
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Serializes the options to JSON.
    pub fn to_json(&self) -> CoreResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes options from JSON.
    pub fn from_json(value: &Value) -> CoreResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Returns the signature identifying this query for an entity.
    ///
    /// Two subscriptions share client state exactly when their
    /// signatures are equal.
    pub fn signature(&self, entity_key: &str) -> CoreResult<String> {
        Ok(format!("{}:{}", entity_key, serde_json::to_string(self)?))
    }

    /// Returns true if the row passes the equality filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filter
            .iter()
            .all(|(field, expected)| row.get(field) == Some(expected))
    }

    /// Sorts rows in place by the order-by segments.
    pub fn sort_rows(&self, rows: &mut [Value]) {
        if self.order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| self.compare_rows(a, b));
    }

    /// Compares two rows by the order-by segments.
    pub fn compare_rows(&self, a: &Value, b: &Value) -> Ordering {
        for segment in &self.order_by {
            let left = a.get(&segment.field).unwrap_or(&Value::Null);
            let right = b.get(&segment.field).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            if ordering != Ordering::Equal {
                return if segment.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
            }
        }
        Ordering::Equal
    }
}

/// Compares two JSON scalars.
///
/// Values of different types order by type rank (null, bool, number,
/// string); arrays and objects compare equal to everything of their own
/// rank since they are not meaningful sort keys.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
