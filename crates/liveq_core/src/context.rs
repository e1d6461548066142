//! Opaque caller identity carried with each request.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The caller identity attached to repository operations.
///
/// The context is opaque to the live query machinery: it is serialized
/// when a query is stored and deserialized when the publisher
/// re-evaluates the query in the background, so re-evaluation runs with
/// the original caller's permissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// User identity, if authenticated.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Additional opaque claims.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub claims: Map<String, Value>,
}

impl RequestContext {
    /// Creates an anonymous context.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Creates a context for a user id.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            claims: Map::new(),
        }
    }

    /// Adds an opaque claim.
    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    /// Serializes the context to JSON.
    pub fn to_json(&self) -> CoreResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes a context from JSON.
    pub fn from_json(value: &Value) -> CoreResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}
