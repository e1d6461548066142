//! Error types for the core repository model.

use liveq_protocol::ItemId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the repository and channel layer.
#[derive(Error, Debug)]
pub enum CoreError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row is missing its identifier field or the field is not a scalar.
    #[error("row has no usable identifier in field '{field}'")]
    MissingId {
        /// Name of the identifier field.
        field: String,
    },

    /// No repository is registered for the entity key.
    #[error("unknown entity key: {0}")]
    UnknownEntity(String),

    /// A row with the given identifier does not exist.
    #[error("row not found: {0}")]
    RowNotFound(ItemId),

    /// A row with the given identifier already exists.
    #[error("duplicate row id: {0}")]
    DuplicateId(ItemId),

    /// Publishing on a channel failed.
    #[error("publish failed on channel '{channel}': {message}")]
    Publish {
        /// Channel key.
        channel: String,
        /// Failure description.
        message: String,
    },
}

impl CoreError {
    /// Creates a missing-identifier error.
    pub fn missing_id(field: impl Into<String>) -> Self {
        Self::MissingId {
            field: field.into(),
        }
    }

    /// Creates a publish error.
    pub fn publish(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            channel: channel.into(),
            message: message.into(),
        }
    }
}
