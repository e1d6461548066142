//! Error types for the live query server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving live queries.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Repository or channel layer error.
    #[error("core error: {0}")]
    Core(#[from] liveq_core::CoreError),

    /// Wire encoding or decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] liveq_protocol::ProtocolError),

    /// Broadcasting a delta batch failed.
    #[error("broadcast failed on channel '{channel}': {message}")]
    Broadcast {
        /// Channel key the batch was addressed to.
        channel: String,
        /// Failure description.
        message: String,
    },
}

impl ServerError {
    /// Creates a broadcast error.
    pub fn broadcast(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Broadcast {
            channel: channel.into(),
            message: message.into(),
        }
    }
}
