//! Error types for the live query client.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur on the client side of a live query.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport failed to deliver or receive.
    #[error("transport error: {message}")]
    Transport {
        /// Failure description.
        message: String,
        /// Whether retrying the operation may succeed.
        retryable: bool,
    },

    /// The server rejected a request.
    #[error("server error: {0}")]
    Server(String),

    /// Repository or channel layer error.
    #[error("core error: {0}")]
    Core(#[from] liveq_core::CoreError),

    /// Wire encoding or decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] liveq_protocol::ProtocolError),

    /// An operation needed an open connection and none exists.
    #[error("not connected")]
    NotConnected,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a server rejection error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server(message.into())
    }

    /// Returns true if retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::NotConnected => true,
            Self::Server(_) | Self::Core(_) | Self::Protocol(_) => false,
        }
    }
}
