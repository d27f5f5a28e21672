//! Error types for the SwarmView environment abstraction.

use thiserror::Error;

/// Errors that can occur talking to the simulation service.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Service answered with a non-success status
    #[error("{message}")]
    Http { status: u16, message: String },

    /// Service unreachable (connection refused, DNS, timeout, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Stream transport failure (handshake, read, close)
    #[error("Stream error: {0}")]
    Stream(String),

    /// Body serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configured base URL cannot be used
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a stream error.
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status if the service rejected the request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
