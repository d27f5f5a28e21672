//! Session error types.

use crate::config::ConfigError;
use swarmview_env::EnvError;
use thiserror::Error;

/// Errors surfaced to the caller of a session operation.
///
/// Only `start` returns these. Failures while streaming are absorbed into
/// the published session state instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The creation request failed
    #[error(transparent)]
    Request(#[from] EnvError),

    /// The stream could not be opened
    #[error("Stream connection failed: {0}")]
    Stream(String),

    /// The run configuration was rejected before any request was made
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// A `stop` arrived before the start sequence finished
    #[error("Start cancelled by stop")]
    Cancelled,

    /// The session driver is no longer running
    #[error("Session driver has shut down")]
    DriverClosed,
}
