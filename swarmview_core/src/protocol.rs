//! Inbound stream frames.
//!
//! Every frame is a JSON object with a `type` discriminator. Frames this
//! client does not understand (unknown `type`, missing fields, invalid JSON)
//! decode to `None` and are dropped by the session without affecting state.

use crate::agent::AgentSnapshot;
use serde::{Deserialize, Serialize};

/// Fallback message for an `error` frame that carries none.
pub const GENERIC_SERVER_ERROR: &str = "Simulation reported an error";

/// A decoded frame from the simulation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Full state sent right after the stream opens
    Snapshot {
        tick: u64,
        agents: Vec<AgentSnapshot>,
    },

    /// Full state after one simulation step
    Tick {
        tick: u64,
        agents: Vec<AgentSnapshot>,
    },

    /// Server-initiated end of session
    Shutdown,

    /// Application-level failure reported by the service
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerFrame {
    /// Builds a tick frame.
    pub fn tick(tick: u64, agents: Vec<AgentSnapshot>) -> Self {
        ServerFrame::Tick { tick, agents }
    }

    /// Builds an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: Some(message.into()),
        }
    }

    /// Returns the frame's wire name.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Snapshot { .. } => "snapshot",
            ServerFrame::Tick { .. } => "tick",
            ServerFrame::Shutdown => "shutdown",
            ServerFrame::Error { .. } => "error",
        }
    }

    /// Encodes the frame as wire text.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Decodes one text frame, returning `None` for anything unrecognized.
pub fn parse_frame(text: &str) -> Option<ServerFrame> {
    serde_json::from_str(text).ok()
}
