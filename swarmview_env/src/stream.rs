//! Streaming channel abstraction for tick delivery.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::SimulationId;

/// Close code sent on a deliberate client-side stop.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Opens the per-simulation stream.
///
/// # Implementations
///
/// - **Production**: `WsStreamConnector` - WebSocket via tokio-tungstenite
/// - **Simulation**: `swarmview_sim::ScriptedService` - channel-backed, scripted frames
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Connects to the stream of `id`, resolving once the handshake completes.
    async fn connect(&self, id: &SimulationId) -> Result<Box<dyn FrameStream>, EnvError>;
}

/// An open stream of text frames.
///
/// # Frame Flow
///
/// ```text
/// Service                    Stream                     Client
///   |-- {"type":"snapshot"} -->|                           |
///   |-- {"type":"tick"} ------>|-- next_frame() -> text -->|
///   |-- close ---------------->|-- next_frame() -> None -->|
/// ```
#[async_trait]
pub trait FrameStream: Send {
    /// Receives the next text frame.
    ///
    /// # Returns
    /// * `Some(Ok(text))` - A text frame arrived
    /// * `Some(Err(_))` - Transport failure; the stream is unusable afterwards
    /// * `None` - The peer closed the stream
    ///
    /// Non-text frames (binary, ping/pong) are skipped by implementations.
    async fn next_frame(&mut self) -> Option<Result<String, EnvError>>;

    /// Closes the stream with the given close code.
    async fn close(&mut self, code: u16) -> Result<(), EnvError>;
}
