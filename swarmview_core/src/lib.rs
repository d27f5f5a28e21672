//! SwarmView Core - live session lifecycle and scene reconciliation
//!
//! This library turns a remote multi-agent simulation into a live scene:
//! 1. **Session lifecycle**: `SessionMachine` owns the Idle/Starting/Running/
//!    Stopping/Error state and is driven by a single `SessionDriver` task
//! 2. **Scene reconciliation**: `SceneReconciler` keeps one render object per
//!    agent id, oriented along its velocity
//! 3. **Repaint**: `RenderLoop` paints at a fixed rate, independent of ticks
//!
//! The network side lives behind the `swarmview_env` traits, so the same
//! driver runs against the real service or the scripted one in
//! `swarmview_sim`.

pub mod agent;
pub mod config;
pub mod driver;
pub mod error;
pub mod headless;
pub mod protocol;
pub mod render_loop;
pub mod scene;
pub mod session;

#[cfg(feature = "visualization")]
pub mod visualization;

// Re-export key types for convenience
pub use agent::{AgentId, AgentSnapshot};
pub use config::{ConfigError, RunConfig, MAX_AGENTS};
pub use driver::{SessionDriver, SessionHandle, StartOutcome};
pub use error::SessionError;
pub use headless::{HeadlessBackend, HeadlessStats};
pub use protocol::{parse_frame, ServerFrame, GENERIC_SERVER_ERROR};
pub use render_loop::{RenderLoop, RenderSummary, DEFAULT_FPS};
pub use scene::{
    Pose, ReconcileStats, RenderBackend, RenderObject, SceneReconciler, DEFAULT_VELOCITY_EPSILON,
};
pub use session::{
    FrameOutcome, SessionMachine, SessionState, SessionStatus, StopTicket, STREAM_FAILED_MESSAGE,
};

#[cfg(feature = "visualization")]
pub use visualization::{RerunBackend, RerunHandle};
