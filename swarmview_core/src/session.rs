//! Session state machine.
//!
//! `SessionMachine` is the single writer of `SessionState`. Every transition
//! publishes the new state on a `tokio::sync::watch` channel, so readers
//! (scene reconciler, UI) always observe a consistent snapshot and never
//! mutate it.
//!
//! ```text
//!            start                first frame
//!   Idle ───────────► Starting ─────────────────► Running
//!    ▲                   │                           │
//!    │                   │ create/connect failure    │ error frame
//!    │                   ▼                           ▼
//!    │  stop          Error ◄────────────────────────┘
//!    └──── Stopping ◄─── (any non-Idle state)
//! ```
//!
//! Results of asynchronous work (creation response, stream open, frames) are
//! tagged with the attempt number that issued them. A stop or a new start
//! bumps the attempt, so anything still in flight from an earlier attempt is
//! recognized as stale and cannot resurrect state.

use crate::agent::AgentSnapshot;
use crate::protocol::{parse_frame, ServerFrame, GENERIC_SERVER_ERROR};
use std::sync::Arc;
use swarmview_env::{EnvError, SimulationId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Message recorded when the stream fails before any frame arrived.
pub const STREAM_FAILED_MESSAGE: &str = "Connection to the simulation stream failed";

/// Lifecycle status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl SessionStatus {
    /// Returns true while a session is being set up or streaming.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Starting | SessionStatus::Running)
    }

    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published state of the client session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// Server-assigned id of the current simulation
    pub session_id: Option<SimulationId>,

    /// Lifecycle status
    pub status: SessionStatus,

    /// Tick of the most recent snapshot/tick frame (0 after a reset)
    pub current_tick: u64,

    /// Agents of the most recent tick, replaced wholesale per frame
    pub agents: Arc<Vec<AgentSnapshot>>,

    /// Message of the last failure, if the session is in `Error`
    pub last_error: Option<String>,
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Snapshot/tick applied to the state
    Applied,

    /// Server ended the session; the stream should be dropped
    Ended,

    /// Server reported an error; the stream is left to close on its own
    Failed,

    /// Unknown, malformed, stale, or arrived in a state that ignores frames
    Ignored,
}

/// Returned by `begin_stop` when there is something to tear down.
#[derive(Debug, Clone, PartialEq)]
pub struct StopTicket {
    /// Server-side simulation to release, if one was created
    pub session_id: Option<SimulationId>,
}

/// The session state machine.
pub struct SessionMachine {
    /// Current state (the only copy that is ever written)
    state: SessionState,

    /// Attempt counter guarding against stale async results
    attempt: u64,

    /// Publisher for readers
    publisher: watch::Sender<SessionState>,
}

impl SessionMachine {
    /// Creates an Idle machine and the first subscriber.
    pub fn new() -> (Self, watch::Receiver<SessionState>) {
        let (publisher, receiver) = watch::channel(SessionState::default());
        let machine = Self {
            state: SessionState::default(),
            attempt: 0,
            publisher,
        };
        (machine, receiver)
    }

    /// Returns the current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns the current status.
    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Returns the current attempt number.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Creates another reader of the published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.publisher.subscribe()
    }

    /// Moves to `Starting` with fresh state and returns the new attempt.
    ///
    /// Callers must have completed a stop first; the previous attempt is
    /// invalidated either way.
    pub fn begin_start(&mut self) -> u64 {
        self.attempt += 1;
        self.state = SessionState {
            status: SessionStatus::Starting,
            ..SessionState::default()
        };
        info!("Session starting (attempt {})", self.attempt);
        self.publish();
        self.attempt
    }

    /// Records the id from a successful creation response.
    ///
    /// Returns false if the response is stale and was discarded.
    pub fn on_created(&mut self, attempt: u64, id: SimulationId) -> bool {
        if !self.is_current(attempt, SessionStatus::Starting) {
            debug!("Discarding stale creation response for {}", id);
            return false;
        }
        info!("Simulation {} created", id);
        self.state.session_id = Some(id);
        self.publish();
        true
    }

    /// Confirms the stream opened for `attempt`, returning the session id.
    pub fn on_stream_opened(&mut self, attempt: u64) -> Option<SimulationId> {
        if !self.is_current(attempt, SessionStatus::Starting) {
            return None;
        }
        self.state.session_id.clone()
    }

    /// Moves a starting session to `Error`.
    ///
    /// Returns false if the failure belongs to a stale attempt.
    pub fn on_start_failed(&mut self, attempt: u64, message: impl Into<String>) -> bool {
        if !self.is_current(attempt, SessionStatus::Starting) {
            return false;
        }
        let message = message.into();
        warn!("Session start failed: {}", message);
        self.state.status = SessionStatus::Error;
        self.state.last_error = Some(message);
        self.publish();
        true
    }

    /// Applies one inbound text frame.
    pub fn on_frame(&mut self, attempt: u64, text: &str) -> FrameOutcome {
        if attempt != self.attempt || !self.state.status.is_active() {
            return FrameOutcome::Ignored;
        }
        let Some(frame) = parse_frame(text) else {
            debug!("Dropping unrecognized frame ({} bytes)", text.len());
            return FrameOutcome::Ignored;
        };

        match frame {
            ServerFrame::Snapshot { tick, agents } | ServerFrame::Tick { tick, agents } => {
                if self.state.status == SessionStatus::Starting {
                    info!("Session running (first tick {})", tick);
                    self.state.status = SessionStatus::Running;
                }
                self.state.current_tick = tick;
                self.state.agents = Arc::new(agents);
                self.publish();
                FrameOutcome::Applied
            }
            ServerFrame::Shutdown => {
                info!("Server ended the session");
                self.reset();
                FrameOutcome::Ended
            }
            ServerFrame::Error { message } => {
                let message = message.unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string());
                warn!("Server reported error: {}", message);
                self.state.status = SessionStatus::Error;
                self.state.last_error = Some(message);
                self.publish();
                FrameOutcome::Failed
            }
        }
    }

    /// Handles the stream ending without a deliberate stop.
    ///
    /// A transport error before the first frame is an `Error`; any other
    /// unexpected close silently returns to `Idle`. An `Error` state reached
    /// through an error frame is kept. Returns true if the state changed.
    pub fn on_stream_closed(&mut self, attempt: u64, error: Option<&EnvError>) -> bool {
        if attempt != self.attempt {
            return false;
        }
        match (self.state.status, error) {
            (SessionStatus::Starting, Some(err)) => {
                warn!("Stream failed before first frame: {}", err);
                self.state.status = SessionStatus::Error;
                self.state.last_error = Some(STREAM_FAILED_MESSAGE.to_string());
                self.publish();
                true
            }
            (SessionStatus::Starting, None) | (SessionStatus::Running, _) => {
                info!("Stream closed unexpectedly, returning to idle");
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Moves to `Stopping` and invalidates in-flight work.
    ///
    /// Returns `None` when already `Idle` (stop is then a no-op).
    pub fn begin_stop(&mut self) -> Option<StopTicket> {
        if self.state.status == SessionStatus::Idle {
            return None;
        }
        self.attempt += 1;
        self.state.status = SessionStatus::Stopping;
        info!("Session stopping");
        self.publish();
        Some(StopTicket {
            session_id: self.state.session_id.clone(),
        })
    }

    /// Completes a stop by resetting to `Idle` defaults.
    pub fn finish_stop(&mut self) {
        self.reset();
    }

    fn is_current(&self, attempt: u64, status: SessionStatus) -> bool {
        attempt == self.attempt && self.state.status == status
    }

    fn reset(&mut self) {
        self.attempt += 1;
        self.state = SessionState::default();
        info!("Session idle");
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_frame(tick: u64, ids: &[&str]) -> String {
        let agents: Vec<AgentSnapshot> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| AgentSnapshot::new(*id, [i as f64, 0.0, 0.0]))
            .collect();
        ServerFrame::tick(tick, agents).to_text()
    }

    fn running_machine() -> (SessionMachine, watch::Receiver<SessionState>, u64) {
        let (mut machine, rx) = SessionMachine::new();
        let attempt = machine.begin_start();
        assert!(machine.on_created(attempt, SimulationId::new("sim-42")));
        assert_eq!(machine.on_stream_opened(attempt), Some(SimulationId::new("sim-42")));
        (machine, rx, attempt)
    }

    #[test]
    fn test_initial_state_is_idle() {
        let (machine, rx) = SessionMachine::new();
        assert_eq!(machine.status(), SessionStatus::Idle);
        assert_eq!(*rx.borrow(), SessionState::default());
    }

    #[test]
    fn test_first_tick_enters_running() {
        let (mut machine, rx, attempt) = running_machine();
        assert_eq!(rx.borrow().status, SessionStatus::Starting);

        let outcome = machine.on_frame(attempt, &tick_frame(1, &["a1", "a2", "a3"]));
        assert_eq!(outcome, FrameOutcome::Applied);

        let state = rx.borrow();
        assert_eq!(state.status, SessionStatus::Running);
        assert_eq!(state.current_tick, 1);
        assert_eq!(state.agents.len(), 3);
        assert_eq!(state.session_id, Some(SimulationId::new("sim-42")));
    }

    #[test]
    fn test_agents_replaced_wholesale() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, &tick_frame(1, &["a1", "a2", "a3"]));
        machine.on_frame(attempt, &tick_frame(2, &["a4"]));

        let state = rx.borrow();
        assert_eq!(state.agents.len(), 1);
        assert_eq!(state.agents[0].id.as_str(), "a4");
    }

    #[test]
    fn test_ordering_snapshot_snapshot_shutdown() {
        let (mut machine, rx, attempt) = running_machine();
        let mut observed_ticks = Vec::new();

        let snapshot = |tick| {
            ServerFrame::Snapshot {
                tick,
                agents: vec![AgentSnapshot::new("a1", [0.0; 3])],
            }
            .to_text()
        };

        machine.on_frame(attempt, &snapshot(1));
        observed_ticks.push(rx.borrow().current_tick);
        machine.on_frame(attempt, &snapshot(2));
        observed_ticks.push(rx.borrow().current_tick);
        let outcome = machine.on_frame(attempt, r#"{"type":"shutdown"}"#);

        assert_eq!(observed_ticks, vec![1, 2]);
        assert_eq!(outcome, FrameOutcome::Ended);
        let state = rx.borrow();
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(state.agents.is_empty());
        assert!(state.session_id.is_none());
        assert_eq!(state.current_tick, 0);
    }

    #[test]
    fn test_error_frame_records_message() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, &tick_frame(1, &["a1"]));
        let outcome = machine.on_frame(attempt, r#"{"type":"error","message":"Simulation not found"}"#);

        assert_eq!(outcome, FrameOutcome::Failed);
        let state = rx.borrow();
        assert_eq!(state.status, SessionStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some("Simulation not found"));
        // still attributable to the server-side session for a later stop
        assert!(state.session_id.is_some());
    }

    #[test]
    fn test_frames_ignored_after_error() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, r#"{"type":"error","message":"boom"}"#);
        assert_eq!(machine.on_frame(attempt, &tick_frame(9, &["a1"])), FrameOutcome::Ignored);
        assert_eq!(rx.borrow().current_tick, 0);
        // the natural close afterwards keeps the error visible
        assert!(!machine.on_stream_closed(attempt, None));
        assert_eq!(rx.borrow().status, SessionStatus::Error);
    }

    #[test]
    fn test_malformed_and_unknown_frames_ignored() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, &tick_frame(4, &["a1"]));
        let before = rx.borrow().clone();

        assert_eq!(machine.on_frame(attempt, "{not json"), FrameOutcome::Ignored);
        assert_eq!(machine.on_frame(attempt, r#"{"type":"telemetry","x":1}"#), FrameOutcome::Ignored);
        assert_eq!(machine.on_frame(attempt, r#"{"type":"tick","agents":[]}"#), FrameOutcome::Ignored);

        assert_eq!(*rx.borrow(), before);
    }

    #[test]
    fn test_unexpected_close_while_running_resets_silently() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, &tick_frame(3, &["a1"]));
        let err = EnvError::stream("connection reset");

        assert!(machine.on_stream_closed(attempt, Some(&err)));
        let state = rx.borrow();
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(state.last_error.is_none());
        assert!(state.session_id.is_none());
    }

    #[test]
    fn test_transport_error_before_first_frame_is_error() {
        let (mut machine, rx, attempt) = running_machine();
        let err = EnvError::stream("handshake reset");

        assert!(machine.on_stream_closed(attempt, Some(&err)));
        let state = rx.borrow();
        assert_eq!(state.status, SessionStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some(STREAM_FAILED_MESSAGE));
    }

    #[test]
    fn test_start_failure_records_error() {
        let (mut machine, rx) = SessionMachine::new();
        let attempt = machine.begin_start();
        assert!(machine.on_start_failed(attempt, "Unsupported mode 'ring'"));

        let state = rx.borrow();
        assert_eq!(state.status, SessionStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some("Unsupported mode 'ring'"));
        assert!(state.session_id.is_none());
    }

    #[test]
    fn test_stop_from_idle_is_noop() {
        let (mut machine, _rx) = SessionMachine::new();
        let attempt = machine.attempt();
        assert!(machine.begin_stop().is_none());
        assert_eq!(machine.attempt(), attempt);
    }

    #[test]
    fn test_stop_resets_to_defaults() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, &tick_frame(7, &["a1", "a2"]));

        let ticket = machine.begin_stop().expect("running session must stop");
        assert_eq!(ticket.session_id, Some(SimulationId::new("sim-42")));
        assert_eq!(rx.borrow().status, SessionStatus::Stopping);

        machine.finish_stop();
        assert_eq!(*rx.borrow(), SessionState::default());
    }

    #[test]
    fn test_stale_creation_response_discarded() {
        let (mut machine, rx) = SessionMachine::new();
        let attempt = machine.begin_start();
        let ticket = machine.begin_stop().unwrap();
        assert!(ticket.session_id.is_none());
        machine.finish_stop();

        assert!(!machine.on_created(attempt, SimulationId::new("late")));
        assert!(!machine.on_start_failed(attempt, "late failure"));
        assert_eq!(machine.on_stream_opened(attempt), None);
        assert_eq!(*rx.borrow(), SessionState::default());
    }

    #[test]
    fn test_frames_from_previous_attempt_ignored() {
        let (mut machine, rx, old_attempt) = running_machine();
        machine.begin_stop();
        machine.finish_stop();

        let attempt = machine.begin_start();
        machine.on_created(attempt, SimulationId::new("sim-43"));

        assert_eq!(machine.on_frame(old_attempt, &tick_frame(5, &["x"])), FrameOutcome::Ignored);
        assert!(!machine.on_stream_closed(old_attempt, None));
        assert_eq!(rx.borrow().status, SessionStatus::Starting);
        assert_eq!(rx.borrow().session_id, Some(SimulationId::new("sim-43")));
    }

    #[test]
    fn test_restart_resets_tick_counter() {
        let (mut machine, rx, attempt) = running_machine();
        machine.on_frame(attempt, &tick_frame(40, &["a1"]));
        machine.begin_stop();
        machine.finish_stop();

        machine.begin_start();
        let state = rx.borrow();
        assert_eq!(state.current_tick, 0);
        assert!(state.agents.is_empty());
        assert_eq!(state.status, SessionStatus::Starting);
    }
}
