//! Scenario runner - drives the real session driver and render loop against
//! the scripted service and checks the lifecycle invariants along the way.

use crate::scenarios::ScenarioId;
use crate::service::{ScriptedService, StreamScript};
use crate::ticks::TickSource;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use swarmview_core::{
    AgentId, HeadlessBackend, HeadlessStats, RenderLoop, RunConfig, SceneReconciler,
    ServerFrame, SessionDriver, SessionError, SessionHandle, SessionState, SessionStatus,
    StartOutcome,
};
use swarmview_env::{MotionMode, SimulationId, NORMAL_CLOSURE};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a scenario waits for the driver to reach an expected state.
const STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Message the service returns for a rejected creation.
const REJECTION_MESSAGE: &str = "num_agents must be between 1 and 500";

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Tick frames pushed to the client
    pub total_ticks: u64,

    /// Session status when the scenario ended
    pub final_status: String,

    /// Render objects left after the final reconciliation
    pub final_object_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Reconciliation passes that ran
    pub reconciles: u64,

    /// Frames presented
    pub frames_presented: u64,

    /// Render objects created
    pub objects_spawned: u64,

    /// Render objects released
    pub objects_released: u64,

    /// Largest pool size observed
    pub peak_objects: usize,

    /// Calls the client made against the service
    pub service_calls: usize,

    /// Simulations deleted
    pub deletes: usize,
}

/// Runs lifecycle scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of agents in the initial set
    num_agents: u32,

    /// Tick frames per streaming phase
    ticks: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_agents: u32) -> Self {
        Self {
            seed,
            num_agents: num_agents.clamp(1, swarmview_core::MAX_AGENTS),
            ticks: 30,
        }
    }

    /// Sets the number of ticks streamed per phase.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut harness = Harness::new(self.seed);
        let outcome = match scenario {
            ScenarioId::SteadyStream => self.run_steady_stream(&mut harness).await,
            ScenarioId::AgentChurn => self.run_agent_churn(&mut harness).await,
            ScenarioId::ServerShutdown => self.run_server_shutdown(&mut harness).await,
            ScenarioId::NetworkDrop => self.run_network_drop(&mut harness).await,
            ScenarioId::ErrorFrame => self.run_error_frame(&mut harness).await,
            ScenarioId::StaleCreate => self.run_stale_create(&mut harness).await,
            ScenarioId::Restart => self.run_restart(&mut harness).await,
            ScenarioId::CreateFailure => self.run_create_failure(&mut harness).await,
        };

        let result = harness.finish(scenario, self.seed, outcome).await;
        if let Some(reason) = &result.failure_reason {
            warn!("{} (seed={}) broke an invariant: {}", scenario.name(), self.seed, reason);
        }
        result
    }

    fn config(&self) -> RunConfig {
        RunConfig::new(self.num_agents, MotionMode::Swarm)
    }

    /// SV-001: start, stream, stop.
    async fn run_steady_stream(&self, h: &mut Harness) -> Result<(), String> {
        let mut ticks = TickSource::new(self.seed, self.num_agents);
        let (id, script) = h.start(self.config()).await?;
        h.stream(&script, &mut ticks, self.ticks).await?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        h.expect_idle()?;
        ensure(
            script.close_code() == Some(NORMAL_CLOSURE),
            "stream was not closed with normal closure",
        )?;
        ensure(h.service.deleted() == vec![id], "simulation was not deleted exactly once")?;
        h.sync_and_check()
    }

    /// SV-002: agents spawn and despawn; pool identity must follow ids.
    async fn run_agent_churn(&self, h: &mut Harness) -> Result<(), String> {
        let mut ticks = TickSource::new(self.seed, self.num_agents)
            .with_churn(0.15, self.num_agents as f64 * 0.15)
            .with_still_fraction(0.2);
        let (_, script) = h.start(self.config()).await?;
        h.stream(&script, &mut ticks, self.ticks).await?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        h.expect_idle()?;
        h.sync_and_check()
    }

    /// SV-003: shutdown frame resets the session.
    async fn run_server_shutdown(&self, h: &mut Harness) -> Result<(), String> {
        let mut ticks = TickSource::new(self.seed, self.num_agents);
        let (_, script) = h.start(self.config()).await?;
        h.stream(&script, &mut ticks, self.ticks).await?;

        script.push(&ServerFrame::Shutdown);
        h.wait_for("Idle after shutdown", |s| s.status == SessionStatus::Idle)
            .await?;
        h.expect_idle()?;
        ensure(h.service.deleted().is_empty(), "shutdown should not trigger a delete")?;
        h.sync_and_check()?;
        ensure(h.render.scene().is_empty(), "scene not emptied after shutdown")
    }

    /// SV-004: the connection drops without a frame.
    async fn run_network_drop(&self, h: &mut Harness) -> Result<(), String> {
        let mut ticks = TickSource::new(self.seed, self.num_agents);
        let (_, script) = h.start(self.config()).await?;
        h.stream(&script, &mut ticks, self.ticks / 2).await?;

        script.drop_connection();
        h.wait_for("Idle after drop", |s| s.status == SessionStatus::Idle)
            .await?;
        h.expect_idle()?;
        ensure(h.service.deleted().is_empty(), "dropped stream should not trigger a delete")?;
        ensure(h.service.connect_count() == 1, "client reconnected")?;
        h.sync_and_check()
    }

    /// SV-005: error frame.
    async fn run_error_frame(&self, h: &mut Harness) -> Result<(), String> {
        let message = "Simulation step failed";
        let mut ticks = TickSource::new(self.seed, self.num_agents);
        let (id, script) = h.start(self.config()).await?;
        h.stream(&script, &mut ticks, self.ticks / 2).await?;

        script.push(&ServerFrame::error(message));
        let state = h
            .wait_for("Error after error frame", |s| s.status == SessionStatus::Error)
            .await?;
        ensure(
            state.last_error.as_deref() == Some(message),
            "error message not surfaced verbatim",
        )?;

        // a late tick and then the close; Error must stick through both
        script.push(&ticks.next_frame());
        script.drop_connection();
        tokio::time::timeout(STATE_TIMEOUT, script.wait_released())
            .await
            .map_err(|_| "closed stream was never released".to_string())?;
        let state = h.state();
        ensure(state.status == SessionStatus::Error, "Error did not stick")?;
        ensure(
            state.last_error.as_deref() == Some(message),
            "error message changed after close",
        )?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        h.expect_idle()?;
        ensure(h.service.deleted() == vec![id], "errored simulation was not deleted")?;
        h.sync_and_check()
    }

    /// SV-006: stop during creation, late response arrives afterwards.
    async fn run_stale_create(&self, h: &mut Harness) -> Result<(), String> {
        h.service.hold_creates();
        let handle = h.handle.clone();
        let config = self.config();
        let pending = tokio::spawn(async move { handle.start(config).await });

        h.service
            .wait_until(|calls| !calls.is_empty())
            .await;
        h.wait_for("Starting", |s| s.status == SessionStatus::Starting)
            .await?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        let start = pending.await.map_err(|e| e.to_string())?;
        ensure(
            matches!(start, Err(SessionError::Cancelled)),
            "pending start was not cancelled",
        )?;
        h.expect_idle()?;

        h.service.release_creates();
        h.service
            .wait_until(|calls| {
                calls
                    .iter()
                    .any(|call| matches!(call, crate::service::ServiceCall::Delete(_)))
            })
            .await;

        ensure(h.service.connect_count() == 0, "stale creation opened a stream")?;
        ensure(h.service.live_simulations().is_empty(), "orphaned simulation not reaped")?;
        h.expect_idle()?;
        h.sync_and_check()
    }

    /// SV-007: start twice with a full stop in between.
    async fn run_restart(&self, h: &mut Harness) -> Result<(), String> {
        let mut first_ticks = TickSource::new(self.seed, self.num_agents);
        let (first_id, first) = h.start(self.config()).await?;
        h.stream(&first, &mut first_ticks, self.ticks / 2).await?;

        let again = h
            .handle
            .start(self.config())
            .await
            .map_err(|e| e.to_string())?;
        ensure(again == StartOutcome::AlreadyActive, "second start was not a no-op")?;
        ensure(h.service.create_count() == 1, "duplicate creation call")?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        h.expect_idle()?;
        h.sync_and_check()?;

        let mut second_ticks = TickSource::new(self.seed.wrapping_add(1), self.num_agents);
        let (second_id, second) = h.start(self.config()).await?;
        ensure(first_id != second_id, "restart reused the simulation id")?;
        ensure(
            first.close_code() == Some(NORMAL_CLOSURE),
            "first stream not closed",
        )?;
        h.stream(&second, &mut second_ticks, self.ticks / 2).await?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        ensure(
            h.service.deleted() == vec![first_id, second_id],
            "both simulations should be deleted in order",
        )?;
        h.sync_and_check()
    }

    /// SV-008: creation rejected by the service.
    async fn run_create_failure(&self, h: &mut Harness) -> Result<(), String> {
        h.service.fail_next_create(422, REJECTION_MESSAGE);

        let result = h.handle.start(self.config()).await;
        match result {
            Err(SessionError::Request(err)) => ensure(
                err.to_string() == REJECTION_MESSAGE,
                "start error does not carry the server message",
            )?,
            other => return Err(format!("unexpected start result: {:?}", other)),
        }

        let state = h.state();
        ensure(state.status == SessionStatus::Error, "status is not Error")?;
        ensure(
            state.last_error.as_deref() == Some(REJECTION_MESSAGE),
            "lastError is not the server message",
        )?;
        ensure(state.session_id.is_none(), "session id set after failed creation")?;
        ensure(h.service.connect_count() == 0, "stream opened after failed creation")?;

        h.handle.stop().await.map_err(|e| e.to_string())?;
        h.expect_idle()?;
        ensure(h.service.deleted().is_empty(), "nothing to delete after failed creation")?;
        h.sync_and_check()
    }
}

/// One driver, one scripted service, one headless render loop.
struct Harness {
    service: Arc<ScriptedService>,
    handle: SessionHandle,
    driver: JoinHandle<()>,
    state: watch::Receiver<SessionState>,
    render: RenderLoop<HeadlessBackend>,
    stats: Arc<HeadlessStats>,
    handles: HashMap<AgentId, u64>,
    ticks_pushed: u64,
}

impl Harness {
    fn new(seed: u64) -> Self {
        let service = ScriptedService::shared();
        // deterministic, distinct ids per seed
        service.queue_id(SimulationId::new(format!("sim-{}-a", seed)));
        service.queue_id(SimulationId::new(format!("sim-{}-b", seed)));

        let (handle, driver) = SessionDriver::spawn(Arc::clone(&service), Arc::clone(&service));
        let backend = HeadlessBackend::new();
        let stats = backend.stats();

        Self {
            state: handle.subscribe(),
            service,
            handle,
            driver,
            render: RenderLoop::new(SceneReconciler::new(backend)),
            stats,
            handles: HashMap::new(),
            ticks_pushed: 0,
        }
    }

    fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Starts a session and returns its id with the script of its stream.
    async fn start(&mut self, config: RunConfig) -> Result<(SimulationId, StreamScript), String> {
        let streams_before = self.service.streams().len();
        match self.handle.start(config).await {
            Ok(StartOutcome::Started(id)) => {
                let script = self.service.wait_for_stream(streams_before + 1).await;
                ensure(script.simulation_id() == &id, "stream opened for the wrong simulation")?;
                let state = self.state();
                ensure(state.status == SessionStatus::Starting, "not Starting before first frame")?;
                ensure(state.session_id.as_ref() == Some(&id), "session id not recorded")?;
                Ok((id, script))
            }
            Ok(StartOutcome::AlreadyActive) => Err("session unexpectedly active".to_string()),
            Err(err) => Err(format!("start failed: {}", err)),
        }
    }

    /// Pushes a snapshot followed by `count` ticks, reconciling after each.
    async fn stream(
        &mut self,
        script: &StreamScript,
        ticks: &mut TickSource,
        count: u64,
    ) -> Result<(), String> {
        script.push(&ticks.snapshot());
        self.wait_for("Running after snapshot", |s| s.status == SessionStatus::Running)
            .await?;
        self.sync_and_check()?;

        for _ in 0..count {
            let frame = ticks.next_frame();
            let expected = ticks.tick();
            script.push(&frame);
            self.wait_for("tick", move |s| s.current_tick == expected)
                .await?;
            self.sync_and_check()?;
            self.render.paint();
            self.ticks_pushed += 1;
        }
        debug!("Streamed {} ticks, {} objects live", count, self.render.scene().len());
        Ok(())
    }

    async fn wait_for<F>(&mut self, what: &str, condition: F) -> Result<SessionState, String>
    where
        F: FnMut(&SessionState) -> bool,
    {
        match tokio::time::timeout(STATE_TIMEOUT, self.state.wait_for(condition)).await {
            Ok(Ok(state)) => Ok(state.clone()),
            Ok(Err(_)) => Err(format!("driver stopped while waiting for {}", what)),
            Err(_) => Err(format!("timed out waiting for {}", what)),
        }
    }

    fn expect_idle(&self) -> Result<(), String> {
        let state = self.state();
        ensure(state.status == SessionStatus::Idle, "status is not Idle")?;
        ensure(state.session_id.is_none(), "session id survived reset")?;
        ensure(state.agents.is_empty(), "agents survived reset")?;
        ensure(state.current_tick == 0, "tick survived reset")?;
        ensure(state.last_error.is_none(), "error survived reset")
    }

    /// Reconciles the latest state and checks the pool against it.
    fn sync_and_check(&mut self) -> Result<(), String> {
        let state = self.state();
        self.render.sync(&state);

        let expected: HashSet<&AgentId> = state.agents.iter().map(|a| &a.id).collect();
        let scene = self.render.scene();
        let actual: HashSet<&AgentId> = scene.ids().collect();
        ensure(actual == expected, "render pool keys differ from agent ids")?;
        ensure(
            self.stats.live() == scene.len(),
            "backend live handles differ from pool size",
        )?;

        let mut handles = HashMap::with_capacity(scene.len());
        for id in scene.ids() {
            let handle = *scene.handle(id).ok_or("pool entry without handle")?;
            if let Some(previous) = self.handles.get(id) {
                ensure(*previous == handle, "recurring id lost its render object")?;
            }
            handles.insert(id.clone(), handle);
        }
        self.handles = handles;
        Ok(())
    }

    async fn finish(
        self,
        scenario: ScenarioId,
        seed: u64,
        outcome: Result<(), String>,
    ) -> ScenarioResult {
        let final_status = self.state().status.to_string();
        let final_object_count = self.render.scene().len();

        self.handle.shutdown().await;
        let _ = self.driver.await;
        let summary = self.render.finish();

        let metrics = ScenarioMetrics {
            reconciles: summary.reconciles,
            frames_presented: summary.frames,
            objects_spawned: self.stats.spawned(),
            objects_released: self.stats.released(),
            peak_objects: summary.peak_objects,
            service_calls: self.service.calls().len(),
            deletes: self.service.deleted().len(),
        };

        let outcome = outcome.and_then(|_| {
            ensure(self.stats.live() == 0, "render objects leaked after teardown")
        });

        ScenarioResult {
            scenario,
            seed,
            passed: outcome.is_ok(),
            total_ticks: self.ticks_pushed,
            final_status,
            final_object_count,
            failure_reason: outcome.err(),
            metrics,
        }
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}
