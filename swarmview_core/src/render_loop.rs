//! Fixed-rate repaint loop.
//!
//! Reconciliation happens when the published agent set changes; painting
//! happens on a fixed interval regardless of how often ticks arrive.

use crate::agent::AgentSnapshot;
use crate::scene::{ReconcileStats, RenderBackend, SceneReconciler};
use crate::session::{SessionState, SessionStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use swarmview_env::SimulationId;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Default repaint rate.
pub const DEFAULT_FPS: u32 = 60;

/// What a finished render loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// Frames presented
    pub frames: u64,

    /// Reconciliation passes run
    pub reconciles: u64,

    /// Largest pool size seen
    pub peak_objects: usize,

    /// Tick of the last agent set applied
    pub last_tick: u64,

    /// Objects released by the final clear
    pub released_on_exit: usize,
}

/// Drives a `SceneReconciler` from a session state subscription.
pub struct RenderLoop<B: RenderBackend> {
    scene: SceneReconciler<B>,
    fps: u32,
    applied: Option<Arc<Vec<AgentSnapshot>>>,
    applied_session: Option<SimulationId>,
    summary: RenderSummary,
}

impl<B: RenderBackend> RenderLoop<B> {
    pub fn new(scene: SceneReconciler<B>) -> Self {
        Self {
            scene,
            fps: DEFAULT_FPS,
            applied: None,
            applied_session: None,
            summary: RenderSummary::default(),
        }
    }

    /// Sets the repaint rate. Zero is treated as one.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    pub fn scene(&self) -> &SceneReconciler<B> {
        &self.scene
    }

    /// Applies `state` to the scene if its agent set differs from the one
    /// applied last. Returns the pass statistics when a pass ran.
    ///
    /// The pool is emptied first whenever the state belongs to a different
    /// session than the last one applied, or the session is `Idle`. Watch
    /// receivers only see the latest value, so an `Idle` state between two
    /// sessions may never be observed.
    pub fn sync(&mut self, state: &SessionState) -> Option<ReconcileStats> {
        let mut cleared = 0;
        if state.status == SessionStatus::Idle || state.session_id != self.applied_session {
            cleared = self.scene.clear();
            if cleared > 0 {
                debug!("Session changed, released {} objects", cleared);
                self.applied = None;
            }
            self.applied_session = state.session_id.clone();
        }

        if let Some(applied) = &self.applied {
            if Arc::ptr_eq(applied, &state.agents) {
                return None;
            }
        }

        let mut stats = self.scene.reconcile(&state.agents);
        stats.released += cleared;
        self.applied = Some(Arc::clone(&state.agents));
        self.summary.reconciles += 1;
        self.summary.last_tick = state.current_tick;
        self.summary.peak_objects = self.summary.peak_objects.max(self.scene.len());
        Some(stats)
    }

    /// Presents one frame of the current pool.
    pub fn paint(&mut self) {
        self.scene.present();
        self.summary.frames += 1;
    }

    /// Runs until `shutdown` completes or the state publisher goes away.
    /// The pool is cleared on exit.
    pub async fn run<F>(mut self, mut state: watch::Receiver<SessionState>, shutdown: F) -> RenderSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(self.frame_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let initial = state.borrow_and_update().clone();
        self.sync(&initial);
        info!("Render loop started at {} fps", self.fps);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Render loop shutdown requested");
                    break;
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        debug!("Session state publisher dropped");
                        break;
                    }
                    let latest = state.borrow_and_update().clone();
                    self.sync(&latest);
                }
                _ = interval.tick() => self.paint(),
            }
        }

        self.finish()
    }

    /// Clears the pool and returns the summary.
    pub fn finish(mut self) -> RenderSummary {
        self.summary.released_on_exit = self.scene.clear();
        self.applied = None;
        self.applied_session = None;
        info!(
            "Render loop finished: {} frames, {} reconciles, peak {} objects",
            self.summary.frames, self.summary.reconciles, self.summary.peak_objects
        );
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use crate::headless::HeadlessBackend;
    use tokio::sync::oneshot;

    fn state_with(tick: u64, ids: &[&str]) -> SessionState {
        SessionState {
            status: SessionStatus::Running,
            current_tick: tick,
            agents: Arc::new(ids.iter().map(|id| AgentSnapshot::new(*id, [0.0; 3])).collect()),
            ..Default::default()
        }
    }

    fn session_state(session: &str, tick: u64, ids: &[&str]) -> SessionState {
        SessionState {
            session_id: Some(SimulationId::new(session)),
            ..state_with(tick, ids)
        }
    }

    #[test]
    fn test_sync_skips_unchanged_agent_set() {
        let mut render = RenderLoop::new(SceneReconciler::new(HeadlessBackend::new()));
        let mut state = state_with(1, &["a", "b"]);

        assert!(render.sync(&state).is_some());
        // same Arc, different status: no pass
        state.status = SessionStatus::Error;
        assert!(render.sync(&state).is_none());

        let next = state_with(2, &["a"]);
        let stats = render.sync(&next).unwrap();
        assert_eq!(stats.released, 1);
        assert_eq!(render.scene().len(), 1);
    }

    #[test]
    fn test_new_session_never_reuses_objects() {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let mut render = RenderLoop::new(SceneReconciler::new(backend));

        render.sync(&session_state("sim-a", 5, &["0", "1"]));
        let old_handle = *render.scene().handle(&AgentId::from("0")).unwrap();

        // same ids, next session, no Idle in between
        let stats_b = render.sync(&session_state("sim-b", 1, &["0", "1"])).unwrap();
        assert_eq!(stats_b.created, 2);
        assert_eq!(stats_b.released, 2);
        assert_eq!(stats_b.updated, 0);
        assert_ne!(*render.scene().handle(&AgentId::from("0")).unwrap(), old_handle);
        assert_eq!(stats.spawned(), 4);
        assert_eq!(stats.updated(), 0);
        assert_eq!(stats.live(), 2);
    }

    #[test]
    fn test_idle_state_empties_pool() {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let mut render = RenderLoop::new(SceneReconciler::new(backend));

        render.sync(&session_state("sim-a", 3, &["a", "b", "c"]));
        let stats_idle = render.sync(&SessionState::default()).unwrap();
        assert_eq!(stats_idle.released, 3);
        assert!(render.scene().is_empty());
        assert_eq!(stats.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_sessions_release_previous_pool() {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let (tx, rx) = watch::channel(session_state("sim-a", 1, &["0", "1"]));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let render = RenderLoop::new(SceneReconciler::new(backend));
        let task = tokio::spawn(render.run(rx, async move {
            let _ = stop_rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.spawned(), 2);

        // stop and restart land before the loop wakes up
        tx.send_replace(SessionState::default());
        tx.send_replace(session_state("sim-b", 1, &["0", "1"]));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.spawned(), 4);
        assert_eq!(stats.released(), 2);
        assert_eq!(stats.live(), 2);

        let _ = stop_tx.send(());
        let summary = task.await.unwrap();
        assert_eq!(summary.released_on_exit, 2);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn test_zero_fps_clamped() {
        let render = RenderLoop::new(SceneReconciler::new(HeadlessBackend::new())).with_fps(0);
        assert_eq!(render.frame_interval(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paints_independent_of_ticks() {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let (tx, rx) = watch::channel(state_with(1, &["a", "b", "c"]));

        let render = RenderLoop::new(SceneReconciler::new(backend)).with_fps(10);
        let task = tokio::spawn(render.run(rx, tokio::time::sleep(Duration::from_millis(1050))));

        // one agent-set change during a second of painting
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send_replace(state_with(2, &["a", "b"]));

        let summary = task.await.unwrap();
        assert!(summary.frames >= 10, "painted {} frames", summary.frames);
        assert_eq!(summary.reconciles, 2);
        assert_eq!(summary.peak_objects, 3);
        assert_eq!(summary.last_tick, 2);
        assert_eq!(summary.released_on_exit, 2);
        assert_eq!(stats.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_publisher_dropped() {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        let (tx, rx) = watch::channel(state_with(7, &["a"]));

        let render = RenderLoop::new(SceneReconciler::new(backend));
        let task = tokio::spawn(render.run(rx, std::future::pending()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);

        let summary = task.await.unwrap();
        assert_eq!(summary.released_on_exit, 1);
        assert_eq!(stats.live(), 0);
    }
}
