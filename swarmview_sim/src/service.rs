//! In-memory simulation service with fault injection.
//!
//! `ScriptedService` implements both halves of the service interface. Every
//! call is recorded, creation and deletion can be made to fail, creation
//! responses and stream handshakes can be held back, and each connected
//! stream is driven by a `StreamScript` the test controls.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use swarmview_core::ServerFrame;
use swarmview_env::{
    CreateSimulationRequest, CreatedSimulation, EnvError, FrameStream, SimulationApi,
    SimulationId, SimulationSnapshot, SimulationSummary, StreamConnector,
};
use tokio::sync::{mpsc, watch};

/// A call the client made against the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Create(CreateSimulationRequest),
    Delete(SimulationId),
    Connect(SimulationId),
    List,
    Fetch(SimulationId),
    Health,
}

#[derive(Debug)]
struct SimulationRecord {
    request: CreateSimulationRequest,
    tick: u64,
}

#[derive(Default)]
struct ServiceState {
    calls: Vec<ServiceCall>,
    next_serial: u64,
    queued_ids: VecDeque<SimulationId>,
    fail_next_create: Option<EnvError>,
    fail_deletes: bool,
    refuse_connects: bool,
    unhealthy: bool,
    simulations: BTreeMap<SimulationId, SimulationRecord>,
    streams: Vec<StreamScript>,
}

/// Scripted stand-in for the simulation service.
pub struct ScriptedService {
    state: Mutex<ServiceState>,

    /// Creation gate: `true` lets creation calls complete
    create_gate: watch::Sender<bool>,

    /// Handshake gate: `true` lets stream connects complete
    connect_gate: watch::Sender<bool>,

    /// Bumped after every recorded call
    activity: watch::Sender<u64>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedService {
    /// Creates a healthy service that assigns ids `sim-1`, `sim-2`, ...
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState::default()),
            create_gate: watch::Sender::new(true),
            connect_gate: watch::Sender::new(true),
            activity: watch::Sender::new(0),
        }
    }

    /// Creates a service wrapped for sharing with a session driver.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes the next creation return `id` instead of a generated one.
    pub fn queue_id(&self, id: impl Into<SimulationId>) {
        self.state.lock().unwrap().queued_ids.push_back(id.into());
    }

    /// Makes the next creation fail with the given status and server text.
    pub fn fail_next_create(&self, status: u16, message: impl Into<String>) {
        self.state.lock().unwrap().fail_next_create = Some(EnvError::http(status, message));
    }

    /// Makes every deletion fail until turned off.
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    /// Makes every stream connection fail until turned off.
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connects = refuse;
    }

    /// Makes `health` report 503 while false.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().unhealthy = !healthy;
    }

    /// Holds creation responses until `release_creates`.
    pub fn hold_creates(&self) {
        self.create_gate.send_replace(false);
    }

    pub fn release_creates(&self) {
        self.create_gate.send_replace(true);
    }

    /// Holds stream handshakes until `release_connects`. The stream and its
    /// script exist while held; the client only gets the stream on release.
    pub fn hold_connects(&self) {
        self.connect_gate.send_replace(false);
    }

    pub fn release_connects(&self) {
        self.connect_gate.send_replace(true);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn create_count(&self) -> usize {
        self.count(|call| matches!(call, ServiceCall::Create(_)))
    }

    pub fn connect_count(&self) -> usize {
        self.count(|call| matches!(call, ServiceCall::Connect(_)))
    }

    /// Ids passed to `delete`, in order.
    pub fn deleted(&self) -> Vec<SimulationId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ServiceCall::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ids of simulations the service still holds.
    pub fn live_simulations(&self) -> Vec<SimulationId> {
        self.state.lock().unwrap().simulations.keys().cloned().collect()
    }

    /// Script of the most recently connected stream.
    pub fn last_stream(&self) -> Option<StreamScript> {
        self.state.lock().unwrap().streams.last().cloned()
    }

    /// Scripts of every stream connected so far.
    pub fn streams(&self) -> Vec<StreamScript> {
        self.state.lock().unwrap().streams.clone()
    }

    /// Waits until the recorded calls satisfy `condition`.
    pub async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&[ServiceCall]) -> bool,
    {
        let mut activity = self.activity.subscribe();
        loop {
            if condition(&self.state.lock().unwrap().calls) {
                return;
            }
            if activity.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until at least `n` streams have been connected and returns the
    /// `n`th one.
    pub async fn wait_for_stream(&self, n: usize) -> StreamScript {
        let mut activity = self.activity.subscribe();
        loop {
            if let Some(script) = self.state.lock().unwrap().streams.get(n.saturating_sub(1)) {
                return script.clone();
            }
            // the sender lives in `self`, so this only fails after drop
            let _ = activity.changed().await;
        }
    }

    fn count(&self, predicate: impl Fn(&ServiceCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, state: &mut ServiceState, call: ServiceCall) {
        state.calls.push(call);
        self.activity.send_modify(|n| *n += 1);
    }
}

#[async_trait]
impl SimulationApi for ScriptedService {
    async fn create(&self, request: &CreateSimulationRequest) -> Result<CreatedSimulation, EnvError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            self.record(&mut state, ServiceCall::Create(request.clone()));
            match state.fail_next_create.take() {
                Some(err) => Err(err),
                None => {
                    let id = match state.queued_ids.pop_front() {
                        Some(id) => id,
                        None => {
                            state.next_serial += 1;
                            SimulationId::new(format!("sim-{}", state.next_serial))
                        }
                    };
                    state.simulations.insert(
                        id.clone(),
                        SimulationRecord {
                            request: request.clone(),
                            tick: 0,
                        },
                    );
                    Ok(id)
                }
            }
        };

        let mut gate = self.create_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        outcome.map(|id| CreatedSimulation {
            simulation_id: id,
            num_agents: Some(request.num_agents),
            mode: Some(request.mode),
        })
    }

    async fn delete(&self, id: &SimulationId) -> Result<(), EnvError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, ServiceCall::Delete(id.clone()));
        if state.fail_deletes {
            return Err(EnvError::network("Connection refused"));
        }
        match state.simulations.remove(id) {
            Some(_) => Ok(()),
            None => Err(EnvError::http(404, "Simulation not found")),
        }
    }

    async fn list(&self) -> Result<Vec<SimulationSummary>, EnvError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, ServiceCall::List);
        Ok(state
            .simulations
            .iter()
            .map(|(id, record)| SimulationSummary {
                simulation_id: id.clone(),
                num_agents: record.request.num_agents,
                mode: record.request.mode,
                tick: record.tick,
            })
            .collect())
    }

    async fn fetch(&self, id: &SimulationId) -> Result<SimulationSnapshot, EnvError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, ServiceCall::Fetch(id.clone()));
        let record = state
            .simulations
            .get(id)
            .ok_or_else(|| EnvError::http(404, "Simulation not found"))?;
        Ok(SimulationSnapshot {
            simulation_id: id.clone(),
            tick: record.tick,
            params: serde_json::to_value(&record.request)?,
            agents: Vec::new(),
        })
    }

    async fn health(&self) -> Result<(), EnvError> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, ServiceCall::Health);
        if state.unhealthy {
            Err(EnvError::http(503, "Service unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StreamConnector for ScriptedService {
    async fn connect(&self, id: &SimulationId) -> Result<Box<dyn FrameStream>, EnvError> {
        let stream = {
            let mut state = self.state.lock().unwrap();
            if state.refuse_connects {
                self.record(&mut state, ServiceCall::Connect(id.clone()));
                return Err(EnvError::stream("Connection refused"));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let script = StreamScript {
                simulation_id: id.clone(),
                tx,
                close_code: Arc::new(Mutex::new(None)),
            };
            let stream = ScriptedStream {
                rx,
                close_code: Arc::clone(&script.close_code),
                closed: false,
            };
            state.streams.push(script);
            self.record(&mut state, ServiceCall::Connect(id.clone()));
            stream
        };

        // dropping this future while held drops the stream with it
        let mut gate = self.connect_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        Ok(Box::new(stream))
    }
}

#[derive(Debug)]
enum ScriptEvent {
    Text(String),
    Drop,
    Fail(String),
}

/// Server side of one scripted stream.
#[derive(Debug, Clone)]
pub struct StreamScript {
    simulation_id: SimulationId,
    tx: mpsc::UnboundedSender<ScriptEvent>,
    close_code: Arc<Mutex<Option<u16>>>,
}

impl StreamScript {
    pub fn simulation_id(&self) -> &SimulationId {
        &self.simulation_id
    }

    /// Sends a frame.
    pub fn push(&self, frame: &ServerFrame) {
        self.push_text(frame.to_text());
    }

    /// Sends raw text, which need not be a valid frame.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(ScriptEvent::Text(text.into()));
    }

    /// Closes the connection from the server side without a frame.
    pub fn drop_connection(&self) {
        let _ = self.tx.send(ScriptEvent::Drop);
    }

    /// Fails the connection with a transport error.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(ScriptEvent::Fail(message.into()));
    }

    /// Close code the client sent, if it closed the stream.
    pub fn close_code(&self) -> Option<u16> {
        *self.close_code.lock().unwrap()
    }

    /// True once the client side of the stream has been dropped.
    pub fn is_released(&self) -> bool {
        self.tx.is_closed()
    }

    /// Waits until the client drops its side of the stream.
    pub async fn wait_released(&self) {
        self.tx.closed().await
    }

    /// Sends a snapshot frame built from JSON agent records.
    pub fn push_snapshot(&self, tick: u64, agents: serde_json::Value) {
        self.push_text(json!({ "type": "snapshot", "tick": tick, "agents": agents }).to_string());
    }
}

/// Client side of one scripted stream.
struct ScriptedStream {
    rx: mpsc::UnboundedReceiver<ScriptEvent>,
    close_code: Arc<Mutex<Option<u16>>>,
    closed: bool,
}

#[async_trait]
impl FrameStream for ScriptedStream {
    async fn next_frame(&mut self) -> Option<Result<String, EnvError>> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(ScriptEvent::Text(text)) => Some(Ok(text)),
            Some(ScriptEvent::Fail(message)) => {
                self.closed = true;
                Some(Err(EnvError::stream(message)))
            }
            Some(ScriptEvent::Drop) | None => {
                self.closed = true;
                None
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), EnvError> {
        self.closed = true;
        *self.close_code.lock().unwrap() = Some(code);
        Ok(())
    }
}
