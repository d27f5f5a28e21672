//! Session driver - the event loop that owns the `SessionMachine`.
//!
//! The driver is one task that multiplexes user commands, the pending
//! creation call, the pending stream handshake, and inbound frames. It is
//! the only place the machine is mutated, so no locking is involved.
//!
//! # Usage
//!
//! ```ignore
//! use swarmview_core::{SessionDriver, RunConfig};
//!
//! let (driver, handle) = SessionDriver::new(api, connector);
//! tokio::spawn(driver.run());
//!
//! handle.start(RunConfig::default()).await?;
//! let mut state = handle.subscribe();
//! // ...
//! handle.stop().await?;
//! ```

use crate::config::RunConfig;
use crate::error::SessionError;
use crate::session::{FrameOutcome, SessionMachine, SessionState, StopTicket};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use swarmview_env::{
    CreatedSimulation, EnvError, FrameStream, SimulationApi, SimulationId, StreamConnector,
    NORMAL_CLOSURE,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the command queue between handles and the driver.
const COMMAND_QUEUE: usize = 32;

/// Result of a `start` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was created and its stream is open
    Started(SimulationId),

    /// A session was already starting or running; nothing was done
    AlreadyActive,
}

type StartReply = oneshot::Sender<Result<StartOutcome, SessionError>>;
type PendingCreate = BoxFuture<'static, Result<CreatedSimulation, EnvError>>;
type PendingConnect = BoxFuture<'static, Result<Box<dyn FrameStream>, EnvError>>;

enum Command {
    Start { config: RunConfig, reply: StartReply },
    Stop { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Event {
    Command(Command),
    HandlesDropped,
    Created(u64, Result<CreatedSimulation, EnvError>),
    Connected(u64, Result<Box<dyn FrameStream>, EnvError>),
    Frame(u64, Option<Result<String, EnvError>>),
}

/// Cloneable front end to a running `SessionDriver`.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Starts a session.
    ///
    /// Resolves once the stream handshake completes, or with the failure
    /// that put the session into `Error`. A call while a session is starting
    /// or running returns `AlreadyActive` without touching it.
    pub async fn start(&self, config: RunConfig) -> Result<StartOutcome, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start { config, reply })
            .await
            .map_err(|_| SessionError::DriverClosed)?;
        response.await.map_err(|_| SessionError::DriverClosed)?
    }

    /// Stops the session and waits until the state is back to `Idle`.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .await
            .map_err(|_| SessionError::DriverClosed)?;
        response.await.map_err(|_| SessionError::DriverClosed)
    }

    /// Stops the session and terminates the driver.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = response.await;
        }
    }

    /// Subscribes to published state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Returns a copy of the latest published state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

/// Owns the session machine and everything that feeds it.
///
/// Generic over the API and stream implementations, so the same driver
/// runs against the production service or the scripted one.
pub struct SessionDriver<Api, Conn>
where
    Api: SimulationApi,
    Conn: StreamConnector,
{
    /// Request/response side of the service
    api: Arc<Api>,

    /// Stream side of the service
    connector: Arc<Conn>,

    /// State machine (single writer)
    machine: SessionMachine,

    /// Commands from handles
    commands: mpsc::Receiver<Command>,

    /// In-flight creation call, tagged with its attempt
    pending_create: Option<(u64, PendingCreate)>,

    /// In-flight stream handshake, tagged with its attempt
    pending_connect: Option<(u64, PendingConnect)>,

    /// The open stream, tagged with its attempt
    stream: Option<(u64, Box<dyn FrameStream>)>,

    /// Caller waiting on the current start sequence
    start_reply: Option<StartReply>,
}

impl<Api, Conn> SessionDriver<Api, Conn>
where
    Api: SimulationApi,
    Conn: StreamConnector,
{
    /// Creates a driver and its first handle.
    pub fn new(api: Arc<Api>, connector: Arc<Conn>) -> (Self, SessionHandle) {
        let (machine, state) = SessionMachine::new();
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE);

        let driver = Self {
            api,
            connector,
            machine,
            commands,
            pending_create: None,
            pending_connect: None,
            stream: None,
            start_reply: None,
        };
        (driver, SessionHandle { commands: tx, state })
    }

    /// Spawns the driver on the current Tokio runtime.
    pub fn spawn(api: Arc<Api>, connector: Arc<Conn>) -> (SessionHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(api, connector);
        (handle, tokio::spawn(driver.run()))
    }

    /// Runs until `shutdown` is requested or every handle is dropped.
    ///
    /// Either way the session is stopped before returning.
    pub async fn run(mut self) {
        debug!("Session driver started");
        loop {
            let event = tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::HandlesDropped,
                },
                (attempt, result) = poll_pending(&mut self.pending_create) => {
                    Event::Created(attempt, result)
                }
                (attempt, result) = poll_pending(&mut self.pending_connect) => {
                    Event::Connected(attempt, result)
                }
                (attempt, frame) = next_frame(&mut self.stream) => Event::Frame(attempt, frame),
            };

            match event {
                Event::Command(Command::Start { config, reply }) => {
                    self.handle_start(config, reply).await;
                }
                Event::Command(Command::Stop { reply }) => {
                    self.stop().await;
                    let _ = reply.send(());
                }
                Event::Command(Command::Shutdown { reply }) => {
                    self.stop().await;
                    let _ = reply.send(());
                    break;
                }
                Event::HandlesDropped => {
                    self.stop().await;
                    break;
                }
                Event::Created(attempt, result) => self.handle_created(attempt, result),
                Event::Connected(attempt, result) => self.handle_connected(attempt, result),
                Event::Frame(attempt, frame) => self.handle_frame(attempt, frame),
            }
        }
        debug!("Session driver stopped");
    }

    async fn handle_start(&mut self, config: RunConfig, reply: StartReply) {
        if let Err(err) = config.validate() {
            let _ = reply.send(Err(err.into()));
            return;
        }
        if self.machine.status().is_active() {
            debug!("Start ignored: session already {}", self.machine.status());
            let _ = reply.send(Ok(StartOutcome::AlreadyActive));
            return;
        }

        // at most one live session: tear down whatever is left first
        self.stop().await;

        let attempt = self.machine.begin_start();
        let api = Arc::clone(&self.api);
        let request = config.to_request();
        info!(
            "Creating simulation: {} agents, mode={}, timestep={}, interval={}",
            request.num_agents, request.mode, request.timestep, request.update_interval
        );
        self.pending_create = Some((attempt, Box::pin(async move { api.create(&request).await })));
        self.start_reply = Some(reply);
    }

    fn handle_created(&mut self, attempt: u64, result: Result<CreatedSimulation, EnvError>) {
        self.pending_create = None;
        match result {
            Ok(created) => {
                let id = created.simulation_id;
                if !self.machine.on_created(attempt, id.clone()) {
                    self.reap_orphan(id);
                    return;
                }
                let connector = Arc::clone(&self.connector);
                self.pending_connect = Some((
                    attempt,
                    Box::pin(async move { connector.connect(&id).await }),
                ));
            }
            Err(err) => {
                if self.machine.on_start_failed(attempt, err.to_string()) {
                    self.reply_start(Err(SessionError::Request(err)));
                }
            }
        }
    }

    fn handle_connected(&mut self, attempt: u64, result: Result<Box<dyn FrameStream>, EnvError>) {
        self.pending_connect = None;
        match result {
            Ok(stream) => match self.machine.on_stream_opened(attempt) {
                Some(id) => {
                    self.stream = Some((attempt, stream));
                    self.reply_start(Ok(StartOutcome::Started(id)));
                }
                None => debug!("Dropping stream of stale attempt {}", attempt),
            },
            Err(err) => {
                let failed = self
                    .machine
                    .on_start_failed(attempt, crate::session::STREAM_FAILED_MESSAGE);
                if failed {
                    self.reply_start(Err(SessionError::Stream(err.to_string())));
                }
            }
        }
    }

    fn handle_frame(&mut self, attempt: u64, frame: Option<Result<String, EnvError>>) {
        match frame {
            Some(Ok(text)) => {
                if self.machine.on_frame(attempt, &text) == FrameOutcome::Ended {
                    self.stream = None;
                }
            }
            // state first, so a dropped stream implies the close was applied
            Some(Err(err)) => {
                warn!("Stream transport error: {}", err);
                self.machine.on_stream_closed(attempt, Some(&err));
                self.stream = None;
            }
            None => {
                debug!("Stream closed by server");
                self.machine.on_stream_closed(attempt, None);
                self.stream = None;
            }
        }
    }

    /// Full stop: discard in-flight work, close the stream, release the
    /// server-side simulation (best effort), reset to `Idle`.
    async fn stop(&mut self) {
        let Some(StopTicket { session_id }) = self.machine.begin_stop() else {
            return;
        };

        if let Some((_, create)) = self.pending_create.take() {
            self.reap_pending_create(create);
        }
        self.pending_connect = None;
        self.reply_start(Err(SessionError::Cancelled));

        if let Some((_, mut stream)) = self.stream.take() {
            if let Err(err) = stream.close(NORMAL_CLOSURE).await {
                warn!("Failed to close stream cleanly: {}", err);
            }
        }

        if let Some(id) = session_id {
            if let Err(err) = self.api.delete(&id).await {
                warn!("Failed to release simulation {}: {}", id, err);
            } else {
                debug!("Released simulation {}", id);
            }
        }

        self.machine.finish_stop();
    }

    fn reply_start(&mut self, result: Result<StartOutcome, SessionError>) {
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(result);
        }
    }

    /// Lets a cancelled creation call finish in the background and releases
    /// whatever it created. The session state is never touched.
    fn reap_pending_create(&self, create: PendingCreate) {
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Ok(created) = create.await {
                release_orphan(api.as_ref(), &created.simulation_id).await;
            }
        });
    }

    fn reap_orphan(&self, id: SimulationId) {
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            release_orphan(api.as_ref(), &id).await;
        });
    }
}

async fn release_orphan<Api: SimulationApi>(api: &Api, id: &SimulationId) {
    info!("Releasing orphaned simulation {}", id);
    if let Err(err) = api.delete(id).await {
        warn!("Failed to release orphaned simulation {}: {}", id, err);
    }
}

async fn poll_pending<T>(slot: &mut Option<(u64, BoxFuture<'static, T>)>) -> (u64, T) {
    match slot.as_mut() {
        Some((attempt, future)) => {
            let output = future.await;
            (*attempt, output)
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(
    stream: &mut Option<(u64, Box<dyn FrameStream>)>,
) -> (u64, Option<Result<String, EnvError>>) {
    match stream.as_mut() {
        Some((attempt, stream)) => {
            let frame = stream.next_frame().await;
            (*attempt, frame)
        }
        None => std::future::pending().await,
    }
}
