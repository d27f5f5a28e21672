//! SwarmView Viewer - live client for the simulation service
//!
//! `run` starts a session, renders it until Ctrl-C, the duration runs out,
//! or the session ends, and always tears the session down on the way out.
//! `list`, `inspect`, and `health` query the service directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use swarmview_core::{
    HeadlessBackend, RenderBackend, RenderLoop, RenderSummary, RunConfig, SceneReconciler,
    SessionDriver, SessionHandle, SessionStatus, StartOutcome, DEFAULT_FPS,
};
use swarmview_env::{
    EndpointConfig, HttpSimulationApi, MotionMode, SimulationApi, SimulationId,
    WsStreamConnector,
};
use tokio::sync::oneshot;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// SwarmView live viewer
#[derive(Parser, Debug)]
#[command(name = "swarmview")]
#[command(about = "Watch multi-agent simulations live", long_about = None)]
struct Cli {
    /// Service base URL (overrides SWARMVIEW_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Stream base URL (overrides SWARMVIEW_WS_URL)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a simulation and render it live
    Run(RunArgs),

    /// List the simulations the service holds
    List,

    /// Print the current snapshot of one simulation as JSON
    Inspect {
        /// Simulation id
        id: String,
    },

    /// Check that the service is up
    Health,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Number of agents (1-500)
    #[arg(short, long, default_value = "20")]
    agents: u32,

    /// Motion model (swarm, torus, hpp, dpp)
    #[arg(short, long, default_value = "swarm")]
    mode: MotionMode,

    /// Simulation timestep in seconds
    #[arg(long, default_value = "0.1")]
    timestep: f64,

    /// Seconds between streamed ticks
    #[arg(long, default_value = "0.1")]
    update_interval: f64,

    /// Count frames instead of drawing them
    #[arg(long)]
    headless: bool,

    /// Write the Rerun recording to this .rrd file instead of spawning a viewer
    #[arg(long, value_name = "PATH")]
    save: Option<String>,

    /// Repaint rate
    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut endpoints = match cli.api_url {
        Some(api_url) => EndpointConfig::new(api_url),
        None => EndpointConfig::from_env(),
    };
    if let Some(ws_url) = cli.ws_url {
        endpoints = endpoints.with_ws_base_url(ws_url);
    }

    match cli.command {
        Command::Run(args) => run(endpoints, args).await,
        Command::List => list(endpoints).await,
        Command::Inspect { id } => inspect(endpoints, &id).await,
        Command::Health => health(endpoints).await,
    }
}

async fn run(endpoints: EndpointConfig, args: RunArgs) -> Result<()> {
    let config = RunConfig::new(args.agents, args.mode)
        .with_timestep(args.timestep)
        .with_update_interval(args.update_interval);
    config.validate()?;

    info!("SwarmView Viewer v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("Service: {}", endpoints.api_base_url);

    let api = HttpSimulationApi::shared(endpoints.clone())?;
    let connector = WsStreamConnector::shared(endpoints);
    let (handle, driver) = SessionDriver::spawn(api, connector);

    let result = match handle.start(config).await {
        Ok(StartOutcome::Started(id)) => {
            info!("Streaming simulation {}", id);
            render(&handle, &args).await
        }
        Ok(StartOutcome::AlreadyActive) => Err(anyhow::anyhow!("A session is already active")),
        Err(err) => Err(anyhow::Error::new(err).context("Failed to start simulation")),
    };

    handle.shutdown().await;
    let _ = driver.await;
    result
}

async fn render(handle: &SessionHandle, args: &RunArgs) -> Result<()> {
    #[cfg(feature = "visualization")]
    {
        if !args.headless {
            let backend = match &args.save {
                Some(path) => {
                    info!("Recording to {}", path);
                    swarmview_core::RerunBackend::new_to_file("swarmview", path)
                        .map_err(|e| anyhow::anyhow!("Failed to open recording {}: {}", path, e))?
                }
                None => swarmview_core::RerunBackend::new("swarmview")
                    .map_err(|e| anyhow::anyhow!("Failed to start Rerun viewer: {}", e))?,
            };
            return render_with(backend, handle, args).await;
        }
    }

    #[cfg(not(feature = "visualization"))]
    {
        if !args.headless || args.save.is_some() {
            warn!("Built without the 'visualization' feature; rendering headless");
        }
    }

    let backend = HeadlessBackend::new();
    let stats = backend.stats();
    render_with(backend, handle, args).await?;
    info!(
        "Headless render: {} frames, {} spawned, {} released",
        stats.frames(),
        stats.spawned(),
        stats.released()
    );
    Ok(())
}

/// Runs the render loop until Ctrl-C, the duration expires, or the session
/// leaves Starting/Running; then stops the session.
async fn render_with<B>(backend: B, handle: &SessionHandle, args: &RunArgs) -> Result<()>
where
    B: RenderBackend + Send + 'static,
    B::Handle: Send,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let render = RenderLoop::new(SceneReconciler::new(backend)).with_fps(args.fps);
    let render_task = tokio::spawn(render.run(handle.subscribe(), async move {
        let _ = stop_rx.await;
    }));

    let mut state = handle.subscribe();
    let session_ended = state.wait_for(|s| !s.status.is_active());
    let deadline = async {
        match args.duration {
            Some(secs) if secs > 0.0 => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
            _ => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping session"),
        _ = deadline => info!("Duration elapsed, stopping session"),
        _ = session_ended => info!("Session ended by the service"),
    }

    let last = handle.state();
    handle.stop().await?;
    let _ = stop_tx.send(());
    let summary: RenderSummary = render_task.await?;

    info!(
        "Rendered {} frames, {} reconciles, peak {} agents, last tick {}",
        summary.frames, summary.reconciles, summary.peak_objects, summary.last_tick
    );
    if last.status == SessionStatus::Error {
        let message = last.last_error.unwrap_or_default();
        anyhow::bail!("Simulation failed: {}", message);
    }
    Ok(())
}

async fn list(endpoints: EndpointConfig) -> Result<()> {
    let api = HttpSimulationApi::new(endpoints)?;
    let simulations = api.list().await?;
    if simulations.is_empty() {
        println!("No active simulations");
        return Ok(());
    }
    println!("{:<40} {:>7} {:<6} {:>8}", "ID", "AGENTS", "MODE", "TICK");
    for sim in simulations {
        println!(
            "{:<40} {:>7} {:<6} {:>8}",
            sim.simulation_id.as_str(),
            sim.num_agents,
            sim.mode.as_str(),
            sim.tick
        );
    }
    Ok(())
}

async fn inspect(endpoints: EndpointConfig, id: &str) -> Result<()> {
    let api = HttpSimulationApi::new(endpoints)?;
    let snapshot = api
        .fetch(&SimulationId::from(id))
        .await
        .with_context(|| format!("Failed to fetch simulation {}", id))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn health(endpoints: EndpointConfig) -> Result<()> {
    let url = endpoints.health_url();
    let api = HttpSimulationApi::new(endpoints)?;
    api.health()
        .await
        .with_context(|| format!("Service at {} is not healthy", url))?;
    println!("ok");
    Ok(())
}
