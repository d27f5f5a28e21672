//! SwarmView Scenario Simulator CLI
//!
//! Runs the session driver and scene reconciler through scripted lifecycle
//! scenarios against an in-memory service.

use clap::Parser;
use swarmview_sim::scenarios::ScenarioId;
use swarmview_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// SwarmView scenario simulation CLI
#[derive(Parser, Debug)]
#[command(name = "swarmview-sim")]
#[command(about = "Run scripted session lifecycle scenarios for SwarmView", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of agents in the initial agent set
    #[arg(short, long, default_value = "20")]
    agents: u32,

    /// Scenario to run (steady_stream, agent_churn, server_shutdown, network_drop,
    /// error_frame, stale_create, restart, create_failure, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Tick frames streamed per phase
    #[arg(short, long, default_value = "30")]
    ticks: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.json { Level::WARN } else { level })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !args.json {
        info!("SwarmView Scenario Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                anyhow::bail!("{} (available: {}, all)", e, names.join(", "));
            }
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_nanos() as u64
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.agents).with_ticks(args.ticks);

        for scenario in &scenarios {
            let result = runner.run(*scenario).await;

            if !args.json {
                let kind = if scenario.is_fault() { " [fault]" } else { "" };
                if result.passed {
                    info!("✓ {}{} (seed={}) PASSED", scenario.name(), kind, seed);
                } else {
                    error!(
                        "✗ {}{} (seed={}) FAILED: {}",
                        scenario.name(),
                        kind,
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}
