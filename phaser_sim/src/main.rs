//! Phaser Scenario Simulator CLI
//!
//! Run deterministic tracker scenarios across one or many seeds.

use clap::Parser;
use phaser_core::TrackerConfig;
use phaser_sim::scenarios::ScenarioId;
use phaser_sim::{ScenarioResult, ScenarioRunner, SimError};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Phaser deterministic scenario CLI
#[derive(Parser, Debug)]
#[command(name = "phaser-sim")]
#[command(about = "Run deterministic scope-tracking scenarios for Phaser", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (bulk_capture, effect_chain, async_spawns, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Ticks per scenario
    #[arg(short, long, default_value = "20")]
    ticks: u64,

    /// Tracker configuration file (JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the frame trace of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn parse_scenarios(arg: &str) -> Result<Vec<ScenarioId>, SimError> {
    if arg == "all" {
        return Ok(ScenarioId::all());
    }
    arg.parse()
        .map(|scenario| vec![scenario])
        .map_err(|_| SimError::UnknownScenario(arg.to_string()))
}

fn base_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}

fn log_result(result: &ScenarioResult) {
    if result.passed {
        info!("✓ {} (seed={}) PASSED", result.scenario.name(), result.seed);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn run_export(runner: &ScenarioRunner, scenarios: &[ScenarioId], path: &str) -> Result<bool, SimError> {
    let [scenario] = scenarios else {
        return Err(SimError::ExportNeedsOneScenario);
    };
    info!("Running with export to: {}", path);

    let (result, export) = runner.run_with_export(*scenario);
    export.write_to_file(path)?;
    info!("Exported {} frames ({} events) to {}", export.frames.len(), export.event_count(), path);
    log_result(&result);
    Ok(result.passed)
}

fn run(args: &Args) -> Result<bool, SimError> {
    let scenarios = parse_scenarios(&args.scenario)?;
    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    let base_seed = base_seed(args.seed);

    if let Some(path) = &args.export {
        let runner = ScenarioRunner::new(base_seed).with_ticks(args.ticks).with_config(config);
        return run_export(&runner, &scenarios, path);
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_ticks(args.ticks)
            .with_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                log_result(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{:#}", summary);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(failed.is_empty())
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Phaser Scenario Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(SimError::UnknownScenario(name)) => {
            eprintln!("Error: unknown scenario {}", name);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
