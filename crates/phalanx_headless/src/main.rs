//! Headless decision-core runner.
//!
//! Runs the decision core against the built-in world model with no game
//! attached. Summaries go to stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Run a single scenario and print its summary
//! cargo run -p phalanx_headless -- run --scenario skirmish
//!
//! # Run a tuning sweep batch
//! cargo run -p phalanx_headless -- batch --scenario scenarios/crossing.ron --count 200 --output results/
//!
//! # Verify determinism for one seed
//! cargo run -p phalanx_headless -- verify --scenario skirmish --seed 12345 --runs 5
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phalanx_headless::batch::{run_batch, verify_determinism, BatchConfig};
use phalanx_headless::runner::run_scenario;
use phalanx_headless::scenario::Scenario;

#[derive(Parser)]
#[command(name = "phalanx_headless")]
#[command(about = "Headless decision-core runner for batch testing and CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single scenario and print its summary as JSON
    Run {
        /// Scenario name or RON file path
        #[arg(short, long, default_value = "skirmish")]
        scenario: String,

        /// Seed for hostile placement jitter
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Override the scenario's tick limit
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Also write the summary JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a batch of scenario runs for tuning sweeps
    Batch {
        /// Scenario name or RON file path
        #[arg(short, long, default_value = "skirmish")]
        scenario: String,

        /// Number of runs
        #[arg(short, long, default_value = "100")]
        count: u32,

        /// Maximum parallel runs (0 = auto)
        #[arg(short, long, default_value = "0")]
        parallel: u32,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Starting seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Override the scenario's tick limit
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Verify determinism by running the same seed multiple times
    Verify {
        /// Scenario name or RON file path
        #[arg(short, long, default_value = "skirmish")]
        scenario: String,

        /// Seed to verify
        #[arg(long, default_value = "12345")]
        seed: u64,

        /// Number of verification runs
        #[arg(short, long, default_value = "5")]
        runs: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON summaries.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Run {
            scenario,
            seed,
            ticks,
            output,
        }) => {
            cmd_run(&scenario, seed, ticks, output);
        }
        Some(Commands::Batch {
            scenario,
            count,
            parallel,
            output,
            seed,
            ticks,
        }) => {
            cmd_batch(scenario, count, parallel, output, seed, ticks);
        }
        Some(Commands::Verify {
            scenario,
            seed,
            runs,
        }) => {
            cmd_verify(&scenario, seed, runs);
        }
        None => {
            // Default: one run of the builtin skirmish
            cmd_run("skirmish", 0, None, None);
        }
    }
}

/// Run a single scenario
fn cmd_run(spec: &str, seed: u64, ticks: Option<u64>, output: Option<PathBuf>) {
    tracing::info!("Running scenario '{}' with seed {}", spec, seed);

    let mut scenario = match Scenario::resolve(spec) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load scenario: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(limit) = ticks {
        scenario.max_ticks = limit;
    }

    let summary = match run_scenario(&scenario, seed) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Run failed: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("\n{}", "=".repeat(50));
    eprintln!("RUN COMPLETE");
    eprintln!("{}", "=".repeat(50));
    eprintln!("Scenario: {}", summary.scenario);
    eprintln!(
        "Outcome: {:?} after {} ticks",
        summary.outcome, summary.ticks
    );
    eprintln!(
        "Survivors: {} own, {} hostile",
        summary.own_survivors, summary.enemy_survivors
    );
    eprintln!("Intents issued: {}", summary.intents_issued);
    eprintln!(
        "State hash: {:016x}/{:016x}",
        summary.scheduler_hash, summary.threat_hash
    );

    let json = match serde_json::to_string_pretty(&summary) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Failed to serialize summary: {}", e);
            std::process::exit(1);
        }
    };
    println!("{}", json);

    if let Some(path) = output {
        if let Err(e) = std::fs::write(&path, &json) {
            eprintln!("Failed to write summary to {}: {}", path.display(), e);
            std::process::exit(1);
        }
        eprintln!("Summary saved to: {}", path.display());
    }
}

/// Run a batch for tuning sweeps
fn cmd_batch(
    scenario: String,
    count: u32,
    parallel: u32,
    output: PathBuf,
    seed: u64,
    ticks: Option<u64>,
) {
    tracing::info!(
        scenario = %scenario,
        count = count,
        parallel = parallel,
        seed = seed,
        output = %output.display(),
        "Batch configuration"
    );

    if let Err(e) = std::fs::create_dir_all(&output) {
        eprintln!(
            "FATAL: Cannot create output directory '{}': {}",
            output.display(),
            e
        );
        std::process::exit(1);
    }

    let config = BatchConfig {
        scenario,
        run_count: count,
        parallel,
        output_dir: output.clone(),
        seed_start: seed,
        max_ticks: ticks,
    };

    let results = match run_batch(config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };

    let results_path = output.join("batch_results.json");
    if let Err(e) = results.save(&results_path) {
        eprintln!("FATAL: Failed to save results: {}", e);
        std::process::exit(1);
    }

    eprintln!("\n{}", "=".repeat(50));
    eprintln!("BATCH COMPLETE");
    eprintln!("{}", "=".repeat(50));
    eprintln!("Runs: {}", results.runs.len());
    if !results.errors.is_empty() {
        eprintln!("Runs FAILED: {}", results.errors.len());
    }
    eprintln!("Duration: {:.1}s", results.duration_seconds);
    eprintln!(
        "Throughput: {:.1} runs/sec",
        results.runs.len() as f64 / results.duration_seconds.max(0.001)
    );
    eprintln!(
        "Armies complete: {}/{}",
        results.summary.armies_complete, results.summary.total_runs
    );
    eprintln!(
        "Clearance rate: {:.1}%",
        results.summary.clearance_rate * 100.0
    );
    eprintln!("Average length: {:.0} ticks", results.summary.average_ticks);

    if !results.errors.is_empty() {
        eprintln!("\nRUN FAILURES:");
        for error in results.errors.iter().take(10) {
            eprintln!(
                "  Run {} (seed {}): {}",
                error.run_index, error.seed, error.message
            );
        }
        if results.errors.len() > 10 {
            eprintln!("  ... and {} more failures", results.errors.len() - 10);
        }
    }

    eprintln!("\nResults saved to: {}", results_path.display());
}

/// Verify determinism for one seed
fn cmd_verify(spec: &str, seed: u64, runs: u32) {
    tracing::info!(
        "Verifying determinism: {} with seed {} ({} runs)",
        spec,
        seed,
        runs
    );

    let scenario = match Scenario::resolve(spec) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load scenario: {}", e);
            std::process::exit(1);
        }
    };

    if verify_determinism(&scenario, seed, runs) {
        eprintln!("PASS: All {} runs produced identical results", runs);
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        std::process::exit(1);
    }
}
