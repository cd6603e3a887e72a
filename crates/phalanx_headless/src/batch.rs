//! Parallel batch execution.
//!
//! Tuning work needs volume: one run proves nothing about a cadence or
//! decay change, two hundred runs across jittered seeds do. This module
//! fans runs out over a rayon pool, collects the per-run summaries and
//! writes everything to a JSON report for offline analysis.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::runner::{run_scenario, RunOutcome, RunSummary};
use crate::scenario::{Scenario, ScenarioError};

/// Configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Scenario name or file path.
    pub scenario: String,
    /// Number of runs.
    pub run_count: u32,
    /// Worker threads (0 = rayon default).
    pub parallel: u32,
    /// Directory reports are written into.
    pub output_dir: PathBuf,
    /// First seed; run `i` uses `seed_start + i`.
    pub seed_start: u64,
    /// Tick limit override; the scenario's own limit applies when unset.
    pub max_ticks: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            scenario: "skirmish".to_string(),
            run_count: 100,
            parallel: 0,
            output_dir: PathBuf::from("results"),
            seed_start: 0,
            max_ticks: None,
        }
    }
}

impl BatchConfig {
    /// Create config for a specific scenario.
    #[must_use]
    pub fn new(scenario: &str, run_count: u32) -> Self {
        Self {
            scenario: scenario.to_string(),
            run_count,
            ..Default::default()
        }
    }

    /// Set output directory.
    #[must_use]
    pub fn with_output(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    /// Set the first seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed_start = seed;
        self
    }

    /// Override the scenario's tick limit.
    #[must_use]
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }
}

/// Results from a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Configuration used.
    pub config: BatchConfig,
    /// Individual run summaries.
    pub runs: Vec<RunSummary>,
    /// Aggregate summary.
    pub summary: BatchSummary,
    /// Total runtime.
    pub duration_seconds: f64,
    /// Errors encountered.
    pub errors: Vec<BatchError>,
}

impl BatchResults {
    /// Save results to a JSON file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from a JSON file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Error during one run of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    /// Run index.
    pub run_index: u32,
    /// Seed used.
    pub seed: u64,
    /// Error message.
    pub message: String,
}

/// Aggregate figures over a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Runs that produced a summary.
    pub total_runs: u32,
    /// Runs where every army order completed.
    pub armies_complete: u32,
    /// Runs stopped by the tick limit.
    pub tick_limited: u32,
    /// Runs that ended with no hostile survivors.
    pub clearances: u32,
    /// Mean run length in ticks.
    pub average_ticks: f64,
    /// Fraction of runs that cleared all hostiles.
    pub clearance_rate: f64,
}

impl BatchSummary {
    /// Compute the aggregate over a slice of run summaries.
    #[must_use]
    pub fn from_runs(runs: &[RunSummary]) -> Self {
        let total_runs = runs.len() as u32;
        let armies_complete = runs
            .iter()
            .filter(|r| r.outcome == RunOutcome::ArmiesComplete)
            .count() as u32;
        let clearances = runs.iter().filter(|r| r.enemy_survivors == 0).count() as u32;
        let average_ticks = if runs.is_empty() {
            0.0
        } else {
            runs.iter().map(|r| r.ticks as f64).sum::<f64>() / runs.len() as f64
        };
        let clearance_rate = if total_runs == 0 {
            0.0
        } else {
            f64::from(clearances) / f64::from(total_runs)
        };
        Self {
            total_runs,
            armies_complete,
            tick_limited: total_runs - armies_complete,
            clearances,
            average_ticks,
            clearance_rate,
        }
    }
}

/// Shared progress counter for a batch in flight.
#[derive(Debug)]
pub struct BatchProgress {
    /// Total runs.
    pub total: u32,
    completed: AtomicU32,
    start_time: Instant,
}

impl BatchProgress {
    /// Create a tracker for `total` runs.
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            total,
            completed: AtomicU32::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one completed run.
    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs completed so far.
    pub fn current(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Completion percentage.
    pub fn percentage(&self) -> f64 {
        f64::from(self.current()) / f64::from(self.total.max(1)) * 100.0
    }

    /// Print a one-line progress report to stderr.
    pub fn display(&self) {
        eprintln!(
            "Batch progress: {}/{} ({:.1}%) after {:.1}s",
            self.current(),
            self.total,
            self.percentage(),
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

/// Run a batch of scenario runs across the rayon pool.
pub fn run_batch(config: BatchConfig) -> Result<BatchResults, ScenarioError> {
    let start = Instant::now();
    let mut scenario = Scenario::resolve(&config.scenario)?;
    if let Some(ticks) = config.max_ticks {
        scenario.max_ticks = ticks;
    }

    info!(
        "Starting batch run: {} runs of '{}'",
        config.run_count, scenario.name
    );

    if config.parallel > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel as usize)
            .build_global()
            .ok(); // Ignore if already set
    }

    let progress = BatchProgress::new(config.run_count);
    let outcomes: Vec<Result<RunSummary, BatchError>> = (0..config.run_count)
        .into_par_iter()
        .map(|i| {
            let seed = config.seed_start.wrapping_add(u64::from(i));
            match run_scenario(&scenario, seed) {
                Ok(summary) => {
                    progress.record_completion();
                    if progress.current() % 100 == 0 {
                        progress.display();
                    }
                    Ok(summary)
                }
                Err(e) => {
                    warn!("Run {} failed: {}", i, e);
                    Err(BatchError {
                        run_index: i,
                        seed,
                        message: e.to_string(),
                    })
                }
            }
        })
        .collect();

    let (runs, errors): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
    let runs: Vec<RunSummary> = runs.into_iter().filter_map(Result::ok).collect();
    let errors: Vec<BatchError> = errors.into_iter().filter_map(Result::err).collect();

    let summary = BatchSummary::from_runs(&runs);
    let duration_seconds = start.elapsed().as_secs_f64();

    info!(
        "Batch complete: {} runs in {:.1}s ({:.1} runs/sec)",
        runs.len(),
        duration_seconds,
        runs.len() as f64 / duration_seconds.max(0.001)
    );

    Ok(BatchResults {
        config,
        runs,
        summary,
        duration_seconds,
        errors,
    })
}

/// Verify determinism by repeating the same seed and comparing full
/// summaries, state fingerprints included.
pub fn verify_determinism(scenario: &Scenario, seed: u64, runs: u32) -> bool {
    let mut reference: Option<RunSummary> = None;
    for attempt in 0..runs {
        let summary = match run_scenario(scenario, seed) {
            Ok(s) => s,
            Err(e) => {
                warn!("Verification run {} failed: {}", attempt, e);
                return false;
            }
        };
        match &reference {
            None => reference = Some(summary),
            Some(first) => {
                if *first != summary {
                    warn!(attempt, "verification divergence detected");
                    return false;
                }
            }
        }
    }
    true
}
