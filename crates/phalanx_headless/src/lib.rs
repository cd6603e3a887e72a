//! Headless scenario runner for the decision core.
//!
//! This crate closes the loop the core deliberately leaves open: it owns
//! a small deterministic world model, feeds snapshots to the scheduler
//! and applies the intents that come back. That enables:
//!
//! - **Batch runs**: hundreds of scenario runs in parallel for tuning
//!   sweeps and regression hunting
//! - **CI verification**: repeat a seed and fail loudly if any run
//!   diverges
//! - **Scenario authoring**: region maps, deployments and standing
//!   orders described in RON files
//!
//! # Example
//!
//! ```bash
//! # Run the builtin skirmish once and print the summary as JSON
//! cargo run -p phalanx_headless -- run --scenario skirmish
//!
//! # Run a scenario file 200 times across all cores
//! cargo run -p phalanx_headless -- batch --scenario scenarios/crossing.ron --count 200
//!
//! # Verify determinism for one seed
//! cargo run -p phalanx_headless -- verify --scenario skirmish --seed 12345
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod runner;
pub mod scenario;
pub mod world;

pub use batch::{run_batch, verify_determinism, BatchConfig, BatchResults, BatchSummary};
pub use runner::{run_scenario, RunOutcome, RunSummary};
pub use scenario::{Scenario, ScenarioError, ScenarioIntel};
pub use world::{IntentBuffer, SimWorld};
