//! # Phalanx Core
//!
//! Deterministic combat decision core for tick-driven agents.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! The core is fed a read-only world snapshot once per tick and answers
//! with unit intents. Three subsystems cooperate:
//! - the [`scheduler`] hands exclusive unit ownership to competing tasks
//!   and reclaims it when they finish or units disappear;
//! - [`army`] runs each squad of owned units through an aggression state
//!   machine with pluggable per-state [`behavior`] handlers;
//! - [`threat`] maintains a decaying, diffusing danger field over the
//!   region graph, consumed by [`pathing`] and the handlers.
//!
//! ## Crate Structure
//!
//! - [`world`] - snapshot and command boundary traits
//! - [`region`] - static region graph
//! - [`threat`] - regional threat model
//! - [`pathing`] - policy-weighted region pathfinding
//! - [`task`] / [`scheduler`] - task abstraction and scheduling
//! - [`army`] / [`behavior`] - squad state machine and handlers
//! - [`math`] - fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod army;
pub mod behavior;
pub mod config;
pub mod enemy;
pub mod error;
pub mod math;
pub mod message;
pub mod pathing;
pub mod recon;
pub mod region;
pub mod scheduler;
pub mod task;
pub mod threat;
pub mod world;

// Unit tests compile the shared fixtures into this crate's own test build.
// Linking the pre-built `phalanx_test_utils` crate here would drag in a
// second copy of `phalanx_core` (dev-dependency cycle), and types from the
// two copies are not interchangeable; benches link the crate normally.
#[cfg(test)]
extern crate self as phalanx_core;

#[cfg(test)]
#[path = "../../phalanx_test_utils/src/fixtures.rs"]
mod fixtures;

#[cfg(test)]
#[path = "../../phalanx_test_utils/src/maps.rs"]
mod maps;

#[cfg(test)]
#[path = "../../phalanx_test_utils/src/probe.rs"]
mod probe;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::army::{ArmyTask, FightTelemetry};
    pub use crate::behavior::AggressionState;
    pub use crate::config::TuningConfig;
    pub use crate::enemy::{EnemyAwareness, SnapshotAwareness, VirtualArmy};
    pub use crate::error::{CoreError, Result};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::message::{Message, MessageResponse};
    pub use crate::pathing::AvoidancePolicy;
    pub use crate::recon::SurveillanceTask;
    pub use crate::region::{Region, RegionGraph, RegionId};
    pub use crate::scheduler::{AddTaskOutcome, StepReport, TaskScheduler};
    pub use crate::task::{Task, TaskKey, TaskResult};
    pub use crate::threat::{BaseIntel, CombatScorer, NoIntel, StandardScorer, ThreatModel};
    pub use crate::world::{
        Alliance, CommandSink, UnitClass, UnitId, UnitIntent, UnitSnapshot, WorldSnapshot,
    };
}
