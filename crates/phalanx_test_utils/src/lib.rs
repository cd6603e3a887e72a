//! # Phalanx Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Scripted world snapshots and an intent-recording sink
//! - Hand-checkable region graph fixtures
//! - A fully scriptable probe task for scheduler tests
//! - Determinism test harness

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;
pub mod maps;
pub mod probe;

pub use fixtures::{vec2, RecordingSink, ScriptedWorld};
pub use probe::{ProbeHandle, ProbeState, ProbeTask};

/// Re-export proptest for convenience.
pub use proptest;
