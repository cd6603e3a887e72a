//! Error types for the decision core.
//!
//! Errors here are fatal configuration or construction problems only.
//! Per-tick code paths never return `Result`: a missing unit, an
//! unsatisfiable request or an unreachable goal is reported as `None`
//! or an empty collection and retried on a later tick.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Top-level error type for core initialization failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tuning value is outside its valid range.
    #[error("invalid tuning: {field} = {value} ({reason})")]
    InvalidTuning {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, formatted for display.
        value: String,
        /// Why the value is rejected.
        reason: &'static str,
    },

    /// The supplied region graph failed validation.
    #[error("malformed region graph: {0}")]
    MalformedGraph(String),
}
