//! Command-line interface for capsule_forge.
//!
//! Provides commands for capsule generation, learner analytics,
//! feedback-driven regeneration and mentor hints.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
