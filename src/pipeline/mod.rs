//! Capsule generation pipeline.
//!
//! The [`PipelineOrchestrator`] turns a [`CapsuleIdea`](crate::capsule::CapsuleIdea)
//! into a [`PipelineGenerationResult`] by running four stages in order:
//!
//! 1. **Pedagogist**: scores the idea; below the threshold the request ends `Rejected`
//! 2. **Coder**: plans, then writes starter code, solution and tests
//! 3. **Validator**: runs the solution against the tests in the sandbox
//! 4. **Debugger**: on failure, proposes and re-validates fixes up to a bound
//!
//! Only a capsule whose latest validation passed is stored. It is
//! `Published`, or `PendingReview` when the debugger rewrote tests under
//! the `RequireReview` policy or the caller asked for review.
//!
//! # Example
//!
//! ```rust,ignore
//! use capsule_forge::pipeline::{PipelineConfig, PipelineOrchestrator};
//!
//! let config = PipelineConfig::from_env()?;
//! let orchestrator = PipelineOrchestrator::new(llm, sandbox, store, config)?;
//! let idea = CapsuleIdea::intake("two-sum", "python", "easy")?;
//! let result = orchestrator
//!     .generate(idea, orchestrator.default_options())
//!     .await;
//! println!("{}: {}", result.status, result.rationale);
//! ```
//!
//! # Budgets
//!
//! Every backend and sandbox call runs under a per-call timeout and the
//! request's wall-clock budget. Budget exhaustion and cancellation end the
//! request as `Failed` with reason `Timeout` or `Cancelled`.

pub mod config;
pub mod context;
pub mod orchestrator;
pub mod result;
pub mod stats;

pub use config::{ConfigError, PipelineConfig, TestRewritePolicy};
pub use context::{CancellationToken, GuardError, Interrupt, RunContext};
pub use orchestrator::{
    CapsuleGenerator, GenerationOptions, Lineage, PipelineOrchestrator, PublishMode,
};
pub use result::{FailureReason, PipelineGenerationResult, PipelineStatus};
pub use stats::{PipelineStats, Stage, StageLatency};
