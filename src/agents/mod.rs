//! Generation stages and the mentor.
//!
//! Each stage is an agent owning its prompts and configuration:
//!
//! - [`PedagogistAgent`] scores an idea for learning value
//! - [`CoderAgent`] plans and writes the capsule code
//! - [`ValidatorAgent`] runs the reference solution in the sandbox
//! - [`DebuggerAgent`] repairs failing capsules in a bounded loop
//! - [`MentorAgent`] answers stuck learners without revealing the solution

pub mod backend;
pub mod coder;
pub mod debugger;
pub mod error;
pub mod mentor;
pub mod pedagogist;
pub mod validator;

pub use backend::BackendSettings;
pub use coder::{CoderAgent, CoderConfig, CoderOutput, ImplementationPlan};
pub use debugger::{
    classify_outcome, DebugOutcome, DebugRun, DebuggerAgent, DebuggerConfig, DebuggingSession,
    ErrorAnalysis, ErrorCategory, ExhaustionReason, FixAttempt, FixPatch,
};
pub use error::{AgentError, AgentResult};
pub use mentor::{
    leaks_solution, template_hint, HintSource, HintStage, MentorAgent, MentorConfig, MentorHint,
    MentorRequest, MentorService,
};
pub use pedagogist::{compute_quality_score, PedagogicalAnalysis, PedagogistAgent, PedagogistConfig};
pub use validator::{ValidatorAgent, ValidatorConfig};
