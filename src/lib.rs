//! capsule_forge: generate, verify and continuously improve coding capsules.
//!
//! A capsule is a small interactive exercise: problem statement, starter
//! code, reference solution and tests. The [`pipeline`] turns an idea into a
//! sandbox-validated capsule; [`analytics`] and [`feedback`] close the loop
//! by turning learner events into regeneration requests, and the mentor in
//! [`agents`] answers stuck learners.

pub mod agents;
pub mod analytics;
pub mod capsule;
pub mod cli;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod sandbox;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{
    AnalyticsError, FeedbackError, IntakeError, LlmError, SandboxError, StorageError,
};
