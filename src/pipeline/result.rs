//! Externally visible outcome of one `generate` call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{AgentError, DebuggingSession, ExhaustionReason, PedagogicalAnalysis};
use crate::capsule::{CapsuleIdea, CodeGenerationResult, ValidationResult};

use super::context::Interrupt;
use super::stats::PipelineStats;

/// Why a generation ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    DebugExhausted,
    GenerationFault,
    ValidationFault,
    Timeout,
    Cancelled,
    Storage,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::DebugExhausted => "debug_exhausted",
            FailureReason::GenerationFault => "generation_fault",
            FailureReason::ValidationFault => "validation_fault",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Storage => "storage",
        }
    }

    /// Reason for a stage that returned an error.
    pub fn from_agent_error(error: &AgentError) -> Self {
        match error {
            AgentError::Interrupted(interrupt) => Self::from_interrupt(*interrupt),
            AgentError::ValidationFault(_) => FailureReason::ValidationFault,
            AgentError::GenerationFault { .. }
            | AgentError::LlmError(_)
            | AgentError::ResponseParseError(_)
            | AgentError::ConfigurationError(_)
            | AgentError::Json(_) => FailureReason::GenerationFault,
        }
    }

    pub fn from_interrupt(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => FailureReason::Cancelled,
            Interrupt::BudgetExhausted => FailureReason::Timeout,
        }
    }

    /// Reason for a debugging session that ended without a passing run.
    pub fn from_exhaustion(reason: ExhaustionReason) -> Self {
        match reason {
            ExhaustionReason::MaxAttempts => FailureReason::DebugExhausted,
            ExhaustionReason::BudgetExhausted => FailureReason::Timeout,
            ExhaustionReason::Cancelled => FailureReason::Cancelled,
            ExhaustionReason::FixGenerationFailed => FailureReason::GenerationFault,
            ExhaustionReason::SandboxFault => FailureReason::ValidationFault,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Stored and live.
    Published,
    /// Passed validation; stored, waiting for a human.
    PendingReview,
    /// The Pedagogist turned the idea down.
    Rejected,
    Failed { reason: FailureReason },
}

impl PipelineStatus {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStatus::Published => "published",
            PipelineStatus::PendingReview => "pending_review",
            PipelineStatus::Rejected => "rejected",
            PipelineStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, PipelineStatus::Published)
    }

    /// Whether a capsule record was written.
    pub fn is_stored(&self) -> bool {
        matches!(self, PipelineStatus::Published | PipelineStatus::PendingReview)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Failed { reason } => write!(f, "failed ({})", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Immutable once returned.
///
/// `capsule` and `capsule_id` are set only for stored statuses, and then
/// `validation.all_passed` is true for exactly that capsule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineGenerationResult {
    pub request_id: Uuid,
    pub capsule_id: Option<Uuid>,
    pub idea: CapsuleIdea,
    pub analysis: Option<PedagogicalAnalysis>,
    pub capsule: Option<CodeGenerationResult>,
    pub debug_session: Option<DebuggingSession>,
    /// Last validation performed, if any.
    pub validation: Option<ValidationResult>,
    pub status: PipelineStatus,
    /// Human-readable explanation of the terminal status.
    pub rationale: String,
    pub stats: PipelineStats,
}
