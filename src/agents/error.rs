//! Error types for the generation stages.
//!
//! Designed outcomes (a rejected idea, an exhausted debugging session) are
//! not errors. These variants cover the cases where a stage could not
//! produce its output at all.

use thiserror::Error;

use crate::pipeline::context::Interrupt;

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The backend kept returning unusable content after local retries.
    #[error("Stage '{stage}' could not get usable output after {attempts} attempts: {last_error}")]
    GenerationFault {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    /// The sandbox could not be reached after local retries.
    #[error("Sandbox unavailable: {0}")]
    ValidationFault(String),

    /// The request was cancelled or ran out of wall-clock budget.
    #[error("Interrupted: {0}")]
    Interrupted(Interrupt),

    /// Error from the LLM provider.
    #[error("LLM error: {0}")]
    LlmError(String),

    /// Error parsing LLM response.
    #[error("Failed to parse LLM response: {0}")]
    ResponseParseError(String),

    /// Configuration error.
    #[error("Agent configuration error: {0}")]
    ConfigurationError(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<crate::error::LlmError> for AgentError {
    fn from(err: crate::error::LlmError) -> Self {
        AgentError::LlmError(err.to_string())
    }
}

impl From<Interrupt> for AgentError {
    fn from(interrupt: Interrupt) -> Self {
        AgentError::Interrupted(interrupt)
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_fault_display() {
        let err = AgentError::GenerationFault {
            stage: "coder".to_string(),
            attempts: 3,
            last_error: "no JSON".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("coder"));
        assert!(text.contains("3 attempts"));
        assert!(text.contains("no JSON"));
    }

    #[test]
    fn test_interrupt_conversion() {
        let err: AgentError = Interrupt::Cancelled.into();
        assert!(matches!(err, AgentError::Interrupted(Interrupt::Cancelled)));
        assert_eq!(err.to_string(), "Interrupted: cancelled");
    }
}
