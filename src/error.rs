//! Error types for capsule-forge operations.
//!
//! Defines error types for the external collaborators and shared subsystems:
//! - Text/code generation backend (LLM)
//! - Code-execution sandbox
//! - Capsule persistence
//! - Learner event ingestion
//! - Idea intake and the feedback loop

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while talking to the execution sandbox.
///
/// These are transport-level failures only. A sandbox that answers with a
/// timeout flag or a fault message is a successful call whose payload says
/// the code misbehaved.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Missing sandbox URL: CAPSULE_SANDBOX_URL environment variable not set")]
    MissingEndpoint,

    #[error("Sandbox request failed: {0}")]
    RequestFailed(String),

    #[error("Sandbox returned HTTP {code}: {message}")]
    HttpStatus { code: u16, message: String },

    #[error("Malformed sandbox response: {0}")]
    MalformedResponse(String),

    #[error("Unsupported language for sandbox execution: {0}")]
    UnsupportedLanguage(String),
}

impl SandboxError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            SandboxError::RequestFailed(_) | SandboxError::MalformedResponse(_) => true,
            SandboxError::HttpStatus { code, .. } => *code == 429 || *code >= 500,
            SandboxError::MissingEndpoint | SandboxError::UnsupportedLanguage(_) => false,
        }
    }
}

/// Errors that can occur in the capsule store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Capsule '{0}' not found")]
    NotFound(String),

    #[error("Capsule '{0}' already exists")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while ingesting or aggregating learner events.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event window: start {start} is after end {end}")]
    InvalidWindow { start: String, end: String },
}

/// Errors raised while normalising a raw idea into a `CapsuleIdea`.
#[derive(Debug, Error, PartialEq)]
pub enum IntakeError {
    #[error("Idea prompt is empty")]
    EmptyPrompt,

    #[error("Idea prompt is {length} characters, maximum is {max}")]
    PromptTooLong { length: usize, max: usize },

    #[error("Unsupported language: {0}")]
    UnknownLanguage(String),

    #[error("Unknown difficulty: {0} (expected easy, medium or hard)")]
    UnknownDifficulty(String),
}

/// Errors raised by the feedback processor.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid feedback configuration: {0}")]
    InvalidConfig(String),
}
