//! Shared backend interaction for the generation stages.
//!
//! Each stage owns its prompts but asks for a JSON object the same way:
//! bounded attempts, each guarded by the request's [`RunContext`], with
//! malformed or rejected content retried until the attempts run out.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::metrics::MetricsCollector;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::context::{GuardError, RunContext};
use crate::utils::json_extraction::{extract_json_object, preview};

use super::error::{AgentError, AgentResult};

/// Backend call settings shared by the stages.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Model identifier; empty uses the client default.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub call_timeout: Duration,
    /// Attempts per interaction, including the first.
    pub attempts: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}

impl BackendSettings {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: 4000,
            call_timeout: config.backend_call_timeout,
            attempts: config.backend_retries.saturating_add(1),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Asks the backend for a JSON object and parses it into `T`.
///
/// `check` may reject a well-formed response (missing fields, too few
/// tests); a rejection counts as a failed attempt. Interruptions end the
/// loop immediately; everything else is retried until `settings.attempts`
/// is used up, after which a `GenerationFault` is returned.
#[allow(clippy::too_many_arguments)]
pub async fn request_json<T, F>(
    llm: &dyn LlmProvider,
    ctx: &RunContext,
    settings: &BackendSettings,
    stage: &str,
    system_prompt: &str,
    user_prompt: &str,
    mut check: F,
) -> AgentResult<T>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<T, String>,
{
    let metrics = MetricsCollector::new();
    let attempts = settings.attempts.max(1);
    let mut last_error = String::from("no attempts made");

    for attempt in 0..attempts {
        let request = GenerationRequest::new(
            settings.model.clone(),
            vec![Message::system(system_prompt), Message::user(user_prompt)],
        )
        .with_temperature(settings.temperature)
        .with_max_tokens(settings.max_tokens)
        .with_json_output();

        let response = match ctx.run(settings.call_timeout, llm.generate(request)).await {
            Err(GuardError::Interrupted(interrupt)) => return Err(interrupt.into()),
            Err(GuardError::TimedOut(after)) => {
                ctx.counters().record_backend_call(0);
                metrics.record_backend_call(stage, "timeout", 0);
                last_error = format!("backend call timed out after {:?}", after);
                tracing::warn!(
                    stage = stage,
                    attempt = attempt + 1,
                    "Backend call timed out, retrying"
                );
                continue;
            }
            Ok(Err(e)) => {
                ctx.counters().record_backend_call(0);
                metrics.record_backend_call(stage, "error", 0);
                last_error = e.to_string();
                tracing::warn!(
                    stage = stage,
                    attempt = attempt + 1,
                    error = %e,
                    "Backend call failed, retrying"
                );
                continue;
            }
            Ok(Ok(response)) => response,
        };

        let tokens = response.usage.total_tokens;
        ctx.counters().record_backend_call(tokens);

        match parse_response::<T>(response.first_content()).and_then(&mut check) {
            Ok(value) => {
                metrics.record_backend_call(stage, "success", tokens);
                tracing::debug!(stage = stage, attempt = attempt + 1, tokens, "Backend call succeeded");
                return Ok(value);
            }
            Err(reason) => {
                metrics.record_backend_call(stage, "unusable", tokens);
                tracing::warn!(
                    stage = stage,
                    attempt = attempt + 1,
                    error = %reason,
                    "Backend returned unusable content, retrying"
                );
                last_error = reason;
            }
        }
    }

    Err(AgentError::GenerationFault {
        stage: stage.to_string(),
        attempts,
        last_error,
    })
}

fn parse_response<T: DeserializeOwned>(content: Option<&str>) -> Result<T, String> {
    let content = content
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| "empty response".to_string())?;
    let json = extract_json_object(content).into_result()?;
    serde_json::from_str(&json).map_err(|e| {
        format!(
            "response did not match the expected shape: {} (got {})",
            e,
            preview(&json, 200)
        )
    })
}
