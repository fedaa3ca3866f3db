//! Validator: runs the reference solution against its tests in the sandbox.
//!
//! Every failure the code itself can cause (wrong answers, crashes,
//! timeouts, oversize payloads, sandbox-reported faults) becomes a failed
//! `ValidationResult`, with a synthetic entry where no per-test outcome
//! exists. Only an unreachable sandbox is an error, and only after the
//! configured transport retries.

use std::sync::Arc;
use std::time::Duration;

use crate::capsule::{CodeGenerationResult, FaultKind, TestOutcome, ValidationResult};
use crate::metrics::MetricsCollector;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::context::{GuardError, RunContext};
use crate::sandbox::{Sandbox, SandboxRequest, SandboxResponse, MAX_CODE_BYTES};

use super::error::{AgentError, AgentResult};

/// Configuration for the Validator Agent.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Hard timeout on one sandbox call.
    pub timeout: Duration,
    /// Extra attempts after a transient transport failure.
    pub transport_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}

impl ValidatorConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            timeout: config.sandbox_timeout,
            transport_retries: config.sandbox_retries,
            retry_backoff: Duration::from_millis(250),
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Validator Agent wrapping the sandbox contract.
pub struct ValidatorAgent {
    sandbox: Arc<dyn Sandbox>,
    config: ValidatorConfig,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for ValidatorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ValidatorAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "validator";

    pub fn new(sandbox: Arc<dyn Sandbox>, config: ValidatorConfig) -> Self {
        Self {
            sandbox,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Validates the capsule's solution against its tests.
    ///
    /// # Errors
    ///
    /// `ValidationFault` when the sandbox stays unreachable, `Interrupted`
    /// on cancellation or budget exhaustion.
    pub async fn validate(
        &self,
        capsule: &CodeGenerationResult,
        ctx: &RunContext,
    ) -> AgentResult<ValidationResult> {
        let test_count = capsule.test_cases.len();
        let request = SandboxRequest::new(
            capsule.language,
            capsule.solution_code.clone(),
            capsule.test_cases.clone(),
            self.config.timeout,
        );

        if request.exceeds_code_limit() {
            self.metrics.record_sandbox_call("rejected");
            return Ok(ValidationResult::fault(
                FaultKind::Limit,
                format!(
                    "RuntimeError: solution code too large ({} bytes, limit {})",
                    request.solution_code.len(),
                    MAX_CODE_BYTES
                ),
                test_count,
            ));
        }

        let hard_timeout = Duration::from_secs(request.timeout_secs);
        let retries = self.config.transport_retries;

        for attempt in 0..=retries {
            ctx.counters().record_sandbox_call();

            match ctx.run(hard_timeout, self.sandbox.execute(request.clone())).await {
                Err(GuardError::Interrupted(interrupt)) => return Err(interrupt.into()),
                Err(GuardError::TimedOut(after)) => {
                    self.metrics.record_sandbox_call("timeout");
                    tracing::info!(
                        timeout_secs = after.as_secs(),
                        "Sandbox call hit the hard timeout"
                    );
                    return Ok(ValidationResult::fault(
                        FaultKind::Timeout,
                        format!("Timeout: execution exceeded {}s", after.as_secs()),
                        test_count,
                    ));
                }
                Ok(Ok(response)) => {
                    self.metrics.record_sandbox_call("ok");
                    return Ok(interpret_response(response, test_count));
                }
                Ok(Err(e)) if e.is_transient() && attempt < retries => {
                    self.metrics.record_sandbox_call("transport_error");
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Sandbox call failed, retrying"
                    );
                    if let Err(GuardError::Interrupted(interrupt)) =
                        ctx.run(backoff, tokio::time::sleep(backoff)).await
                    {
                        return Err(interrupt.into());
                    }
                }
                Ok(Err(e)) => {
                    self.metrics.record_sandbox_call("transport_error");
                    tracing::error!(attempt = attempt + 1, error = %e, "Sandbox unavailable");
                    return Err(AgentError::ValidationFault(e.to_string()));
                }
            }
        }

        Err(AgentError::ValidationFault(
            "sandbox retries exhausted".to_string(),
        ))
    }
}

/// Maps a sandbox answer onto the uniform result shape.
fn interpret_response(response: SandboxResponse, test_count: usize) -> ValidationResult {
    if response.timed_out {
        return ValidationResult::fault(
            FaultKind::Timeout,
            "Timeout: sandbox reported the execution timed out",
            test_count,
        );
    }
    if let Some(message) = response.fault_message.filter(|m| !m.trim().is_empty()) {
        return ValidationResult::fault(
            FaultKind::Sandbox,
            format!("Sandbox fault: {}", message),
            test_count,
        );
    }
    if response.per_test_outcome.len() != test_count {
        return ValidationResult::fault(
            FaultKind::Sandbox,
            format!(
                "Sandbox fault: returned {} outcomes for {} tests",
                response.per_test_outcome.len(),
                test_count
            ),
            test_count,
        );
    }

    let mut outcomes: Vec<TestOutcome> = response
        .per_test_outcome
        .into_iter()
        .enumerate()
        .map(|(position, mut outcome)| {
            outcome.test_index = Some(outcome.test_index.unwrap_or(position));
            outcome
        })
        .collect();
    outcomes.sort_by_key(|o| o.test_index);

    let indices_consistent = outcomes
        .iter()
        .enumerate()
        .all(|(position, o)| o.test_index == Some(position));
    if !indices_consistent {
        return ValidationResult::fault(
            FaultKind::Sandbox,
            "Sandbox fault: outcome indices do not match the submitted tests",
            test_count,
        );
    }

    ValidationResult::from_outcomes(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::{Language, RuntimeTier, TestCase};
    use crate::error::SandboxError;
    use crate::pipeline::context::{CancellationToken, Interrupt};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        Respond(SandboxResponse),
        Fail(SandboxError),
        Hang,
    }

    struct ScriptedSandbox {
        steps: Mutex<VecDeque<Step>>,
    }

    impl ScriptedSandbox {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
            }
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        async fn execute(&self, _request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
            let step = self.steps.lock().expect("lock not poisoned").pop_front();
            match step {
                Some(Step::Respond(response)) => Ok(response),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) | None => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(SandboxResponse::default())
                }
            }
        }
    }

    fn capsule() -> CodeGenerationResult {
        CodeGenerationResult {
            problem_statement: "add".to_string(),
            starter_code: "def solve(a, b):\n    pass\n".to_string(),
            solution_code: "def solve(a, b):\n    return a + b\n".to_string(),
            test_cases: vec![
                TestCase::new(vec![json!(1), json!(2)], json!(3), "small"),
                TestCase::new(vec![json!(-1), json!(1)], json!(0), "negative"),
            ],
            language: Language::Python,
            runtime_tier: RuntimeTier::Wasm,
        }
    }

    fn validator(steps: Vec<Step>, retries: u32, timeout: Duration) -> ValidatorAgent {
        ValidatorAgent::new(
            Arc::new(ScriptedSandbox::new(steps)),
            ValidatorConfig {
                timeout,
                transport_retries: retries,
                retry_backoff: Duration::from_millis(1),
            },
        )
    }

    fn passing() -> SandboxResponse {
        SandboxResponse {
            per_test_outcome: vec![TestOutcome::pass(0), TestOutcome::pass(1)],
            timed_out: false,
            fault_message: None,
        }
    }

    #[tokio::test]
    async fn test_all_pass() {
        let agent = validator(vec![Step::Respond(passing())], 0, Duration::from_secs(5));
        let ctx = RunContext::with_budget(Duration::from_secs(10));
        let result = agent.validate(&capsule(), &ctx).await.unwrap();
        assert!(result.all_passed);
        assert_eq!(ctx.counters().sandbox_calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let agent = validator(
            vec![
                Step::Fail(SandboxError::RequestFailed("connection refused".to_string())),
                Step::Respond(passing()),
            ],
            2,
            Duration::from_secs(5),
        );
        let ctx = RunContext::with_budget(Duration::from_secs(10));
        let result = agent.validate(&capsule(), &ctx).await.unwrap();
        assert!(result.all_passed);
        assert_eq!(ctx.counters().sandbox_calls(), 2);
    }

    #[tokio::test]
    async fn test_persistent_transport_failure_is_fault() {
        let agent = validator(
            vec![
                Step::Fail(SandboxError::RequestFailed("down".to_string())),
                Step::Fail(SandboxError::RequestFailed("down".to_string())),
            ],
            1,
            Duration::from_secs(5),
        );
        let ctx = RunContext::with_budget(Duration::from_secs(10));
        let err = agent.validate(&capsule(), &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::ValidationFault(_)));
    }

    #[tokio::test]
    async fn test_non_transient_failure_not_retried() {
        let agent = validator(
            vec![Step::Fail(SandboxError::HttpStatus {
                code: 400,
                message: "bad".to_string(),
            })],
            3,
            Duration::from_secs(5),
        );
        let ctx = RunContext::with_budget(Duration::from_secs(10));
        assert!(agent.validate(&capsule(), &ctx).await.is_err());
        assert_eq!(ctx.counters().sandbox_calls(), 1);
    }

    #[tokio::test]
    async fn test_hard_timeout_becomes_synthetic_entry() {
        let agent = validator(vec![Step::Hang], 0, Duration::from_secs(1));
        let ctx = RunContext::with_budget(Duration::from_secs(10));
        let result = agent.validate(&capsule(), &ctx).await.unwrap();
        assert!(!result.all_passed);
        assert_eq!(result.per_test_outcome[0].fault, Some(FaultKind::Timeout));
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let token = CancellationToken::new();
        token.cancel();
        let agent = validator(vec![Step::Respond(passing())], 0, Duration::from_secs(5));
        let ctx = RunContext::new(Duration::from_secs(10), token);
        let err = agent.validate(&capsule(), &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Interrupted(Interrupt::Cancelled)));
    }

    #[tokio::test]
    async fn test_oversize_code_not_sent() {
        let agent = validator(vec![], 0, Duration::from_secs(5));
        let ctx = RunContext::with_budget(Duration::from_secs(10));
        let big = capsule().with_solution("x = 1\n".repeat(10_000));
        let result = agent.validate(&big, &ctx).await.unwrap();
        assert_eq!(result.per_test_outcome[0].fault, Some(FaultKind::Limit));
        assert_eq!(ctx.counters().sandbox_calls(), 0);
    }

    #[test]
    fn test_interpret_sandbox_reports() {
        let timed_out = SandboxResponse {
            timed_out: true,
            ..SandboxResponse::default()
        };
        assert_eq!(
            interpret_response(timed_out, 2).per_test_outcome[0].fault,
            Some(FaultKind::Timeout)
        );

        let faulted = SandboxResponse {
            fault_message: Some("OOM killed".to_string()),
            ..SandboxResponse::default()
        };
        let result = interpret_response(faulted, 2);
        assert_eq!(result.per_test_outcome[0].fault, Some(FaultKind::Sandbox));
        assert!(result.summary().contains("OOM"));

        let short = SandboxResponse {
            per_test_outcome: vec![TestOutcome::pass(0)],
            ..SandboxResponse::default()
        };
        assert!(!interpret_response(short, 2).all_passed);
    }

    #[test]
    fn test_interpret_assigns_positions() {
        let mut first = TestOutcome::fail(0, "AssertionError");
        first.test_index = None;
        let mut second = TestOutcome::pass(1);
        second.test_index = None;
        let result = interpret_response(
            SandboxResponse {
                per_test_outcome: vec![first, second],
                ..SandboxResponse::default()
            },
            2,
        );
        assert_eq!(result.failing_indices(), vec![0]);
        assert_eq!(result.passed_count, 1);
    }
}
