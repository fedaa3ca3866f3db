//! Debugger stage: the bounded repair loop that follows a failed validation.
//!
//! Each iteration walks `Analyzing -> ProposingFix -> Validating` and ends in
//! `Resolved`, another iteration, or `Exhausted`. The iteration count is a
//! counted loop over `1..=max_attempts`, so the session can never exceed its
//! bound. Failure analysis is local pattern classification; only the fix
//! proposal calls the backend.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capsule::syntax;
use crate::capsule::{CodeGenerationResult, FaultKind, TestCase, TestOutcome, ValidationResult};
use crate::llm::LlmProvider;
use crate::pipeline::config::TestRewritePolicy;
use crate::pipeline::context::{Interrupt, RunContext};

use super::backend::{request_json, BackendSettings};
use super::error::{AgentError, AgentResult};
use super::validator::ValidatorAgent;

/// Log target for fixes that change the test contract instead of the code.
pub const CONTRACT_LOG_TARGET: &str = "capsule_forge::contract";

/// System prompt for fix proposals.
pub const DEBUGGER_SYSTEM_PROMPT: &str = r#"You are debugging the reference solution of an interactive coding exercise.

You get the problem statement, the current solution, the test cases and the failures from the last run.
Propose exactly one fix:
- Prefer changing the solution. The tests define the contract learners are graded against.
- Only change the tests when a test is clearly wrong: its expected output contradicts the problem statement.
- Never delete tests to make the suite pass.

Return the complete replacement, not a diff."#;

const DEBUGGER_USER_TEMPLATE: &str = r#"Problem statement:
{problem}

Language: {language}

Current solution:
```
{solution}
```

Test cases (index: input_args -> expected_output):
{tests}

Failure category: {category}
Suspected cause: {cause}
Failures:
{failures}
{history}
Output as JSON, either
{"target": "solution", "solution_code": "complete corrected solution", "rationale": "what was wrong"}
or, only if a test is wrong,
{"target": "test_cases", "test_cases": [{"input_args": [], "expected_output": null, "description": ""}], "rationale": "why the test was wrong"}

IMPORTANT: Output ONLY the JSON object, no additional text."#;

/// Failure classes, highest repair priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    SyntaxError,
    RuntimeException,
    Timeout,
    AssertionMismatch,
}

impl ErrorCategory {
    /// Lower is repaired first. Syntax must be fixed before logic can be judged.
    pub fn priority(&self) -> u8 {
        match self {
            ErrorCategory::SyntaxError => 0,
            ErrorCategory::RuntimeException => 1,
            ErrorCategory::Timeout => 2,
            ErrorCategory::AssertionMismatch => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::RuntimeException => "runtime_exception",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::AssertionMismatch => "assertion_mismatch",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn syntax_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(syntax\s*error|indentationerror|taberror|parse\s*error|unexpected (token|end of input|eof)|compilation (error|failed)|cannot find symbol|expected ['`;)\]}]|missing ['`;)\]}])",
        )
        .expect("static regex")
    })
}

fn timeout_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(timed? ?out|time limit exceeded|deadline exceeded)").expect("static regex")
    })
}

fn assertion_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(assert|expected .+ (but )?(got|was|received|actual)|mismatch|wrong answer)")
            .expect("static regex")
    })
}

/// Classifies one failing outcome.
///
/// Fault markers win over message text. A failure with no message is
/// treated as a plain wrong answer.
pub fn classify_outcome(outcome: &TestOutcome) -> ErrorCategory {
    match outcome.fault {
        Some(FaultKind::Syntax) => return ErrorCategory::SyntaxError,
        Some(FaultKind::Timeout) => return ErrorCategory::Timeout,
        Some(FaultKind::Limit) | Some(FaultKind::Sandbox) => {
            return ErrorCategory::RuntimeException
        }
        None => {}
    }

    let Some(message) = outcome.error.as_deref().filter(|m| !m.trim().is_empty()) else {
        return ErrorCategory::AssertionMismatch;
    };

    if syntax_pattern().is_match(message) {
        ErrorCategory::SyntaxError
    } else if timeout_pattern().is_match(message) {
        ErrorCategory::Timeout
    } else if assertion_pattern().is_match(message) {
        ErrorCategory::AssertionMismatch
    } else {
        ErrorCategory::RuntimeException
    }
}

/// Diagnosis of one failed validation. Input to exactly one fix attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub failing_test_indices: Vec<usize>,
    pub error_category: ErrorCategory,
    pub suspected_cause: String,
}

impl ErrorAnalysis {
    /// Picks the highest-priority category among the failures.
    pub fn from_validation(validation: &ValidationResult, capsule: &CodeGenerationResult) -> Self {
        let failures: Vec<(&TestOutcome, ErrorCategory)> = validation
            .failures()
            .map(|o| (o, classify_outcome(o)))
            .collect();

        let Some(&(lead, error_category)) = failures
            .iter()
            .min_by_key(|(outcome, category)| (category.priority(), outcome.test_index))
        else {
            return Self {
                failing_test_indices: Vec::new(),
                error_category: ErrorCategory::AssertionMismatch,
                suspected_cause: "validation did not pass but reported no failing test".to_string(),
            };
        };

        let message = lead.error.as_deref().unwrap_or("wrong result");
        let suspected_cause = match lead.test_index {
            Some(index) => match capsule.test_description(index) {
                Some(description) => format!("test {} ({}): {}", index, description, message),
                None => format!("test {}: {}", index, message),
            },
            None => message.to_string(),
        };

        Self {
            failing_test_indices: validation.failing_indices(),
            error_category,
            suspected_cause,
        }
    }
}

/// What a fix attempt replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum FixPatch {
    Solution { solution_code: String },
    TestCases { test_cases: Vec<TestCase> },
}

impl FixPatch {
    pub fn rewrites_tests(&self) -> bool {
        matches!(self, FixPatch::TestCases { .. })
    }

    fn apply(&self, capsule: &CodeGenerationResult) -> CodeGenerationResult {
        match self {
            FixPatch::Solution { solution_code } => capsule.with_solution(solution_code.clone()),
            FixPatch::TestCases { test_cases } => capsule.with_test_cases(test_cases.clone()),
        }
    }
}

/// One iteration of the repair loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub analysis: ErrorAnalysis,
    pub patch: FixPatch,
    pub rationale: String,
    pub resulting_validation: ValidationResult,
}

/// Why a session ended without a passing validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    MaxAttempts,
    BudgetExhausted,
    Cancelled,
    FixGenerationFailed,
    /// The sandbox failed while revalidating a fix.
    SandboxFault,
}

impl From<Interrupt> for ExhaustionReason {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => ExhaustionReason::Cancelled,
            Interrupt::BudgetExhausted => ExhaustionReason::BudgetExhausted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DebugOutcome {
    Resolved,
    Exhausted { reason: ExhaustionReason },
}

/// Ordered record of a repair loop. Terminal once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggingSession {
    pub attempts: Vec<FixAttempt>,
    pub outcome: DebugOutcome,
}

impl DebuggingSession {
    pub fn is_resolved(&self) -> bool {
        self.outcome == DebugOutcome::Resolved
    }

    /// Whether any attempt replaced the test cases.
    pub fn tests_rewritten(&self) -> bool {
        self.attempts.iter().any(|a| a.patch.rewrites_tests())
    }
}

/// Session plus the capsule and validation it ended on.
#[derive(Debug, Clone)]
pub struct DebugRun {
    pub session: DebuggingSession,
    pub capsule: CodeGenerationResult,
    pub validation: ValidationResult,
}

/// Debugger states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebugState {
    Analyzing,
    ProposingFix,
    Validating,
    Resolved,
    Exhausted,
}

#[derive(Debug, Deserialize)]
struct FixResponse {
    target: String,
    #[serde(default)]
    solution_code: Option<String>,
    #[serde(default)]
    test_cases: Option<Vec<TestCase>>,
    #[serde(default)]
    rationale: String,
}

/// Configuration for the Debugger Agent.
#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    pub backend: BackendSettings,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default().with_max_tokens(6000),
        }
    }
}

/// Debugger Agent running the bounded repair loop.
pub struct DebuggerAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: DebuggerConfig,
}

impl std::fmt::Debug for DebuggerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DebuggerAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "debugger";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: DebuggerConfig) -> Self {
        Self { llm_client, config }
    }

    /// Repairs `capsule` until validation passes or `max_attempts` fixes are spent.
    ///
    /// Cancellation, budget exhaustion, unusable fix proposals and sandbox
    /// faults all end the session as `Exhausted`, keeping the attempts made.
    pub async fn debug(
        &self,
        capsule: CodeGenerationResult,
        validation: ValidationResult,
        max_attempts: u32,
        policy: TestRewritePolicy,
        validator: &ValidatorAgent,
        ctx: &RunContext,
    ) -> DebugRun {
        let mut attempts: Vec<FixAttempt> = Vec::new();
        let mut current = capsule;
        let mut last_validation = validation;

        for attempt_number in 1..=max_attempts {
            transition(attempt_number, DebugState::Analyzing);
            let analysis = ErrorAnalysis::from_validation(&last_validation, &current);
            tracing::debug!(
                attempt = attempt_number,
                category = %analysis.error_category,
                failing = ?analysis.failing_test_indices,
                "Debugger analysis"
            );

            transition(attempt_number, DebugState::ProposingFix);
            let (patch, rationale) = match self
                .propose_fix(&current, &last_validation, &analysis, &attempts, policy, ctx)
                .await
            {
                Ok(fix) => fix,
                Err(AgentError::Interrupted(interrupt)) => {
                    return exhausted(attempts, current, last_validation, interrupt.into());
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt_number, error = %e, "Debugger could not generate a fix");
                    return exhausted(
                        attempts,
                        current,
                        last_validation,
                        ExhaustionReason::FixGenerationFailed,
                    );
                }
            };

            if patch.rewrites_tests() {
                tracing::warn!(
                    target: CONTRACT_LOG_TARGET,
                    attempt = attempt_number,
                    policy = ?policy,
                    rationale = %rationale,
                    "Debugger fix rewrites test cases"
                );
            }

            transition(attempt_number, DebugState::Validating);
            let candidate = patch.apply(&current);
            let resulting_validation = match revalidate(&candidate, validator, ctx).await {
                Ok(result) => result,
                Err(AgentError::Interrupted(interrupt)) => {
                    return exhausted(attempts, current, last_validation, interrupt.into());
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt_number, error = %e, "Sandbox failed during debugging");
                    let faulted = ValidationResult::fault(
                        FaultKind::Sandbox,
                        e.to_string(),
                        candidate.test_cases.len(),
                    );
                    attempts.push(FixAttempt {
                        attempt_number,
                        analysis,
                        patch,
                        rationale,
                        resulting_validation: faulted.clone(),
                    });
                    return exhausted(attempts, candidate, faulted, ExhaustionReason::SandboxFault);
                }
            };

            let resolved = resulting_validation.all_passed;
            attempts.push(FixAttempt {
                attempt_number,
                analysis,
                patch,
                rationale,
                resulting_validation: resulting_validation.clone(),
            });
            current = candidate;
            last_validation = resulting_validation;

            if resolved {
                transition(attempt_number, DebugState::Resolved);
                return DebugRun {
                    session: DebuggingSession {
                        attempts,
                        outcome: DebugOutcome::Resolved,
                    },
                    capsule: current,
                    validation: last_validation,
                };
            }
        }

        transition(max_attempts, DebugState::Exhausted);
        exhausted(
            attempts,
            current,
            last_validation,
            ExhaustionReason::MaxAttempts,
        )
    }

    async fn propose_fix(
        &self,
        capsule: &CodeGenerationResult,
        validation: &ValidationResult,
        analysis: &ErrorAnalysis,
        history: &[FixAttempt],
        policy: TestRewritePolicy,
        ctx: &RunContext,
    ) -> AgentResult<(FixPatch, String)> {
        let prompt = build_prompt(capsule, validation, analysis, history);
        let current_solution = capsule.solution_code.trim().to_string();
        let min_tests = capsule.test_cases.len();
        let language = capsule.language;

        let response: FixResponse = request_json(
            self.llm_client.as_ref(),
            ctx,
            &self.config.backend,
            Self::AGENT_NAME,
            DEBUGGER_SYSTEM_PROMPT,
            &prompt,
            |r: FixResponse| match r.target.trim() {
                "solution" => match r.solution_code.as_deref().map(str::trim) {
                    Some(code) if code.is_empty() => Err("solution_code is empty".to_string()),
                    Some(code) if code == current_solution => {
                        Err("solution_code is unchanged".to_string())
                    }
                    Some(_) => Ok(r),
                    None => Err("target is solution but solution_code is missing".to_string()),
                },
                "test_cases" => {
                    if policy == TestRewritePolicy::Forbid {
                        return Err("test case rewrites are not allowed".to_string());
                    }
                    match r.test_cases.as_ref() {
                        Some(tests) if tests.len() >= min_tests => Ok(r),
                        Some(tests) => Err(format!(
                            "rewrite would drop tests ({} < {})",
                            tests.len(),
                            min_tests
                        )),
                        None => Err("target is test_cases but test_cases is missing".to_string()),
                    }
                }
                other => Err(format!("unknown fix target '{}'", other)),
            },
        )
        .await?;

        let rationale = if response.rationale.trim().is_empty() {
            format!("Addressed {}", analysis.error_category)
        } else {
            response.rationale.trim().to_string()
        };

        let patch = match (response.solution_code, response.test_cases) {
            (Some(solution_code), _) if response.target.trim() == "solution" => {
                FixPatch::Solution { solution_code }
            }
            (_, Some(test_cases)) => FixPatch::TestCases { test_cases },
            _ => {
                return Err(AgentError::ResponseParseError(
                    "fix response has no payload".to_string(),
                ))
            }
        };

        tracing::debug!(language = %language, target = ?patch_target(&patch), "Fix proposed");
        Ok((patch, rationale))
    }
}

/// Revalidates a candidate; code that does not parse never reaches the sandbox.
async fn revalidate(
    candidate: &CodeGenerationResult,
    validator: &ValidatorAgent,
    ctx: &RunContext,
) -> AgentResult<ValidationResult> {
    if let Err(issue) = syntax::check(candidate.language, &candidate.solution_code) {
        return Ok(ValidationResult::syntax_failure(
            issue.to_string(),
            candidate.test_cases.len(),
        ));
    }
    validator.validate(candidate, ctx).await
}

fn exhausted(
    attempts: Vec<FixAttempt>,
    capsule: CodeGenerationResult,
    validation: ValidationResult,
    reason: ExhaustionReason,
) -> DebugRun {
    tracing::debug!(
        attempts = attempts.len(),
        reason = ?reason,
        "Debugger session exhausted"
    );
    DebugRun {
        session: DebuggingSession {
            attempts,
            outcome: DebugOutcome::Exhausted { reason },
        },
        capsule,
        validation,
    }
}

fn transition(attempt: u32, state: DebugState) {
    tracing::debug!(attempt, state = ?state, "Debugger state transition");
}

fn patch_target(patch: &FixPatch) -> &'static str {
    match patch {
        FixPatch::Solution { .. } => "solution",
        FixPatch::TestCases { .. } => "test_cases",
    }
}

fn build_prompt(
    capsule: &CodeGenerationResult,
    validation: &ValidationResult,
    analysis: &ErrorAnalysis,
    history: &[FixAttempt],
) -> String {
    let tests = capsule
        .test_cases
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                "{}: {} -> {}{}",
                i,
                serde_json::Value::Array(t.input_args.clone()),
                t.expected_output,
                if t.description.is_empty() {
                    String::new()
                } else {
                    format!("  # {}", t.description)
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let failures = validation
        .failures()
        .map(|o| {
            let label = o
                .test_index
                .map(|i| format!("test {}", i))
                .unwrap_or_else(|| "run".to_string());
            let actual = o
                .actual_output
                .as_ref()
                .map(|v| format!(" (actual: {})", v))
                .unwrap_or_default();
            format!(
                "- {}: {}{}",
                label,
                o.error.as_deref().unwrap_or("failed"),
                actual
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let history = if history.is_empty() {
        String::new()
    } else {
        let lines = history
            .iter()
            .map(|a| {
                format!(
                    "- attempt {} changed the {} ({}) and then {}",
                    a.attempt_number,
                    patch_target(&a.patch),
                    a.rationale,
                    a.resulting_validation.summary()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nEarlier attempts that did not work:\n{}\n", lines)
    };

    DEBUGGER_USER_TEMPLATE
        .replace("{problem}", &capsule.problem_statement)
        .replace("{language}", capsule.language.as_str())
        .replace("{solution}", &capsule.solution_code)
        .replace("{tests}", &tests)
        .replace("{category}", analysis.error_category.as_str())
        .replace("{cause}", &analysis.suspected_cause)
        .replace("{failures}", &failures)
        .replace("{history}", &history)
}
