//! AI Mentor: live hints for a learner stuck on a failing test.
//!
//! The mentor is stateless per call. How specific a hint may be is decided
//! by the prior-hint count the caller sends. Hints never contain the
//! reference solution; a backend hint that would leak it is replaced by a
//! templated one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::{analyze, patterns_for_test, AnalyticsConfig, ErrorPattern, EventTracker};
use crate::capsule::{CodeGenerationResult, TestCase};
use crate::error::StorageError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::metrics::MetricsCollector;
use crate::storage::CapsuleStore;

/// System prompt for hint generation.
pub const MENTOR_SYSTEM_PROMPT: &str = r#"You are a patient programming mentor helping a learner who is stuck on one failing test of a coding exercise.

Rules:
- Never give the learner the reference solution or any line of it.
- Never write the finished function for them.
- Refer to their own code and to the failing test.
- Answer in at most four sentences, plain text, no code blocks."#;

const MENTOR_USER_TEMPLATE: &str = r#"Exercise:
{problem}

Reference solution (for your understanding only, do NOT reveal):
```
{solution}
```

Learner's current code:
```
{learner_code}
```

Failing test {test_index}: {test}
{patterns}
Hint level: {stage}. {stage_instruction}"#;

/// Minimum compacted length of a solution line that counts as a leak.
pub const LEAK_LINE_CHARS: usize = 24;

/// Minimum compacted length of a short body line that counts as a leak
/// when it carries code punctuation.
pub const LEAK_BODY_CHARS: usize = 12;

/// How specific a hint may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintStage {
    Nudge,
    Concept,
    Approach,
    Pseudocode,
}

impl HintStage {
    /// Stage for the next hint given how many the learner already received.
    pub fn for_prior_hints(prior_hint_count: u32) -> Self {
        match prior_hint_count {
            0 => HintStage::Nudge,
            1 => HintStage::Concept,
            2 => HintStage::Approach,
            _ => HintStage::Pseudocode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HintStage::Nudge => "nudge",
            HintStage::Concept => "concept",
            HintStage::Approach => "approach",
            HintStage::Pseudocode => "pseudocode",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            HintStage::Nudge => "Point at where to look without saying what is wrong.",
            HintStage::Concept => "Name the concept or edge case the learner is missing.",
            HintStage::Approach => "Describe the approach that fixes the failing case in words.",
            HintStage::Pseudocode => {
                "Give short numbered pseudocode steps for the failing case, not real code."
            }
        }
    }
}

impl std::fmt::Display for HintStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintSource {
    Backend,
    Template,
}

impl HintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HintSource::Backend => "backend",
            HintSource::Template => "template",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorRequest {
    pub capsule_id: Uuid,
    pub learner_code_snapshot: String,
    pub failing_test_id: usize,
    /// Hints already shown in this learner session.
    #[serde(default)]
    pub prior_hint_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorHint {
    pub text: String,
    pub stage_hint: HintStage,
    pub source: HintSource,
}

/// Configuration for the Mentor Agent.
#[derive(Debug, Clone)]
pub struct MentorConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub call_timeout: Duration,
}

impl Default for MentorConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.3,
            max_tokens: 400,
            call_timeout: Duration::from_secs(8),
        }
    }
}

impl MentorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Mentor Agent producing one hint per call.
pub struct MentorAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: MentorConfig,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for MentorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MentorAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MentorAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "mentor";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: MentorConfig) -> Self {
        Self {
            llm_client,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Produces a hint. Never fails: backend problems fall back to a template.
    pub async fn hint(
        &self,
        capsule: &CodeGenerationResult,
        request: &MentorRequest,
        patterns: &[ErrorPattern],
    ) -> MentorHint {
        let stage = HintStage::for_prior_hints(request.prior_hint_count);
        let test = capsule.test_cases.get(request.failing_test_id);
        let relevant = patterns_for_test(patterns, request.failing_test_id);

        let hint = match self.ask_backend(capsule, request, stage, &relevant).await {
            Some(text) if !leaks_solution(&text, &capsule.solution_code) => MentorHint {
                text,
                stage_hint: stage,
                source: HintSource::Backend,
            },
            Some(_) => {
                tracing::warn!(
                    capsule_id = %request.capsule_id,
                    stage = %stage,
                    "Mentor hint revealed solution code, using template"
                );
                template_hint(stage, request.failing_test_id, test, relevant.first().copied())
            }
            None => template_hint(stage, request.failing_test_id, test, relevant.first().copied()),
        };

        self.metrics
            .record_mentor_hint(hint.stage_hint.as_str(), hint.source.as_str());
        hint
    }

    async fn ask_backend(
        &self,
        capsule: &CodeGenerationResult,
        request: &MentorRequest,
        stage: HintStage,
        patterns: &[&ErrorPattern],
    ) -> Option<String> {
        let prompt = build_prompt(capsule, request, stage, patterns);
        let generation = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(MENTOR_SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        match tokio::time::timeout(self.config.call_timeout, self.llm_client.generate(generation)).await {
            Ok(Ok(response)) => {
                self.metrics.record_backend_call(
                    Self::AGENT_NAME,
                    "success",
                    response.usage.total_tokens,
                );
                response
                    .first_content()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
            }
            Ok(Err(e)) => {
                self.metrics.record_backend_call(Self::AGENT_NAME, "error", 0);
                tracing::warn!(capsule_id = %request.capsule_id, error = %e, "Mentor backend call failed");
                None
            }
            Err(_) => {
                self.metrics.record_backend_call(Self::AGENT_NAME, "timeout", 0);
                tracing::warn!(
                    capsule_id = %request.capsule_id,
                    timeout_ms = self.config.call_timeout.as_millis() as u64,
                    "Mentor backend call timed out"
                );
                None
            }
        }
    }
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whether `hint` contains the whole solution or a substantial line of it.
pub fn leaks_solution(hint: &str, solution: &str) -> bool {
    let hint = compact(hint);
    let whole = compact(solution);
    if !whole.is_empty() && hint.contains(&whole) {
        return true;
    }
    solution
        .lines()
        .filter(|line| !is_signature(line))
        .map(compact)
        .filter(|line| is_specific(line))
        .any(|line| hint.contains(&line))
}

fn is_signature(line: &str) -> bool {
    let line = line.trim_start();
    ["def ", "fn ", "pub fn ", "function ", "class ", "async def ", "export "]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn is_specific(line: &str) -> bool {
    let len = line.chars().count();
    if len >= LEAK_LINE_CHARS {
        return true;
    }
    len >= LEAK_BODY_CHARS
        && line
            .chars()
            .any(|c| matches!(c, '[' | '(' | '=' | '+' | '-' | '*' | '/' | '%' | '<' | '>' | '.'))
}

fn describe_test(index: usize, test: Option<&TestCase>) -> String {
    match test {
        Some(t) if !t.description.trim().is_empty() => {
            format!("test {} ({})", index, t.description.trim())
        }
        _ => format!("test {}", index),
    }
}

/// Hint built from the test and the most common learner error, without the backend.
pub fn template_hint(
    stage: HintStage,
    test_index: usize,
    test: Option<&TestCase>,
    pattern: Option<&ErrorPattern>,
) -> MentorHint {
    let subject = describe_test(test_index, test);
    let common = pattern
        .map(|p| format!(" Many learners see \"{}\" here.", p.signature))
        .unwrap_or_default();
    let io = test.map(|t| {
        (
            serde_json::Value::Array(t.input_args.clone()).to_string(),
            t.expected_output.to_string(),
        )
    });

    let text = match (stage, io) {
        (HintStage::Nudge, _) => format!(
            "Look closely at {}. What does your function return for that input, and what did the test expect?{}",
            subject, common
        ),
        (HintStage::Concept, _) => format!(
            "{} checks a case your code does not handle yet. Think about which edge case or concept it is about.{}",
            capitalize(&subject),
            common
        ),
        (HintStage::Approach, Some((input, expected))) => format!(
            "Trace your code by hand with the input {} from {}. It should produce {}; find the first step where your values differ from what you expect.{}",
            input, subject, expected, common
        ),
        (HintStage::Approach, None) => format!(
            "Trace your code by hand with the input from {} and find the first step where the values differ from what you expect.{}",
            subject, common
        ),
        (HintStage::Pseudocode, Some((input, expected))) => format!(
            "1. Take the input {} from {}. 2. Write down each intermediate value your code computes. 3. Decide which step must change so the result becomes {}. 4. Make sure the change does not break the tests that already pass.{}",
            input, subject, expected, common
        ),
        (HintStage::Pseudocode, None) => format!(
            "1. Take the input from {}. 2. Write down each intermediate value your code computes. 3. Decide which step must change. 4. Re-run every test.{}",
            subject, common
        ),
    };

    MentorHint {
        text,
        stage_hint: stage,
        source: HintSource::Template,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn build_prompt(
    capsule: &CodeGenerationResult,
    request: &MentorRequest,
    stage: HintStage,
    patterns: &[&ErrorPattern],
) -> String {
    let test = capsule
        .test_cases
        .get(request.failing_test_id)
        .map(|t| {
            format!(
                "{} -> {} ({})",
                serde_json::Value::Array(t.input_args.clone()),
                t.expected_output,
                t.description
            )
        })
        .unwrap_or_else(|| "unknown test".to_string());

    let patterns = if patterns.is_empty() {
        String::new()
    } else {
        let lines = patterns
            .iter()
            .take(3)
            .map(|p| format!("- \"{}\" ({} learners)", p.signature, p.distinct_learners))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Errors other learners commonly hit on this test:\n{}\n", lines)
    };

    MENTOR_USER_TEMPLATE
        .replace("{problem}", &capsule.problem_statement)
        .replace("{solution}", &capsule.solution_code)
        .replace("{learner_code}", &request.learner_code_snapshot)
        .replace("{test_index}", &request.failing_test_id.to_string())
        .replace("{test}", &test)
        .replace("{patterns}", &patterns)
        .replace("{stage}", stage.as_str())
        .replace("{stage_instruction}", stage.instruction())
}

/// Answers mentor requests from stored capsules and learner history.
///
/// Read-only: neither the store nor the tracker is written.
pub struct MentorService {
    agent: MentorAgent,
    store: Arc<dyn CapsuleStore>,
    tracker: Arc<EventTracker>,
    analytics: AnalyticsConfig,
}

impl std::fmt::Debug for MentorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MentorService")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl MentorService {
    pub fn new(
        agent: MentorAgent,
        store: Arc<dyn CapsuleStore>,
        tracker: Arc<EventTracker>,
        analytics: AnalyticsConfig,
    ) -> Self {
        Self {
            agent,
            store,
            tracker,
            analytics,
        }
    }

    /// # Errors
    ///
    /// `StorageError::NotFound` when the capsule does not exist.
    pub async fn answer(&self, request: &MentorRequest) -> Result<MentorHint, StorageError> {
        let record = self.store.require(request.capsule_id).await?;
        let window = self.tracker.full_window(request.capsule_id).await;
        let patterns = analyze(&window, &self.analytics).patterns;

        tracing::debug!(
            capsule_id = %request.capsule_id,
            test = request.failing_test_id,
            prior_hints = request.prior_hint_count,
            patterns = patterns.len(),
            "Answering mentor request"
        );
        Ok(self.agent.hint(&record.capsule, request, &patterns).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedLlm {
        reply: Result<String, ()>,
        delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            tokio::time::sleep(self.delay).await;
            let content = self
                .reply
                .clone()
                .map_err(|_| LlmError::RequestFailed("down".to_string()))?;
            Ok(GenerationResponse {
                id: "mock".to_string(),
                model: "mock".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn agent(reply: Result<&str, ()>, delay: Duration) -> MentorAgent {
        MentorAgent::new(
            Arc::new(FixedLlm {
                reply: reply.map(str::to_string),
                delay,
            }),
            MentorConfig::default().with_call_timeout(Duration::from_millis(100)),
        )
    }

    fn capsule() -> CodeGenerationResult {
        use crate::capsule::{Language, RuntimeTier};
        CodeGenerationResult {
            problem_statement: "Return the largest value in xs, or None for an empty list.".to_string(),
            starter_code: "def solve(xs):\n    pass\n".to_string(),
            solution_code: "def solve(xs):\n    if not xs:\n        return None\n    return max(xs, key=lambda value: value)\n".to_string(),
            test_cases: vec![
                TestCase::new(vec![json!([1, 3, 2])], json!(3), "mixed values"),
                TestCase::new(vec![json!([])], json!(null), "empty list"),
            ],
            language: Language::Python,
            runtime_tier: RuntimeTier::Wasm,
        }
    }

    fn request(prior: u32) -> MentorRequest {
        MentorRequest {
            capsule_id: Uuid::new_v4(),
            learner_code_snapshot: "def solve(xs):\n    return max(xs)\n".to_string(),
            failing_test_id: 1,
            prior_hint_count: prior,
        }
    }

    #[test]
    fn test_stage_escalation() {
        assert_eq!(HintStage::for_prior_hints(0), HintStage::Nudge);
        assert_eq!(HintStage::for_prior_hints(1), HintStage::Concept);
        assert_eq!(HintStage::for_prior_hints(2), HintStage::Approach);
        assert_eq!(HintStage::for_prior_hints(3), HintStage::Pseudocode);
        assert_eq!(HintStage::for_prior_hints(40), HintStage::Pseudocode);
    }

    #[test]
    fn test_leak_detection() {
        let solution = capsule().solution_code;
        assert!(leaks_solution(&solution, &solution));
        assert!(leaks_solution(
            "Try this: return max(xs, key=lambda value: value)",
            &solution
        ));
        // short lines are not specific enough to count
        assert!(!leaks_solution("Remember `return None` for empty input.", &solution));
        assert!(!leaks_solution("What happens when xs is empty?", &solution));
    }

    #[test]
    fn test_one_line_body_leaks() {
        let solution = "def reverse(s):\n    return s[::-1]\n";
        assert!(leaks_solution("Just change your body to: return s[::-1]", solution));
        assert!(!leaks_solution("Think about slicing with a negative step.", solution));
        // the signature alone is already in the starter code
        assert!(!leaks_solution("Your def reverse(s): looks fine.", solution));
    }

    #[tokio::test]
    async fn test_backend_hint_used() {
        let hint = agent(Ok("What does max() do with an empty list?"), Duration::ZERO)
            .hint(&capsule(), &request(0), &[])
            .await;
        assert_eq!(hint.source, HintSource::Backend);
        assert_eq!(hint.stage_hint, HintStage::Nudge);
    }

    #[tokio::test]
    async fn test_leaking_hint_replaced() {
        let hint = agent(
            Ok("Just write: return max(xs, key=lambda value: value)"),
            Duration::ZERO,
        )
        .hint(&capsule(), &request(3), &[])
        .await;
        assert_eq!(hint.source, HintSource::Template);
        assert_eq!(hint.stage_hint, HintStage::Pseudocode);
        assert!(hint.text.contains("empty list"));
        assert!(!leaks_solution(&hint.text, &capsule().solution_code));
    }

    #[tokio::test]
    async fn test_timeout_and_failure_fall_back() {
        let slow = agent(Ok("late"), Duration::from_millis(500))
            .hint(&capsule(), &request(2), &[])
            .await;
        assert_eq!(slow.source, HintSource::Template);
        assert!(slow.text.contains("[[]]"));

        let pattern = ErrorPattern {
            test_index: 1,
            signature: "ValueError: max() arg is an empty sequence".to_string(),
            frequency: 12,
            distinct_learners: 9,
            sample_error: None,
        };
        let failed = agent(Err(()), Duration::ZERO)
            .hint(&capsule(), &request(1), &[pattern])
            .await;
        assert_eq!(failed.source, HintSource::Template);
        assert_eq!(failed.stage_hint, HintStage::Concept);
        assert!(failed.text.starts_with("Test 1 (empty list)"));
        assert!(failed.text.contains("empty sequence"));
    }
}
