//! Shared fakes for the integration tests.
//!
//! `ScriptedLlm` answers by system prompt, so each stage gets its own queue
//! of replies. `FnSandbox` grades requests with a closure and records how
//! many ran at once.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use capsule_forge::agents::coder::{CODER_CODE_SYSTEM_PROMPT, CODER_PLAN_SYSTEM_PROMPT};
use capsule_forge::agents::debugger::DEBUGGER_SYSTEM_PROMPT;
use capsule_forge::agents::pedagogist::PEDAGOGIST_SYSTEM_PROMPT;
use capsule_forge::capsule::TestOutcome;
use capsule_forge::error::{LlmError, SandboxError};
use capsule_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use capsule_forge::pipeline::{PipelineConfig, PipelineOrchestrator};
use capsule_forge::sandbox::{Sandbox, SandboxRequest, SandboxResponse};
use capsule_forge::storage::CapsuleStore;

// ============================================================================
// Backend
// ============================================================================

/// Replies per system prompt; the last reply in a queue repeats.
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    /// (system prompt, user prompt) per call.
    calls: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reply(self, system_prompt: &str, content: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(system_prompt.to_string())
            .or_default()
            .push_back(content.into());
        self
    }

    /// Number of calls made with `system_prompt`.
    pub fn calls(&self, system_prompt: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system.as_str() == system_prompt)
            .count()
    }

    /// User prompts sent with `system_prompt`, oldest first.
    pub fn user_prompts(&self, system_prompt: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system.as_str() == system_prompt)
            .map(|(_, user)| user.clone())
            .collect()
    }

    /// The usual happy path up to the code stage.
    pub fn accepting(solution: &str) -> Self {
        Self::new()
            .reply(PEDAGOGIST_SYSTEM_PROMPT, analysis_reply(0.9, 0.9))
            .reply(CODER_PLAN_SYSTEM_PROMPT, plan_reply())
            .reply(CODER_CODE_SYSTEM_PROMPT, code_reply(solution, two_sum_tests()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let prompt = request.system_prompt().unwrap_or_default().to_string();
        let user = request
            .messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.calls.lock().unwrap().push((prompt.clone(), user));

        let content = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&prompt).ok_or_else(|| LlmError::ApiError {
                code: 500,
                message: "no scripted reply for this stage".to_string(),
            })?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }
        .ok_or_else(|| LlmError::ApiError {
            code: 500,
            message: "script exhausted".to_string(),
        })?;

        Ok(GenerationResponse {
            id: "scripted".to_string(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
        })
    }
}

pub fn analysis_reply(specificity: f64, plausibility: f64) -> String {
    json!({
        "objectives": ["use a hash map for constant-time lookups", "return indices, not values"],
        "concepts": ["hash maps", "iteration", "indices"],
        "specificity": specificity,
        "difficulty_plausibility": plausibility,
        "rationale": "classic warm-up exercise"
    })
    .to_string()
}

pub fn plan_reply() -> String {
    json!({
        "approach_summary": "scan once, remembering the index of every value seen",
        "required_test_case_count": 3,
        "constraints": ["exactly one valid pair exists"]
    })
    .to_string()
}

pub fn code_reply(solution: &str, tests: Value) -> String {
    json!({
        "problem_statement": "Return the indices of the two numbers that add up to target.",
        "starter_code": "def solve(nums, target):\n    pass\n",
        "solution_code": solution,
        "test_cases": tests
    })
    .to_string()
}

pub fn solution_fix_reply(solution: &str) -> String {
    json!({
        "target": "solution",
        "solution_code": solution,
        "rationale": "inner loop stopped one element early"
    })
    .to_string()
}

pub fn tests_fix_reply(tests: Value) -> String {
    json!({
        "target": "test_cases",
        "test_cases": tests,
        "rationale": "expected output contradicted the statement"
    })
    .to_string()
}

// ============================================================================
// Two-sum fixture
// ============================================================================

pub const CORRECT_SOLUTION: &str = "def solve(nums, target):
    for i in range(len(nums)):
        for j in range(i + 1, len(nums)):
            if nums[i] + nums[j] == target:
                return [i, j]
    return []
";

/// Never looks at the last element; only the third test needs it.
pub const OFF_BY_ONE_SOLUTION: &str = "def solve(nums, target):
    for i in range(len(nums)):
        for j in range(i + 1, len(nums) - 1):
            if nums[i] + nums[j] == target:
                return [i, j]
    return []
";

/// Different code, same bug.
pub const STILL_BROKEN_FIXES: [&str; 2] = [
    "def solve(nums, target):
    last = len(nums) - 1
    for i in range(last):
        for j in range(i + 1, last):
            if nums[i] + nums[j] == target:
                return [i, j]
    return []
",
    "def solve(nums, target):
    for i, a in enumerate(nums[:len(nums) - 1]):
        for j in range(i + 1, len(nums) - 1):
            if a + nums[j] == target:
                return [i, j]
    return []
",
];

pub fn two_sum_tests() -> Value {
    json!([
        {"input_args": [[2, 7, 11, 15], 9], "expected_output": [0, 1], "description": "pair at the front"},
        {"input_args": [[3, 2, 4, 1], 6], "expected_output": [1, 2], "description": "pair in the middle"},
        {"input_args": [[1, 2, 3], 5], "expected_output": [1, 2], "description": "pair includes the last element"}
    ])
}

/// Same tests with a wrong expectation on the last one.
pub fn two_sum_tests_with_bad_expectation() -> Value {
    json!([
        {"input_args": [[2, 7, 11, 15], 9], "expected_output": [0, 1], "description": "pair at the front"},
        {"input_args": [[3, 2, 4, 1], 6], "expected_output": [1, 2], "description": "pair in the middle"},
        {"input_args": [[1, 2, 3], 5], "expected_output": [0, 2], "description": "pair includes the last element"}
    ])
}

fn two_sum(nums: &[i64], target: i64, skip_last: bool) -> Vec<usize> {
    let end = if skip_last {
        nums.len().saturating_sub(1)
    } else {
        nums.len()
    };
    for i in 0..nums.len() {
        for j in (i + 1)..end {
            if nums[i] + nums[j] == target {
                return vec![i, j];
            }
        }
    }
    Vec::new()
}

/// Grades two-sum requests the way the scripted solutions would behave.
pub fn grade_two_sum(request: &SandboxRequest) -> SandboxResponse {
    let skip_last = request.solution_code.contains("len(nums) - 1");
    let per_test_outcome = request
        .test_cases
        .iter()
        .enumerate()
        .map(|(index, test)| {
            let nums: Vec<i64> = test
                .input_args
                .first()
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            let target = test.input_args.get(1).and_then(Value::as_i64).unwrap_or(0);
            let actual = json!(two_sum(&nums, target, skip_last));
            if actual == test.expected_output {
                TestOutcome::pass(index)
            } else {
                TestOutcome::fail(
                    index,
                    format!(
                        "AssertionError: expected {}, got {}",
                        test.expected_output, actual
                    ),
                )
            }
        })
        .collect();
    SandboxResponse {
        per_test_outcome,
        timed_out: false,
        fault_message: None,
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// Sandbox backed by a grading closure.
pub struct FnSandbox<F> {
    grade: F,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<F> FnSandbox<F>
where
    F: Fn(&SandboxRequest) -> SandboxResponse + Send + Sync,
{
    pub fn new(grade: F) -> Self {
        Self {
            grade,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Sandbox for FnSandbox<F>
where
    F: Fn(&SandboxRequest) -> SandboxResponse + Send + Sync,
{
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = (self.grade)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

pub fn two_sum_sandbox() -> FnSandbox<fn(&SandboxRequest) -> SandboxResponse> {
    FnSandbox::new(grade_two_sum as fn(&SandboxRequest) -> SandboxResponse)
}

// ============================================================================
// Wiring
// ============================================================================

pub fn test_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_backend_call_timeout(Duration::from_secs(5))
        .with_wall_clock_budget(Duration::from_secs(30))
}

pub fn orchestrator(
    llm: Arc<ScriptedLlm>,
    sandbox: Arc<dyn Sandbox>,
    store: Arc<dyn CapsuleStore>,
    config: PipelineConfig,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(llm, sandbox, store, config).expect("valid test config")
}
