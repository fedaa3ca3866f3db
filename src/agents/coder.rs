//! Coder stage: turns an accepted analysis into a plan, then into capsule code.
//!
//! Two backend interactions per request. The plan fixes the approach and
//! the number of tests; the code call produces the problem statement,
//! starter code, reference solution and tests. Starter code must pass the
//! syntax gate on its own. A solution that fails the gate is returned
//! anyway, flagged, so the Debugger can repair it without a sandbox call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capsule::syntax::{self, SyntaxIssue};
use crate::capsule::{CapsuleIdea, CodeGenerationResult, TestCase};
use crate::llm::LlmProvider;
use crate::pipeline::context::RunContext;

use super::backend::{request_json, BackendSettings};
use super::error::AgentResult;
use super::pedagogist::PedagogicalAnalysis;

/// System prompt for the planning call.
pub const CODER_PLAN_SYSTEM_PROMPT: &str = r#"You are a senior developer designing a short interactive coding exercise from an instructor's brief.

Plan before writing code:
1. Summarise the approach a learner is expected to take
2. List constraints the exercise must respect (input ranges, forbidden shortcuts, performance)
3. Decide how many test cases are needed so every learning objective is exercised at least once

Keep the exercise small: one function, solvable in 10-30 minutes at the stated difficulty."#;

const CODER_PLAN_USER_TEMPLATE: &str = r#"Plan an exercise for this brief.

Topic: {topic}
Language: {language}
Difficulty: {difficulty}
Learning objectives:
{objectives}
Concepts: {concepts}
{refinement}
Output as JSON:
{
  "approach_summary": "How a learner should solve it",
  "required_test_case_count": {min_tests},
  "constraints": ["constraint1", "constraint2"]
}

IMPORTANT: Output ONLY the JSON object, no additional text."#;

/// System prompt for the code-generation call.
pub const CODER_CODE_SYSTEM_PROMPT: &str = r#"You are a senior developer writing the code for an interactive coding exercise.

Produce:
1. A problem statement addressed to the learner
2. Starter code: the function signature with an empty or placeholder body that parses on its own
3. A correct reference solution named `solve` (for SQL: a single query)
4. Test cases as JSON values: positional input arguments and the exact expected return value

Tests must be deterministic and must not depend on output formatting, timing, randomness or the network."#;

const CODER_CODE_USER_TEMPLATE: &str = r#"Write the exercise.

Topic: {topic}
Language: {language}
Difficulty: {difficulty}
Approach: {approach}
Constraints:
{constraints}
Learning objectives (cover each with at least one test):
{objectives}

Write at least {test_count} test cases.

Output as JSON:
{
  "problem_statement": "Markdown text for the learner",
  "starter_code": "...",
  "solution_code": "...",
  "test_cases": [
    {"input_args": [1, 2], "expected_output": 3, "description": "what this case checks"}
  ]
}

IMPORTANT: Output ONLY the JSON object, no additional text."#;

/// The Coder's intermediate plan. Discarded once code is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationPlan {
    pub approach_summary: String,
    pub required_test_case_count: usize,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    #[serde(default)]
    problem_statement: String,
    starter_code: String,
    solution_code: String,
    test_cases: Vec<TestCase>,
}

/// Output of the Coder stage.
#[derive(Debug, Clone)]
pub struct CoderOutput {
    pub capsule: CodeGenerationResult,
    /// Set when the reference solution does not parse.
    pub solution_syntax_issue: Option<SyntaxIssue>,
}

/// Configuration for the Coder Agent.
#[derive(Debug, Clone)]
pub struct CoderConfig {
    /// Floor on the number of generated tests.
    pub min_test_cases: usize,
    pub backend: BackendSettings,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            min_test_cases: 3,
            backend: BackendSettings::default().with_max_tokens(6000),
        }
    }
}

impl CoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_test_cases(mut self, count: usize) -> Self {
        self.min_test_cases = count.max(1);
        self
    }

    pub fn with_backend(mut self, backend: BackendSettings) -> Self {
        self.backend = backend;
        self
    }
}

/// Coder Agent that plans and writes capsule code.
pub struct CoderAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: CoderConfig,
}

impl std::fmt::Debug for CoderAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoderAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CoderAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "coder";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: CoderConfig) -> Self {
        Self { llm_client, config }
    }

    /// Number of tests a capsule must carry for `analysis`.
    pub fn required_test_count(&self, analysis: &PedagogicalAnalysis) -> usize {
        analysis.objectives.len().max(self.config.min_test_cases)
    }

    /// Plans then writes the capsule for an accepted analysis.
    pub async fn generate(
        &self,
        idea: &CapsuleIdea,
        analysis: &PedagogicalAnalysis,
        ctx: &RunContext,
    ) -> AgentResult<CoderOutput> {
        let plan = self.plan(idea, analysis, ctx).await?;
        tracing::debug!(
            idea_id = %idea.idea_id,
            required_tests = plan.required_test_case_count,
            constraints = plan.constraints.len(),
            "Coder produced implementation plan"
        );

        let required = plan.required_test_case_count;
        let language = idea.language;
        let prompt = build_code_prompt(idea, analysis, &plan);

        let response: CodeResponse = request_json(
            self.llm_client.as_ref(),
            ctx,
            &self.config.backend,
            Self::AGENT_NAME,
            CODER_CODE_SYSTEM_PROMPT,
            &prompt,
            |r: CodeResponse| {
                if r.starter_code.trim().is_empty() {
                    return Err("starter_code is empty".to_string());
                }
                if r.solution_code.trim().is_empty() {
                    return Err("solution_code is empty".to_string());
                }
                if r.test_cases.len() < required {
                    return Err(format!(
                        "expected at least {} test cases, got {}",
                        required,
                        r.test_cases.len()
                    ));
                }
                syntax::check(language, &r.starter_code)
                    .map_err(|issue| format!("starter code does not parse: {}", issue))?;
                Ok(r)
            },
        )
        .await?;

        let solution_syntax_issue = syntax::check(language, &response.solution_code).err();
        if let Some(ref issue) = solution_syntax_issue {
            tracing::info!(
                idea_id = %idea.idea_id,
                issue = %issue,
                "Generated solution does not parse, handing to debugger"
            );
        }

        let problem_statement = if response.problem_statement.trim().is_empty() {
            idea.topic.clone()
        } else {
            response.problem_statement
        };

        Ok(CoderOutput {
            capsule: CodeGenerationResult {
                problem_statement,
                starter_code: response.starter_code,
                solution_code: response.solution_code,
                test_cases: response.test_cases,
                language,
                runtime_tier: idea.runtime_tier(),
            },
            solution_syntax_issue,
        })
    }

    async fn plan(
        &self,
        idea: &CapsuleIdea,
        analysis: &PedagogicalAnalysis,
        ctx: &RunContext,
    ) -> AgentResult<ImplementationPlan> {
        let minimum = self.required_test_count(analysis);
        let prompt = CODER_PLAN_USER_TEMPLATE
            .replace("{topic}", &idea.topic)
            .replace("{language}", idea.language.as_str())
            .replace("{difficulty}", idea.difficulty.as_str())
            .replace("{objectives}", &bullet_list(&analysis.objectives))
            .replace("{concepts}", &analysis.concepts.join(", "))
            .replace("{refinement}", &refinement_line(idea))
            .replace("{min_tests}", &minimum.to_string());

        let mut plan: ImplementationPlan = request_json(
            self.llm_client.as_ref(),
            ctx,
            &self.config.backend,
            Self::AGENT_NAME,
            CODER_PLAN_SYSTEM_PROMPT,
            &prompt,
            |p: ImplementationPlan| {
                if p.approach_summary.trim().is_empty() {
                    Err("approach_summary is empty".to_string())
                } else {
                    Ok(p)
                }
            },
        )
        .await?;

        plan.required_test_case_count = plan.required_test_case_count.max(minimum);
        Ok(plan)
    }
}

fn build_code_prompt(
    idea: &CapsuleIdea,
    analysis: &PedagogicalAnalysis,
    plan: &ImplementationPlan,
) -> String {
    let constraints = if plan.constraints.is_empty() {
        "- none".to_string()
    } else {
        bullet_list(&plan.constraints)
    };
    CODER_CODE_USER_TEMPLATE
        .replace("{topic}", &idea.topic)
        .replace("{language}", idea.language.as_str())
        .replace("{difficulty}", idea.difficulty.as_str())
        .replace("{approach}", &plan.approach_summary)
        .replace("{constraints}", &constraints)
        .replace("{objectives}", &bullet_list(&analysis.objectives))
        .replace("{test_count}", &plan.required_test_case_count.to_string())
}

fn refinement_line(idea: &CapsuleIdea) -> String {
    idea.refinement_hint
        .as_deref()
        .map(|hint| format!("Fix these problems seen with the previous version: {}\n", hint))
        .unwrap_or_default()
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
