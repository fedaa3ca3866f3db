//! Pedagogist stage: judges an idea's learning value before any code is generated.
//!
//! The backend proposes objectives and concepts and rates the idea's
//! specificity and difficulty plausibility. The go/no-go score is computed
//! locally from those ratings so the acceptance decision is deterministic
//! for a given backend answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capsule::CapsuleIdea;
use crate::llm::LlmProvider;
use crate::pipeline::context::RunContext;

use super::backend::{request_json, BackendSettings};
use super::error::AgentResult;

/// System prompt for idea evaluation.
pub const PEDAGOGIST_SYSTEM_PROMPT: &str = r#"You are an experienced programming instructor reviewing ideas for short interactive coding exercises.

For each idea, decide what a learner would actually practise:
1. List concrete learning objectives, each testable by running code
2. List the programming concepts involved (data structures, idioms, algorithms)
3. Rate how specific the idea is: can two instructors build the same exercise from it?
4. Rate whether the stated difficulty fits the concepts involved

Be strict. Vague ideas ("learn coding"), ideas that need external services, and ideas whose difficulty is wildly off should get low ratings."#;

/// User prompt template for idea evaluation.
const PEDAGOGIST_USER_TEMPLATE: &str = r#"Evaluate this exercise idea.

Topic: {topic}
Language: {language}
Difficulty: {difficulty}
Audience: {audience}
{refinement}
Output as JSON:
{
  "objectives": ["learner can ...", "learner can ..."],
  "concepts": ["concept1", "concept2"],
  "specificity": 0.0,
  "difficulty_plausibility": 0.0,
  "rationale": "Two or three sentences explaining the ratings"
}

Ratings are numbers between 0.0 and 1.0.
IMPORTANT: Output ONLY the JSON object, no additional text."#;

/// Concept count at which coverage is considered complete.
const FULL_COVERAGE_CONCEPTS: usize = 3;

/// Learning-value verdict for an idea. Never mutated after the stage returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PedagogicalAnalysis {
    pub objectives: Vec<String>,
    pub concepts: Vec<String>,
    /// 0..=100.
    pub quality_score: u8,
    pub accepted: bool,
    pub rationale: String,
}

/// Raw backend answer.
#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    #[serde(default)]
    objectives: Vec<String>,
    #[serde(default)]
    concepts: Vec<String>,
    specificity: f64,
    difficulty_plausibility: f64,
    #[serde(default)]
    rationale: String,
}

/// Computes the quality score from the backend's ratings.
///
/// `round(40 * specificity + 35 * coverage + 25 * plausibility)` where
/// coverage is `min(concepts, 3) / 3`. Ratings are clamped to `0.0..=1.0`.
/// An idea without objectives scores 0.
pub fn compute_quality_score(
    objective_count: usize,
    concept_count: usize,
    specificity: f64,
    difficulty_plausibility: f64,
) -> u8 {
    if objective_count == 0 {
        return 0;
    }
    let coverage =
        concept_count.min(FULL_COVERAGE_CONCEPTS) as f64 / FULL_COVERAGE_CONCEPTS as f64;
    let raw = 40.0 * clamp_rating(specificity)
        + 35.0 * coverage
        + 25.0 * clamp_rating(difficulty_plausibility);
    raw.round().clamp(0.0, 100.0) as u8
}

fn clamp_rating(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Configuration for the Pedagogist Agent.
#[derive(Debug, Clone)]
pub struct PedagogistConfig {
    /// Minimum score (inclusive) for acceptance.
    pub acceptance_threshold: u8,
    pub backend: BackendSettings,
}

impl Default for PedagogistConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 60,
            backend: BackendSettings::default().with_max_tokens(1500),
        }
    }
}

impl PedagogistConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acceptance_threshold(mut self, threshold: u8) -> Self {
        self.acceptance_threshold = threshold.min(100);
        self
    }

    pub fn with_backend(mut self, backend: BackendSettings) -> Self {
        self.backend = backend;
        self
    }
}

/// Pedagogist Agent that scores ideas for learning value.
pub struct PedagogistAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: PedagogistConfig,
}

impl std::fmt::Debug for PedagogistAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PedagogistAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PedagogistAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "pedagogist";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: PedagogistConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn config(&self) -> &PedagogistConfig {
        &self.config
    }

    /// Evaluates an idea. One backend interaction, retried on unusable output.
    pub async fn analyze(
        &self,
        idea: &CapsuleIdea,
        ctx: &RunContext,
    ) -> AgentResult<PedagogicalAnalysis> {
        let prompt = build_prompt(idea);

        let response: EvaluationResponse = request_json(
            self.llm_client.as_ref(),
            ctx,
            &self.config.backend,
            Self::AGENT_NAME,
            PEDAGOGIST_SYSTEM_PROMPT,
            &prompt,
            |r: EvaluationResponse| {
                if r.specificity.is_finite() && r.difficulty_plausibility.is_finite() {
                    Ok(r)
                } else {
                    Err("ratings must be finite numbers".to_string())
                }
            },
        )
        .await?;

        let objectives = clean_list(response.objectives);
        let concepts = clean_list(response.concepts);
        let quality_score = compute_quality_score(
            objectives.len(),
            concepts.len(),
            response.specificity,
            response.difficulty_plausibility,
        );
        let accepted = quality_score >= self.config.acceptance_threshold;

        let rationale = if objectives.is_empty() {
            "No testable learning objectives were identified".to_string()
        } else if response.rationale.trim().is_empty() {
            format!(
                "Scored {} (threshold {})",
                quality_score, self.config.acceptance_threshold
            )
        } else {
            response.rationale.trim().to_string()
        };

        tracing::info!(
            idea_id = %idea.idea_id,
            quality_score,
            threshold = self.config.acceptance_threshold,
            accepted,
            "Pedagogist evaluated idea"
        );

        Ok(PedagogicalAnalysis {
            objectives,
            concepts,
            quality_score,
            accepted,
            rationale,
        })
    }
}

fn build_prompt(idea: &CapsuleIdea) -> String {
    let refinement = idea
        .refinement_hint
        .as_deref()
        .map(|hint| format!("Known problems with the previous version: {}\n", hint))
        .unwrap_or_default();

    PEDAGOGIST_USER_TEMPLATE
        .replace("{topic}", &idea.topic)
        .replace("{language}", idea.language.as_str())
        .replace("{difficulty}", idea.difficulty.as_str())
        .replace(
            "{audience}",
            idea.audience_hint.as_deref().unwrap_or("general learners"),
        )
        .replace("{refinement}", &refinement)
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !cleaned.contains(&item) {
            cleaned.push(item);
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::{Difficulty, Language};
    use crate::llm::{Choice, GenerationRequest, GenerationResponse, Message, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock LLM provider for testing.
    struct MockLlmProvider {
        response: Mutex<String>,
        last_prompt: Mutex<Option<String>>,
    }

    impl MockLlmProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: Mutex::new(response.into()),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, crate::error::LlmError> {
            *self.last_prompt.lock().expect("lock not poisoned") =
                request.messages.last().map(|m| m.content.clone());
            let content = self.response.lock().expect("lock not poisoned").clone();
            Ok(GenerationResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    const GOOD_RESPONSE: &str = r#"{
        "objectives": ["use a hash map for lookups", "return indices of a pair"],
        "concepts": ["hash maps", "iteration", "complements"],
        "specificity": 0.9,
        "difficulty_plausibility": 0.8,
        "rationale": "Classic, well-scoped exercise."
    }"#;

    fn idea() -> CapsuleIdea {
        CapsuleIdea::new("two-sum", Language::Python, Difficulty::Easy)
    }

    #[test]
    fn test_quality_score_formula() {
        assert_eq!(compute_quality_score(2, 3, 0.9, 0.8), 91);
        assert_eq!(compute_quality_score(1, 0, 1.0, 1.0), 65);
        assert_eq!(compute_quality_score(1, 10, 1.0, 1.0), 100);
        assert_eq!(compute_quality_score(0, 3, 1.0, 1.0), 0);
        assert_eq!(compute_quality_score(1, 3, 2.5, -1.0), 75);
        assert_eq!(compute_quality_score(1, 3, f64::NAN, 1.0), 60);
    }

    #[tokio::test]
    async fn test_accepts_at_threshold() {
        let llm = Arc::new(MockLlmProvider::new(GOOD_RESPONSE));
        let agent = PedagogistAgent::new(
            llm,
            PedagogistConfig::default().with_acceptance_threshold(91),
        );
        let ctx = RunContext::with_budget(Duration::from_secs(10));

        let analysis = agent.analyze(&idea(), &ctx).await.unwrap();
        assert_eq!(analysis.quality_score, 91);
        assert!(analysis.accepted);
        assert_eq!(analysis.objectives.len(), 2);
        assert_eq!(analysis.rationale, "Classic, well-scoped exercise.");
    }

    #[tokio::test]
    async fn test_rejects_one_below() {
        let llm = Arc::new(MockLlmProvider::new(GOOD_RESPONSE));
        let agent = PedagogistAgent::new(
            llm,
            PedagogistConfig::default().with_acceptance_threshold(92),
        );
        let ctx = RunContext::with_budget(Duration::from_secs(10));

        let analysis = agent.analyze(&idea(), &ctx).await.unwrap();
        assert!(!analysis.accepted);
    }

    #[tokio::test]
    async fn test_no_objectives_scores_zero() {
        let llm = Arc::new(MockLlmProvider::new(
            r#"{"objectives": [" "], "concepts": ["x"], "specificity": 1.0, "difficulty_plausibility": 1.0}"#,
        ));
        let agent = PedagogistAgent::new(llm, PedagogistConfig::default());
        let ctx = RunContext::with_budget(Duration::from_secs(10));

        let analysis = agent.analyze(&idea(), &ctx).await.unwrap();
        assert_eq!(analysis.quality_score, 0);
        assert!(!analysis.accepted);
        assert!(analysis.rationale.contains("objectives"));
    }

    #[tokio::test]
    async fn test_prompt_carries_refinement_and_audience() {
        let llm = Arc::new(MockLlmProvider::new(GOOD_RESPONSE));
        let agent = PedagogistAgent::new(llm.clone(), PedagogistConfig::default());
        let ctx = RunContext::with_budget(Duration::from_secs(10));

        let refined = idea()
            .with_audience_hint("high-school students")
            .with_refinement("learners fail the negative-number case");
        agent.analyze(&refined, &ctx).await.unwrap();

        let prompt = llm.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("high-school students"));
        assert!(prompt.contains("negative-number case"));
        assert!(prompt.contains("Topic: two-sum"));
    }

    #[test]
    fn test_clean_list_dedupes() {
        let cleaned = clean_list(vec![
            " loops ".to_string(),
            "loops".to_string(),
            "".to_string(),
            "maps".to_string(),
        ]);
        assert_eq!(cleaned, vec!["loops".to_string(), "maps".to_string()]);
    }
}
