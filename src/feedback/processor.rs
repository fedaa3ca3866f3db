//! Feedback processor: turns quality signals into regeneration requests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::analytics::{AnalyticsReport, ErrorPattern, ImprovementSuggestion};
use crate::capsule::CapsuleIdea;
use crate::error::FeedbackError;
use crate::metrics::MetricsCollector;
use crate::pipeline::{
    CapsuleGenerator, GenerationOptions, Lineage, PipelineGenerationResult, PipelineStatus,
    PublishMode,
};
use crate::storage::{CapsuleRecord, CapsuleStore};

/// What happens to a regenerated capsule that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationPolicy {
    /// Publish it and mark the old capsule superseded.
    Replace,
    /// Store it for human review; the old capsule stays live.
    #[default]
    QueueForReview,
}

impl FromStr for RegenerationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "replace" => Ok(RegenerationPolicy::Replace),
            "queue_for_review" | "queue" | "review" => Ok(RegenerationPolicy::QueueForReview),
            other => Err(format!(
                "unknown regeneration policy '{}' (expected replace or queue_for_review)",
                other
            )),
        }
    }
}

/// Feedback processor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackConfig {
    pub policy: RegenerationPolicy,
    /// Automatic regenerations allowed per lineage within `regeneration_window`.
    pub max_regenerations_per_window: u32,
    pub regeneration_window: Duration,
    /// Error patterns quoted in the refinement hint.
    pub top_patterns: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            policy: RegenerationPolicy::QueueForReview,
            max_regenerations_per_window: 1,
            regeneration_window: Duration::from_secs(24 * 60 * 60),
            top_patterns: 3,
        }
    }
}

impl FeedbackConfig {
    pub fn with_policy(mut self, policy: RegenerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.max_regenerations_per_window = max;
        self.regeneration_window = window;
        self
    }

    pub fn with_top_patterns(mut self, count: usize) -> Self {
        self.top_patterns = count;
        self
    }

    pub fn validate(&self) -> Result<(), FeedbackError> {
        if self.max_regenerations_per_window == 0 {
            return Err(FeedbackError::InvalidConfig(
                "max_regenerations_per_window must be positive".to_string(),
            ));
        }
        if self.regeneration_window.is_zero() {
            return Err(FeedbackError::InvalidConfig(
                "regeneration_window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input for one regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationRequest {
    pub request_id: Uuid,
    /// Capsule being improved.
    pub capsule_id: Uuid,
    pub lineage_root: Uuid,
    pub original_idea: CapsuleIdea,
    pub suggestions: Vec<ImprovementSuggestion>,
    pub patterns: Vec<ErrorPattern>,
    pub refinement_hint: String,
    /// `original_idea` with the hint attached; what the pipeline receives.
    pub refined_idea: CapsuleIdea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoActionableSignals,
    AlreadyProcessed,
    RateLimited,
    /// The capsule was superseded or is still waiting for review.
    NotLive,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoActionableSignals => "no_actionable_signals",
            SkipReason::AlreadyProcessed => "already_processed",
            SkipReason::RateLimited => "rate_limited",
            SkipReason::NotLive => "not_live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    Replaced,
    QueuedForReview,
    /// The pipeline ran but did not produce a storable capsule.
    NotPublished,
    Skipped { reason: SkipReason },
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Replaced => "replaced",
            Disposition::QueuedForReview => "queued_for_review",
            Disposition::NotPublished => "not_published",
            Disposition::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationResult {
    pub capsule_id: Uuid,
    pub disposition: Disposition,
    pub request: Option<RegenerationRequest>,
    pub generation: Option<PipelineGenerationResult>,
}

impl RegenerationResult {
    fn skipped(capsule_id: Uuid, reason: SkipReason) -> Self {
        Self {
            capsule_id,
            disposition: Disposition::Skipped { reason },
            request: None,
            generation: None,
        }
    }

    /// Id of the new capsule, if one was stored.
    pub fn new_capsule_id(&self) -> Option<Uuid> {
        self.generation.as_ref().and_then(|g| g.capsule_id)
    }
}

/// Attempts that left no record in the store.
///
/// Stored regenerations carry their lineage and fingerprints on the record
/// itself, so only failed runs need remembering here.
#[derive(Debug, Default)]
struct FeedbackState {
    processed: HashSet<String>,
    /// Start times of unstored regenerations per lineage root.
    unstored: HashMap<Uuid, VecDeque<DateTime<Utc>>>,
}

/// Drives the analytics to regeneration half of the flywheel.
///
/// Never retries on its own: each accepted report triggers at most one
/// `generate` call, and only within the per-lineage rate cap. The cap and
/// the processed fingerprints are read back from the store, so they hold
/// across processor instances and process restarts.
pub struct FeedbackProcessor {
    generator: Arc<dyn CapsuleGenerator>,
    store: Arc<dyn CapsuleStore>,
    config: FeedbackConfig,
    base_options: GenerationOptions,
    state: Mutex<FeedbackState>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for FeedbackProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FeedbackProcessor {
    /// # Errors
    ///
    /// Returns `FeedbackError::InvalidConfig` if the rate cap is not positive.
    pub fn new(
        generator: Arc<dyn CapsuleGenerator>,
        store: Arc<dyn CapsuleStore>,
        config: FeedbackConfig,
        base_options: GenerationOptions,
    ) -> Result<Self, FeedbackError> {
        config.validate()?;
        Ok(Self {
            generator,
            store,
            config,
            base_options,
            state: Mutex::new(FeedbackState::default()),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    pub async fn process(
        &self,
        capsule_id: Uuid,
        report: &AnalyticsReport,
    ) -> Result<RegenerationResult, FeedbackError> {
        self.process_at(capsule_id, report, Utc::now()).await
    }

    /// Processes a report as of `now`.
    ///
    /// # Errors
    ///
    /// `FeedbackError::Storage` if the capsule cannot be loaded or marked.
    pub async fn process_at(
        &self,
        capsule_id: Uuid,
        report: &AnalyticsReport,
        now: DateTime<Utc>,
    ) -> Result<RegenerationResult, FeedbackError> {
        let record = self.store.require(capsule_id).await?;

        // held until the outcome is stored; the cap is read from the store
        let mut state = self.state.lock().await;
        let lineage = self.store.list_lineage(record.lineage_root).await?;

        let addressed: HashSet<&str> = lineage
            .iter()
            .flat_map(|r| r.addressed_fingerprints.iter().map(String::as_str))
            .chain(state.processed.iter().map(String::as_str))
            .collect();
        let fresh: Vec<ImprovementSuggestion> = report
            .suggestions
            .iter()
            .filter(|s| s.capsule_id == capsule_id)
            .filter(|s| !addressed.contains(s.fingerprint.as_str()))
            .cloned()
            .collect();

        if fresh.is_empty() {
            let reason = if report.suggestions.iter().any(|s| s.capsule_id == capsule_id) {
                SkipReason::AlreadyProcessed
            } else {
                SkipReason::NoActionableSignals
            };
            return Ok(self.skip(capsule_id, reason));
        }

        if !record.is_live() {
            tracing::info!(
                capsule_id = %capsule_id,
                superseded_by = ?record.superseded_by,
                status = record.status.as_str(),
                "Capsule is not live, not regenerating it"
            );
            return Ok(self.skip(capsule_id, SkipReason::NotLive));
        }

        let cutoff = chrono::Duration::from_std(self.config.regeneration_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window));
        let within = |at: &DateTime<Utc>| cutoff.is_none_or(|cutoff| *at > cutoff);

        let unstored = state.unstored.entry(record.lineage_root).or_default();
        unstored.retain(|at| within(at));
        let recent = lineage
            .iter()
            .filter(|r| r.supersedes.is_some() && within(&r.created_at))
            .count()
            + unstored.len();
        if recent >= self.config.max_regenerations_per_window as usize {
            tracing::info!(
                capsule_id = %capsule_id,
                lineage_root = %record.lineage_root,
                recent,
                "Regeneration rate limit reached"
            );
            return Ok(self.skip(capsule_id, SkipReason::RateLimited));
        }

        let request = build_request(&record, fresh, &report.patterns, self.config.top_patterns);

        tracing::info!(
            capsule_id = %capsule_id,
            request_id = %request.request_id,
            suggestions = request.suggestions.len(),
            patterns = request.patterns.len(),
            policy = ?self.config.policy,
            "Regenerating capsule from learner feedback"
        );

        let options = self
            .base_options
            .clone()
            .with_addressed_fingerprints(
                request.suggestions.iter().map(|s| s.fingerprint.clone()).collect(),
            )
            .with_publish_mode(match self.config.policy {
                RegenerationPolicy::Replace => PublishMode::Publish,
                RegenerationPolicy::QueueForReview => PublishMode::HoldForReview,
            })
            .with_lineage(Lineage {
                root: request.lineage_root,
                supersedes: capsule_id,
            });

        let generation = self
            .generator
            .generate(request.refined_idea.clone(), options)
            .await;

        let disposition = match (generation.status, generation.capsule_id) {
            (PipelineStatus::Published, Some(new_id)) => {
                self.store.mark_superseded(capsule_id, new_id).await?;
                Disposition::Replaced
            }
            (PipelineStatus::PendingReview, Some(_)) => Disposition::QueuedForReview,
            _ => {
                // nothing stored carries these, so remember them here
                state.unstored.entry(record.lineage_root).or_default().push_back(now);
                state
                    .processed
                    .extend(request.suggestions.iter().map(|s| s.fingerprint.clone()));
                Disposition::NotPublished
            }
        };
        drop(state);

        self.metrics.record_regeneration(disposition.label());
        tracing::info!(
            capsule_id = %capsule_id,
            new_capsule_id = ?generation.capsule_id,
            disposition = disposition.label(),
            status = %generation.status,
            "Regeneration finished"
        );

        Ok(RegenerationResult {
            capsule_id,
            disposition,
            request: Some(request),
            generation: Some(generation),
        })
    }

    fn skip(&self, capsule_id: Uuid, reason: SkipReason) -> RegenerationResult {
        tracing::debug!(capsule_id = %capsule_id, reason = ?reason, "Regeneration skipped");
        self.metrics.record_regeneration("skipped");
        RegenerationResult::skipped(capsule_id, reason)
    }
}

/// Text handed to the pipeline describing what to fix.
pub fn refinement_hint(
    record: &CapsuleRecord,
    suggestions: &[ImprovementSuggestion],
    patterns: &[ErrorPattern],
) -> String {
    let mut hint = String::from("Learners struggled with the previous version of this exercise:\n");
    for suggestion in suggestions {
        hint.push_str(&format!("- {}\n", suggestion.description));
    }

    if !patterns.is_empty() {
        hint.push_str("Recurring learner errors:\n");
        for pattern in patterns {
            let test = match record.capsule.test_description(pattern.test_index) {
                Some(description) if !description.is_empty() => {
                    format!("test {} ({})", pattern.test_index, description)
                }
                _ => format!("test {}", pattern.test_index),
            };
            hint.push_str(&format!(
                "- {}: \"{}\" seen {} times from {} learners\n",
                test, pattern.signature, pattern.frequency, pattern.distinct_learners
            ));
        }
    }

    hint.push_str("Keep the topic and difficulty; add scaffolding or clarify the statement where learners get stuck.");
    hint
}

fn build_request(
    record: &CapsuleRecord,
    suggestions: Vec<ImprovementSuggestion>,
    patterns: &[ErrorPattern],
    top_patterns: usize,
) -> RegenerationRequest {
    let patterns: Vec<ErrorPattern> = patterns.iter().take(top_patterns).cloned().collect();
    let hint = refinement_hint(record, &suggestions, &patterns);
    RegenerationRequest {
        request_id: Uuid::new_v4(),
        capsule_id: record.capsule_id,
        lineage_root: record.lineage_root,
        original_idea: record.idea.clone(),
        refined_idea: record.idea.with_refinement(hint.clone()),
        suggestions,
        patterns,
        refinement_hint: hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::content::ContentMetrics;
    use crate::analytics::{SuggestionCategory, TriggeringMetric};
    use crate::pipeline::PipelineStats;
    use crate::storage::memory::fixtures::record;
    use crate::storage::{MemoryCapsuleStore, RecordStatus};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Generator that stores a record with a fixed status.
    struct FixedGenerator {
        store: Arc<MemoryCapsuleStore>,
        status: PipelineStatus,
        calls: StdMutex<Vec<(CapsuleIdea, GenerationOptions)>>,
    }

    #[async_trait]
    impl CapsuleGenerator for FixedGenerator {
        async fn generate(
            &self,
            idea: CapsuleIdea,
            options: GenerationOptions,
        ) -> PipelineGenerationResult {
            self.calls
                .lock()
                .unwrap()
                .push((idea.clone(), options.clone()));
            let capsule_id = if self.status.is_stored() {
                let mut rec = record(if self.status == PipelineStatus::Published {
                    RecordStatus::Published
                } else {
                    RecordStatus::PendingReview
                });
                rec.lineage_root = options.lineage.map(|l| l.root).unwrap_or(rec.capsule_id);
                rec.supersedes = options.lineage.map(|l| l.supersedes);
                rec.addressed_fingerprints = options.addressed_fingerprints.clone();
                self.store.save(&rec).await.unwrap();
                Some(rec.capsule_id)
            } else {
                None
            };
            PipelineGenerationResult {
                request_id: Uuid::new_v4(),
                capsule_id,
                idea,
                analysis: None,
                capsule: None,
                debug_session: None,
                validation: None,
                status: self.status,
                rationale: "fixed".to_string(),
                stats: PipelineStats::default(),
            }
        }
    }

    fn report(capsule_id: Uuid, fingerprint: &str) -> AnalyticsReport {
        AnalyticsReport {
            metrics: ContentMetrics {
                capsule_id,
                window_start: None,
                window_end: None,
                event_count: 100,
                runs: 40,
                passes: 10,
                hints: 5,
                give_ups: 45,
                distinct_learners: 30,
                test_failures: 20,
                run_to_pass_ratio: 4.0,
                give_up_rate: 0.45,
                hint_utilization: 0.05,
                top_failing_tests: Vec::new(),
            },
            suggestions: vec![ImprovementSuggestion {
                capsule_id,
                category: SuggestionCategory::HighGiveUpRate,
                description: "45% of learner events are give-ups".to_string(),
                triggering_metric: TriggeringMetric {
                    name: "give_up_rate".to_string(),
                    value: 0.45,
                    threshold: 0.40,
                },
                test_index: None,
                fingerprint: fingerprint.to_string(),
            }],
            patterns: vec![ErrorPattern {
                test_index: 0,
                signature: "AssertionError: expected <num> got <num>".to_string(),
                frequency: 14,
                distinct_learners: 11,
                sample_error: None,
            }],
        }
    }

    async fn setup(
        status: PipelineStatus,
        config: FeedbackConfig,
    ) -> (Arc<MemoryCapsuleStore>, Arc<FixedGenerator>, FeedbackProcessor, Uuid) {
        let store = Arc::new(MemoryCapsuleStore::new());
        let original = record(RecordStatus::Published);
        let id = original.capsule_id;
        store.save(&original).await.unwrap();
        let generator = Arc::new(FixedGenerator {
            store: Arc::clone(&store),
            status,
            calls: StdMutex::new(Vec::new()),
        });
        let processor = FeedbackProcessor::new(
            generator.clone(),
            store.clone(),
            config,
            GenerationOptions::from_config(&crate::pipeline::PipelineConfig::default()),
        )
        .unwrap();
        (store, generator, processor, id)
    }

    #[tokio::test]
    async fn test_replace_supersedes_original() {
        let (store, generator, processor, id) = setup(
            PipelineStatus::Published,
            FeedbackConfig::default().with_policy(RegenerationPolicy::Replace),
        )
        .await;

        let result = processor.process(id, &report(id, "fp-1")).await.unwrap();
        assert_eq!(result.disposition, Disposition::Replaced);
        let new_id = result.new_capsule_id().unwrap();
        assert_eq!(store.require(id).await.unwrap().superseded_by, Some(new_id));

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (idea, options) = &calls[0];
        let hint = idea.refinement_hint.as_deref().unwrap();
        assert!(hint.contains("45% of learner events are give-ups"));
        assert!(hint.contains("test 0 (two items)"));
        assert_eq!(options.publish_mode, PublishMode::Publish);
        assert_eq!(options.lineage.unwrap().supersedes, id);
    }

    #[tokio::test]
    async fn test_queue_for_review_keeps_original_live() {
        let (store, _generator, processor, id) =
            setup(PipelineStatus::PendingReview, FeedbackConfig::default()).await;

        let result = processor.process(id, &report(id, "fp-1")).await.unwrap();
        assert_eq!(result.disposition, Disposition::QueuedForReview);
        assert!(store.require(id).await.unwrap().is_live());
        assert_eq!(store.list_pending_review().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_fingerprint_is_skipped() {
        let (_store, generator, processor, id) = setup(
            PipelineStatus::Rejected,
            FeedbackConfig::default().with_rate_limit(10, Duration::from_secs(3600)),
        )
        .await;

        let first = processor.process(id, &report(id, "fp-1")).await.unwrap();
        assert_eq!(first.disposition, Disposition::NotPublished);
        let second = processor.process(id, &report(id, "fp-1")).await.unwrap();
        assert_eq!(
            second.disposition,
            Disposition::Skipped {
                reason: SkipReason::AlreadyProcessed
            }
        );
        assert_eq!(generator.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_per_lineage() {
        let (_store, generator, processor, id) =
            setup(PipelineStatus::Rejected, FeedbackConfig::default()).await;
        let now = Utc::now();

        processor.process_at(id, &report(id, "fp-1"), now).await.unwrap();
        let limited = processor
            .process_at(id, &report(id, "fp-2"), now + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            limited.disposition,
            Disposition::Skipped {
                reason: SkipReason::RateLimited
            }
        );

        // the unprocessed suggestion is still eligible once the window has passed
        let later = processor
            .process_at(id, &report(id, "fp-2"), now + chrono::Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(later.disposition, Disposition::NotPublished);
        assert_eq!(generator.calls.lock().unwrap().len(), 2);
    }

    fn processor_over(
        store: &Arc<MemoryCapsuleStore>,
        status: PipelineStatus,
        config: FeedbackConfig,
    ) -> (Arc<FixedGenerator>, FeedbackProcessor) {
        let generator = Arc::new(FixedGenerator {
            store: Arc::clone(store),
            status,
            calls: StdMutex::new(Vec::new()),
        });
        let processor = FeedbackProcessor::new(
            generator.clone(),
            store.clone(),
            config,
            GenerationOptions::from_config(&crate::pipeline::PipelineConfig::default()),
        )
        .unwrap();
        (generator, processor)
    }

    #[tokio::test]
    async fn test_cap_and_fingerprints_survive_a_new_processor() {
        let (store, _generator, first, id) =
            setup(PipelineStatus::PendingReview, FeedbackConfig::default()).await;
        let queued = first.process(id, &report(id, "fp-1")).await.unwrap();
        assert_eq!(queued.disposition, Disposition::QueuedForReview);
        let stored = store.require(queued.new_capsule_id().unwrap()).await.unwrap();
        assert_eq!(stored.addressed_fingerprints, vec!["fp-1".to_string()]);

        // a fresh processor, as a second CLI run would build
        let (generator, second) =
            processor_over(&store, PipelineStatus::PendingReview, FeedbackConfig::default());
        let repeat = second.process(id, &report(id, "fp-1")).await.unwrap();
        assert_eq!(
            repeat.disposition,
            Disposition::Skipped {
                reason: SkipReason::AlreadyProcessed
            }
        );
        let capped = second.process(id, &report(id, "fp-2")).await.unwrap();
        assert_eq!(
            capped.disposition,
            Disposition::Skipped {
                reason: SkipReason::RateLimited
            }
        );
        assert!(generator.calls.lock().unwrap().is_empty());
        assert_eq!(store.len().await, 2);

        // the stored regeneration ages out of the window like any other
        let later = second
            .process_at(id, &report(id, "fp-2"), Utc::now() + chrono::Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(later.disposition, Disposition::QueuedForReview);
    }

    #[tokio::test]
    async fn test_superseded_capsule_is_not_replaced_again() {
        let (store, _generator, first, id) = setup(
            PipelineStatus::Published,
            FeedbackConfig::default()
                .with_policy(RegenerationPolicy::Replace)
                .with_rate_limit(10, Duration::from_secs(3600)),
        )
        .await;
        let replaced = first.process(id, &report(id, "fp-1")).await.unwrap();
        let new_id = replaced.new_capsule_id().unwrap();

        let (generator, second) = processor_over(
            &store,
            PipelineStatus::Published,
            FeedbackConfig::default()
                .with_policy(RegenerationPolicy::Replace)
                .with_rate_limit(10, Duration::from_secs(3600)),
        );
        let result = second.process(id, &report(id, "fp-2")).await.unwrap();

        assert_eq!(
            result.disposition,
            Disposition::Skipped {
                reason: SkipReason::NotLive
            }
        );
        assert!(generator.calls.lock().unwrap().is_empty());
        assert_eq!(store.require(id).await.unwrap().superseded_by, Some(new_id));
        assert!(store.require(new_id).await.unwrap().is_live());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_no_suggestions_means_no_generation() {
        let (_store, generator, processor, id) =
            setup(PipelineStatus::Published, FeedbackConfig::default()).await;
        let mut quiet = report(id, "fp-1");
        quiet.suggestions.clear();

        let result = processor.process(id, &quiet).await.unwrap();
        assert_eq!(
            result.disposition,
            Disposition::Skipped {
                reason: SkipReason::NoActionableSignals
            }
        );
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_capsule() {
        let (_store, _generator, processor, _id) =
            setup(PipelineStatus::Published, FeedbackConfig::default()).await;
        let missing = Uuid::new_v4();
        let result = processor.process(missing, &report(missing, "fp")).await;
        assert!(matches!(result, Err(FeedbackError::Storage(_))));
    }

    #[test]
    fn test_config_validation() {
        assert!(FeedbackConfig::default().validate().is_ok());
        assert!(FeedbackConfig::default()
            .with_rate_limit(0, Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(FeedbackConfig::default()
            .with_rate_limit(1, Duration::ZERO)
            .validate()
            .is_err());
        assert_eq!(
            "queue-for-review".parse::<RegenerationPolicy>(),
            Ok(RegenerationPolicy::QueueForReview)
        );
        assert!("sometimes".parse::<RegenerationPolicy>().is_err());
    }
}
