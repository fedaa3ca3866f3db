//! Pipeline orchestrator sequencing the four generation stages.
//!
//! One `generate` call runs Pedagogist, Coder, Validator and (when needed)
//! the Debugger strictly in order, under a single [`RunContext`]. Concurrent
//! calls share nothing mutable; a semaphore caps how many are in flight so
//! the backend and sandbox are not flooded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::agents::{
    AgentError, BackendSettings, CoderAgent, CoderConfig, CoderOutput, DebugOutcome, DebugRun,
    DebuggerAgent, DebuggerConfig, DebuggingSession, PedagogicalAnalysis, PedagogistAgent,
    PedagogistConfig, ValidatorAgent, ValidatorConfig,
};
use crate::capsule::{CapsuleIdea, CodeGenerationResult, ValidationResult};
use crate::llm::LlmProvider;
use crate::metrics::MetricsCollector;
use crate::sandbox::Sandbox;
use crate::storage::{CapsuleRecord, CapsuleStore, RecordStatus};

use super::config::{ConfigError, PipelineConfig, TestRewritePolicy};
use super::context::{CancellationToken, RunContext};
use super::result::{FailureReason, PipelineGenerationResult, PipelineStatus};
use super::stats::{PipelineStats, Stage};

/// Whether a capsule that passed validation goes live immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    Publish,
    HoldForReview,
}

/// Where a regenerated capsule sits in its regeneration chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub root: Uuid,
    pub supersedes: Uuid,
}

/// Per-call settings for `generate`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_debug_attempts: u32,
    pub wall_clock_budget: Duration,
    pub test_rewrite_policy: TestRewritePolicy,
    pub publish_mode: PublishMode,
    pub lineage: Option<Lineage>,
    /// Suggestion fingerprints the new capsule answers; stored on its record.
    pub addressed_fingerprints: Vec<String>,
}

impl GenerationOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_debug_attempts: config.max_debug_attempts,
            wall_clock_budget: config.wall_clock_budget,
            test_rewrite_policy: config.test_rewrite_policy,
            publish_mode: PublishMode::Publish,
            lineage: None,
            addressed_fingerprints: Vec::new(),
        }
    }

    pub fn with_max_debug_attempts(mut self, attempts: u32) -> Self {
        self.max_debug_attempts = attempts;
        self
    }

    pub fn with_wall_clock_budget(mut self, budget: Duration) -> Self {
        self.wall_clock_budget = budget;
        self
    }

    pub fn with_test_rewrite_policy(mut self, policy: TestRewritePolicy) -> Self {
        self.test_rewrite_policy = policy;
        self
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    pub fn with_lineage(mut self, lineage: Lineage) -> Self {
        self.lineage = Some(lineage);
        self
    }

    pub fn with_addressed_fingerprints(mut self, fingerprints: Vec<String>) -> Self {
        self.addressed_fingerprints = fingerprints;
        self
    }
}

/// Anything that can turn an idea into a pipeline result.
#[async_trait]
pub trait CapsuleGenerator: Send + Sync {
    async fn generate(
        &self,
        idea: CapsuleIdea,
        options: GenerationOptions,
    ) -> PipelineGenerationResult;
}

/// Progress of one request between stages.
enum StageOutcome {
    Pending,
    Analyzed(PedagogicalAnalysis),
    Coded {
        analysis: PedagogicalAnalysis,
        output: CoderOutput,
    },
    Validated {
        analysis: PedagogicalAnalysis,
        capsule: CodeGenerationResult,
        validation: ValidationResult,
    },
    Debugged {
        analysis: PedagogicalAnalysis,
        run: DebugRun,
    },
}

/// Builder for the terminal result of a request.
struct Finish {
    request_id: Uuid,
    idea: CapsuleIdea,
    analysis: Option<PedagogicalAnalysis>,
    validation: Option<ValidationResult>,
    debug_session: Option<DebuggingSession>,
    stats: PipelineStats,
}

impl Finish {
    fn done(
        self,
        status: PipelineStatus,
        rationale: String,
        capsule_id: Option<Uuid>,
        capsule: Option<CodeGenerationResult>,
    ) -> PipelineGenerationResult {
        PipelineGenerationResult {
            request_id: self.request_id,
            capsule_id,
            idea: self.idea,
            analysis: self.analysis,
            capsule,
            debug_session: self.debug_session,
            validation: self.validation,
            status,
            rationale,
            stats: self.stats,
        }
    }

    fn failed(self, reason: FailureReason, rationale: String) -> PipelineGenerationResult {
        self.done(PipelineStatus::Failed { reason }, rationale, None, None)
    }
}

/// Pipeline orchestrator.
pub struct PipelineOrchestrator {
    pedagogist: PedagogistAgent,
    coder: CoderAgent,
    validator: ValidatorAgent,
    debugger: DebuggerAgent,
    store: Arc<dyn CapsuleStore>,
    limiter: Arc<Semaphore>,
    config: PipelineConfig,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Wires the stages from one configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration fails validation.
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        sandbox: Arc<dyn Sandbox>,
        store: Arc<dyn CapsuleStore>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let backend = BackendSettings::from_pipeline(&config);
        let pedagogist = PedagogistAgent::new(
            Arc::clone(&llm),
            PedagogistConfig::new()
                .with_backend(backend.clone().with_max_tokens(1500))
                .with_acceptance_threshold(config.acceptance_threshold),
        );
        let coder = CoderAgent::new(
            Arc::clone(&llm),
            CoderConfig::new()
                .with_backend(backend.clone().with_max_tokens(6000))
                .with_min_test_cases(config.min_test_cases),
        );
        let debugger = DebuggerAgent::new(
            llm,
            DebuggerConfig {
                backend: backend.with_max_tokens(6000),
            },
        );
        let validator = ValidatorAgent::new(sandbox, ValidatorConfig::from_pipeline(&config));

        tracing::info!(
            max_concurrent = config.max_concurrent_generations,
            budget_secs = config.wall_clock_budget.as_secs(),
            max_debug_attempts = config.max_debug_attempts,
            "Pipeline orchestrator ready"
        );

        Ok(Self {
            pedagogist,
            coder,
            validator,
            debugger,
            store,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_generations)),
            config,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CapsuleStore> {
        &self.store
    }

    /// Options taken from the orchestrator's configuration.
    pub fn default_options(&self) -> GenerationOptions {
        GenerationOptions::from_config(&self.config)
    }

    /// Runs one request to completion.
    pub async fn generate(
        &self,
        idea: CapsuleIdea,
        options: GenerationOptions,
    ) -> PipelineGenerationResult {
        self.generate_cancellable(idea, options, CancellationToken::new())
            .await
    }

    /// Runs one request; cancelling `token` stops it at the next suspension point.
    pub async fn generate_cancellable(
        &self,
        idea: CapsuleIdea,
        options: GenerationOptions,
        token: CancellationToken,
    ) -> PipelineGenerationResult {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.limiter).acquire_owned() => permit.ok(),
        };

        let result = match permit {
            Some(_permit) => {
                let _in_flight = self.metrics.track_generation();
                self.run(request_id, idea, &options, token).await
            }
            None => Finish {
                request_id,
                idea,
                analysis: None,
                validation: None,
                debug_session: None,
                stats: PipelineStats::default(),
            }
            .failed(
                FailureReason::Cancelled,
                "Cancelled before a generation slot was available".to_string(),
            ),
        };

        self.metrics.record_generation(
            result.status.label(),
            result.idea.language.as_str(),
            started.elapsed().as_secs_f64(),
        );
        tracing::info!(
            request_id = %result.request_id,
            idea_id = %result.idea.idea_id,
            status = %result.status,
            attempts_used = result.stats.attempts_used,
            backend_calls = result.stats.backend_calls,
            sandbox_calls = result.stats.sandbox_calls,
            "Generation finished"
        );
        result
    }

    /// Runs many requests concurrently, bounded by the same semaphore.
    pub async fn generate_batch(
        &self,
        ideas: Vec<CapsuleIdea>,
        options: GenerationOptions,
    ) -> Vec<PipelineGenerationResult> {
        let futures = ideas
            .into_iter()
            .map(|idea| self.generate(idea, options.clone()));
        join_all(futures).await
    }

    async fn run(
        &self,
        request_id: Uuid,
        idea: CapsuleIdea,
        options: &GenerationOptions,
        token: CancellationToken,
    ) -> PipelineGenerationResult {
        let ctx = RunContext::new(options.wall_clock_budget, token);
        let started = Instant::now();
        let mut stats = PipelineStats::default();

        tracing::info!(
            request_id = %request_id,
            idea_id = %idea.idea_id,
            language = %idea.language,
            difficulty = %idea.difficulty,
            "Generation started"
        );

        let mut state = StageOutcome::Pending;
        let (status, rationale, capsule_id, capsule, analysis, validation, debug_session) = loop {
            state = match state {
                StageOutcome::Pending => {
                    let stage_started = Instant::now();
                    let result = self.pedagogist.analyze(&idea, &ctx).await;
                    self.stage_done(&mut stats, Stage::Pedagogist, stage_started);
                    match result {
                        Ok(analysis) => StageOutcome::Analyzed(analysis),
                        Err(e) => break failure(&e, Stage::Pedagogist, None, None),
                    }
                }

                StageOutcome::Analyzed(analysis) => {
                    if !analysis.accepted {
                        let rationale = format!(
                            "Idea rejected with quality score {} (threshold {}): {}",
                            analysis.quality_score,
                            self.config.acceptance_threshold,
                            analysis.rationale
                        );
                        break (PipelineStatus::Rejected, rationale, None, None, Some(analysis), None, None);
                    }
                    let stage_started = Instant::now();
                    let result = self.coder.generate(&idea, &analysis, &ctx).await;
                    self.stage_done(&mut stats, Stage::Coder, stage_started);
                    match result {
                        Ok(output) => StageOutcome::Coded { analysis, output },
                        Err(e) => break failure(&e, Stage::Coder, Some(analysis), None),
                    }
                }

                StageOutcome::Coded { analysis, output } => {
                    let CoderOutput {
                        capsule,
                        solution_syntax_issue,
                    } = output;
                    let validation = match solution_syntax_issue {
                        // unparsable solutions go straight to the debugger
                        Some(issue) => {
                            ValidationResult::syntax_failure(issue.to_string(), capsule.test_cases.len())
                        }
                        None => {
                            let stage_started = Instant::now();
                            let result = self.validator.validate(&capsule, &ctx).await;
                            self.stage_done(&mut stats, Stage::Validator, stage_started);
                            match result {
                                Ok(validation) => validation,
                                Err(e) => break failure(&e, Stage::Validator, Some(analysis), None),
                            }
                        }
                    };
                    StageOutcome::Validated {
                        analysis,
                        capsule,
                        validation,
                    }
                }

                StageOutcome::Validated {
                    analysis,
                    capsule,
                    validation,
                } => {
                    if validation.all_passed {
                        break self
                            .conclude(&idea, analysis, capsule, validation, None, options)
                            .await;
                    }
                    let stage_started = Instant::now();
                    let run = self
                        .debugger
                        .debug(
                            capsule,
                            validation,
                            options.max_debug_attempts,
                            options.test_rewrite_policy,
                            &self.validator,
                            &ctx,
                        )
                        .await;
                    self.stage_done(&mut stats, Stage::Debugger, stage_started);
                    StageOutcome::Debugged { analysis, run }
                }

                StageOutcome::Debugged { analysis, run } => {
                    let DebugRun {
                        session,
                        capsule,
                        validation,
                    } = run;
                    stats.attempts_used = session.attempts.len() as u32;
                    self.metrics.record_debug_attempts(stats.attempts_used);

                    match session.outcome {
                        DebugOutcome::Resolved => {
                            break self
                                .conclude(&idea, analysis, capsule, validation, Some(session), options)
                                .await;
                        }
                        DebugOutcome::Exhausted { reason } => {
                            let rationale = format!(
                                "Debugging stopped after {} fix attempt(s) ({:?}); last run: {}",
                                session.attempts.len(),
                                reason,
                                validation.summary()
                            );
                            break (
                                PipelineStatus::Failed {
                                    reason: FailureReason::from_exhaustion(reason),
                                },
                                rationale,
                                None,
                                None,
                                Some(analysis),
                                Some(validation),
                                Some(session),
                            );
                        }
                    }
                }
            };
        };

        stats.backend_calls = ctx.counters().backend_calls();
        stats.sandbox_calls = ctx.counters().sandbox_calls();
        stats.tokens_used = ctx.counters().tokens_used();
        stats.total_duration_ms = started.elapsed().as_millis() as u64;

        Finish {
            request_id,
            idea,
            analysis,
            validation,
            debug_session,
            stats,
        }
        .done(status, rationale, capsule_id, capsule)
    }

    /// Decides publish versus review for a passing capsule and stores it.
    async fn conclude(
        &self,
        idea: &CapsuleIdea,
        analysis: PedagogicalAnalysis,
        capsule: CodeGenerationResult,
        validation: ValidationResult,
        session: Option<DebuggingSession>,
        options: &GenerationOptions,
    ) -> Terminal {
        if !validation.all_passed {
            let rationale = format!("Refusing to store a capsule that did not pass: {}", validation.summary());
            return (
                PipelineStatus::Failed {
                    reason: FailureReason::DebugExhausted,
                },
                rationale,
                None,
                None,
                Some(analysis),
                Some(validation),
                session,
            );
        }

        let tests_rewritten = session.as_ref().is_some_and(|s| s.tests_rewritten());
        let attempts = session.as_ref().map_or(0, |s| s.attempts.len());
        let passed = format!(
            "All {} tests passed{}",
            validation.total_count,
            if attempts > 0 {
                format!(" after {} fix attempt(s)", attempts)
            } else {
                String::new()
            }
        );

        let (status, rationale) = if tests_rewritten
            && options.test_rewrite_policy == TestRewritePolicy::RequireReview
        {
            (
                PipelineStatus::PendingReview,
                format!("{}; held for review because the debugger rewrote test cases", passed),
            )
        } else if options.publish_mode == PublishMode::HoldForReview {
            (
                PipelineStatus::PendingReview,
                format!("{}; held for review as requested", passed),
            )
        } else {
            (PipelineStatus::Published, passed.clone())
        };

        let capsule_id = Uuid::new_v4();
        let record = CapsuleRecord {
            capsule_id,
            idea: idea.clone(),
            analysis: analysis.clone(),
            capsule: capsule.clone(),
            validation: validation.clone(),
            status: if status == PipelineStatus::Published {
                RecordStatus::Published
            } else {
                RecordStatus::PendingReview
            },
            lineage_root: options.lineage.map_or(capsule_id, |l| l.root),
            supersedes: options.lineage.map(|l| l.supersedes),
            superseded_by: None,
            addressed_fingerprints: options.addressed_fingerprints.clone(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.save(&record).await {
            tracing::error!(capsule_id = %capsule_id, error = %e, "Failed to store capsule");
            return (
                PipelineStatus::Failed {
                    reason: FailureReason::Storage,
                },
                format!("{}, but storing the capsule failed: {}", passed, e),
                None,
                None,
                Some(analysis),
                Some(validation),
                session,
            );
        }

        (
            status,
            rationale,
            Some(capsule_id),
            Some(capsule),
            Some(analysis),
            Some(validation),
            session,
        )
    }

    fn stage_done(&self, stats: &mut PipelineStats, stage: Stage, started: Instant) {
        let elapsed = started.elapsed();
        stats.record_stage(stage, elapsed.as_millis() as u64);
        self.metrics.record_stage(stage.as_str(), elapsed.as_secs_f64());
    }
}

/// Terminal values collected by the stage loop.
type Terminal = (
    PipelineStatus,
    String,
    Option<Uuid>,
    Option<CodeGenerationResult>,
    Option<PedagogicalAnalysis>,
    Option<ValidationResult>,
    Option<DebuggingSession>,
);

fn failure(
    error: &AgentError,
    stage: Stage,
    analysis: Option<PedagogicalAnalysis>,
    validation: Option<ValidationResult>,
) -> Terminal {
    let reason = FailureReason::from_agent_error(error);
    tracing::warn!(stage = %stage, reason = %reason, error = %error, "Generation stage failed");
    (
        PipelineStatus::Failed { reason },
        format!("{} stage failed: {}", stage, error),
        None,
        None,
        analysis,
        validation,
        None,
    )
}

#[async_trait]
impl CapsuleGenerator for PipelineOrchestrator {
    async fn generate(
        &self,
        idea: CapsuleIdea,
        options: GenerationOptions,
    ) -> PipelineGenerationResult {
        PipelineOrchestrator::generate(self, idea, options).await
    }
}
