//! CLI command definitions for capsule_forge.
//!
//! Each subcommand wires the library pieces together from the environment:
//! the LLM backend from `LITELLM_*`, the sandbox from `CAPSULE_SANDBOX_*`
//! and pipeline limits from `CAPSULE_*` or a YAML file.

use crate::agents::{MentorAgent, MentorConfig, MentorRequest, MentorService};
use crate::analytics::{analyze, AnalyticsConfig, AnalyticsReport, EventTracker};
use crate::capsule::CapsuleIdea;
use crate::feedback::{
    Disposition, FeedbackConfig, FeedbackProcessor, RegenerationPolicy, RegenerationResult,
};
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{
    CancellationToken, CapsuleGenerator, PipelineConfig, PipelineGenerationResult,
    PipelineOrchestrator, PublishMode, TestRewritePolicy,
};
use crate::sandbox::{HttpSandbox, Sandbox};
use crate::storage::{CapsuleStore, MemoryCapsuleStore, SqliteCapsuleStore};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Generate, analyze and improve coding capsules.
#[derive(Parser)]
#[command(name = "capsule_forge")]
#[command(about = "Generate validated coding exercises and improve them from learner feedback")]
#[command(version)]
#[command(
    long_about = "capsule_forge turns a short idea into a validated coding capsule (problem statement, starter code, reference solution and tests), then uses learner events to flag weak capsules and regenerate them.\n\nExample usage:\n  capsule_forge generate --topic \"reverse a linked list\" --language python --difficulty medium --db capsules.db"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate one capsule from an idea.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Compute content metrics, suggestions and error patterns from learner events.
    Analyze(AnalyzeArgs),

    /// Regenerate a stored capsule from its learner feedback.
    Regenerate(RegenerateArgs),

    /// Ask the mentor for a hint on a failing test.
    Mentor(MentorArgs),
}

/// Pipeline settings shared by commands that generate.
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// YAML pipeline configuration; environment variables are used otherwise.
    #[arg(long)]
    pub config: Option<String>,

    /// Model identifier, overriding the configuration.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Maximum debugger fix attempts.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Wall-clock budget per request in seconds.
    #[arg(long)]
    pub budget_secs: Option<u64>,

    /// What to do when the debugger rewrites tests (allow, require_review, forbid).
    #[arg(long)]
    pub test_rewrite_policy: Option<TestRewritePolicy>,
}

/// Arguments for the generate command.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// What the exercise should teach.
    #[arg(short = 't', long)]
    pub topic: String,

    /// Target language (python, javascript, java, csharp, go, sql).
    #[arg(long, default_value = "python")]
    pub language: String,

    /// Difficulty (easy, medium, hard).
    #[arg(short = 'd', long, default_value = "easy")]
    pub difficulty: String,

    /// Who the exercise is for, e.g. "first-year students".
    #[arg(long)]
    pub audience: Option<String>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Store a passing capsule as pending review instead of publishing it.
    #[arg(long)]
    pub hold_for_review: bool,

    /// SQLite database for capsules; an in-memory store is used otherwise.
    #[arg(long, env = "CAPSULE_DB")]
    pub db: Option<String>,

    /// Output the full result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Event source and window shared by analytics commands.
#[derive(clap::Args, Debug, Clone)]
pub struct EventArgs {
    /// JSONL file of learner events.
    #[arg(short = 'e', long)]
    pub events: String,

    /// Capsule to analyze.
    #[arg(short = 'c', long)]
    pub capsule: Uuid,

    /// Window start (RFC 3339); defaults to the first event.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Window end (RFC 3339); defaults to the last event.
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Minimum occurrences before an error signature is reported.
    #[arg(long, default_value_t = 3)]
    pub min_pattern_frequency: u64,
}

/// Arguments for the analyze command.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub events: EventArgs,

    /// Output the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the regenerate command.
#[derive(Parser, Debug)]
pub struct RegenerateArgs {
    #[command(flatten)]
    pub events: EventArgs,

    /// SQLite database holding the capsule.
    #[arg(long, env = "CAPSULE_DB")]
    pub db: String,

    /// replace publishes the new version; queue_for_review holds it for a human.
    #[arg(long, default_value = "queue_for_review")]
    pub policy: RegenerationPolicy,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Output the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the mentor command.
#[derive(Parser, Debug)]
pub struct MentorArgs {
    /// Capsule the learner is working on.
    #[arg(short = 'c', long)]
    pub capsule: Uuid,

    /// Index of the failing test.
    #[arg(short = 't', long)]
    pub test: usize,

    /// File with the learner's current code.
    #[arg(long)]
    pub code: String,

    /// Hints the learner has already received for this test.
    #[arg(long, default_value_t = 0)]
    pub prior_hints: u32,

    /// SQLite database holding the capsule.
    #[arg(long, env = "CAPSULE_DB")]
    pub db: String,

    /// Optional JSONL event file used to find common errors on this test.
    #[arg(short = 'e', long)]
    pub events: Option<String>,

    /// Model identifier for the mentor.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Output the hint as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Analyze(args) => run_analyze_command(args).await,
        Commands::Regenerate(args) => run_regenerate_command(args).await,
        Commands::Mentor(args) => run_mentor_command(args).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn build_llm_client() -> anyhow::Result<Arc<dyn LlmProvider>> {
    let client = LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Set LITELLM_API_BASE (and LITELLM_API_KEY if the endpoint needs one).",
            e
        )
    })?;
    info!(model = client.default_model(), "Using LiteLLM client from environment");
    Ok(Arc::new(client))
}

fn build_sandbox() -> anyhow::Result<Arc<dyn Sandbox>> {
    let sandbox = HttpSandbox::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to initialize sandbox client: {}", e))?;
    Ok(Arc::new(sandbox))
}

async fn open_store(db: Option<&str>) -> anyhow::Result<Arc<dyn CapsuleStore>> {
    match db {
        Some(path) => {
            let store = SqliteCapsuleStore::open(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open capsule database {}: {}", path, e))?;
            info!(path = path, "Using SQLite capsule store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No --db given; generated capsules are kept in memory only");
            Ok(Arc::new(MemoryCapsuleStore::new()))
        }
    }
}

fn load_pipeline_config(args: &PipelineArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)?,
        None => PipelineConfig::from_env()?,
    };
    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }
    if let Some(attempts) = args.max_attempts {
        config = config.with_max_debug_attempts(attempts);
    }
    if let Some(secs) = args.budget_secs {
        config = config.with_wall_clock_budget(Duration::from_secs(secs));
    }
    if let Some(policy) = args.test_rewrite_policy {
        config = config.with_test_rewrite_policy(policy);
    }
    config.validate()?;
    Ok(config)
}

/// Cancels `token` on Ctrl-C until the returned handle is aborted.
fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the running request");
            token.cancel();
        }
    })
}

async fn load_report(args: &EventArgs) -> anyhow::Result<(Arc<EventTracker>, AnalyticsReport)> {
    let path = Path::new(&args.events);
    if !path.exists() {
        return Err(anyhow::anyhow!("Event file does not exist: {}", args.events));
    }

    let tracker = Arc::new(EventTracker::new());
    let ingest = tracker.ingest_file(path).await?;
    if ingest.rejected > 0 {
        warn!(
            accepted = ingest.accepted,
            rejected = ingest.rejected,
            "Some event lines could not be parsed"
        );
    }

    let window = tracker.window(args.capsule, args.since, args.until).await?;
    let config = AnalyticsConfig::default().with_min_pattern_frequency(args.min_pattern_frequency);
    let report = analyze(&window, &config);
    Ok((tracker, report))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let mut idea = CapsuleIdea::intake(&args.topic, &args.language, &args.difficulty)?;
    if let Some(audience) = &args.audience {
        idea = idea.with_audience_hint(audience.clone());
    }

    let config = load_pipeline_config(&args.pipeline)?;
    let orchestrator = PipelineOrchestrator::new(
        build_llm_client()?,
        build_sandbox()?,
        open_store(args.db.as_deref()).await?,
        config,
    )?;

    let mut options = orchestrator.default_options();
    if args.hold_for_review {
        options = options.with_publish_mode(PublishMode::HoldForReview);
    }

    let token = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(token.clone());
    let result = orchestrator
        .generate_cancellable(idea, options, token)
        .await;
    watcher.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_generation(&result);
    }
    Ok(())
}

async fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let (_tracker, report) = load_report(&args.events).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn run_regenerate_command(args: RegenerateArgs) -> anyhow::Result<()> {
    let (_tracker, report) = load_report(&args.events).await?;

    let config = load_pipeline_config(&args.pipeline)?;
    let store = open_store(Some(&args.db)).await?;
    let orchestrator = PipelineOrchestrator::new(
        build_llm_client()?,
        build_sandbox()?,
        Arc::clone(&store),
        config,
    )?;
    let options = orchestrator.default_options();
    let generator: Arc<dyn CapsuleGenerator> = Arc::new(orchestrator);

    let processor = FeedbackProcessor::new(
        generator,
        store,
        FeedbackConfig::default().with_policy(args.policy),
        options,
    )?;
    let result = processor.process(args.events.capsule, &report).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_regeneration(&result);
    }
    Ok(())
}

async fn run_mentor_command(args: MentorArgs) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(&args.code)
        .map_err(|e| anyhow::anyhow!("Failed to read learner code {}: {}", args.code, e))?;

    let store = open_store(Some(&args.db)).await?;
    let tracker = Arc::new(EventTracker::new());
    if let Some(events) = &args.events {
        tracker.ingest_file(events).await?;
    }

    let mut config = MentorConfig::default();
    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }
    let service = MentorService::new(
        MentorAgent::new(build_llm_client()?, config),
        store,
        tracker,
        AnalyticsConfig::default(),
    );

    let request = MentorRequest {
        capsule_id: args.capsule,
        learner_code_snapshot: code,
        failing_test_id: args.test,
        prior_hint_count: args.prior_hints,
    };
    let hint = service.answer(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hint)?);
    } else {
        println!("[{} hint, {}]", hint.stage_hint, hint.source.as_str());
        println!("{}", hint.text);
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_generation(result: &PipelineGenerationResult) {
    println!("Status:    {}", result.status);
    println!("Rationale: {}", result.rationale);
    if let Some(id) = result.capsule_id {
        println!("Capsule:   {}", id);
    }
    if let Some(analysis) = &result.analysis {
        println!("Quality:   {}/100", analysis.quality_score);
    }
    if let Some(validation) = &result.validation {
        println!(
            "Tests:     {}/{} passed",
            validation.passed_count, validation.total_count
        );
    }
    println!(
        "Stats:     {} debug attempts, {} backend calls, {} sandbox calls, {} ms",
        result.stats.attempts_used,
        result.stats.backend_calls,
        result.stats.sandbox_calls,
        result.stats.total_duration_ms
    );
    if let Some(capsule) = &result.capsule {
        println!();
        println!("{}", capsule.problem_statement);
    }
}

fn print_report(report: &AnalyticsReport) {
    let m = &report.metrics;
    println!("Capsule {}: {} events", m.capsule_id, m.event_count);
    println!(
        "  runs {}  passes {}  hints {}  give-ups {}  learners {}",
        m.runs, m.passes, m.hints, m.give_ups, m.distinct_learners
    );
    println!(
        "  run/pass {:.2}  give-up rate {:.2}  hint use {:.2}",
        m.run_to_pass_ratio, m.give_up_rate, m.hint_utilization
    );

    if report.suggestions.is_empty() {
        println!("No suggestions.");
    } else {
        println!("Suggestions:");
        for s in &report.suggestions {
            println!(
                "  [{}] {} ({} {:.2} > {:.2})",
                s.category,
                s.description,
                s.triggering_metric.name,
                s.triggering_metric.value,
                s.triggering_metric.threshold
            );
        }
    }

    if !report.patterns.is_empty() {
        println!("Error patterns:");
        for p in &report.patterns {
            println!(
                "  test {}: {} (x{}, {} learners)",
                p.test_index, p.signature, p.frequency, p.distinct_learners
            );
        }
    }
}

fn print_regeneration(result: &RegenerationResult) {
    println!("Capsule:     {}", result.capsule_id);
    println!("Disposition: {}", result.disposition.label());
    if let Disposition::Skipped { reason } = result.disposition {
        println!("Reason:      {}", reason.as_str());
    }
    if let Some(new_id) = result.new_capsule_id() {
        println!("New capsule: {}", new_id);
    }
    if let Some(generation) = &result.generation {
        println!("Pipeline:    {} ({})", generation.status, generation.rationale);
    }
}
