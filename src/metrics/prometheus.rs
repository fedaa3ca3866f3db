//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by capsule-forge and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all capsule-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished generation requests, labeled by terminal status and language.
pub static GENERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// End-to-end generation duration in seconds, labeled by terminal status.
pub static GENERATION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Generation requests currently holding a concurrency permit.
pub static GENERATIONS_IN_FLIGHT: OnceLock<Gauge> = OnceLock::new();

/// Per-stage latency in seconds, labeled by stage.
pub static STAGE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Debugger fix attempts consumed per generation.
pub static DEBUG_ATTEMPTS: OnceLock<Histogram> = OnceLock::new();

/// Backend calls, labeled by stage and outcome.
pub static BACKEND_CALLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Backend tokens consumed, labeled by stage.
pub static BACKEND_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Sandbox calls, labeled by outcome.
pub static SANDBOX_CALLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Learner events ingested, labeled by kind.
pub static EVENTS_INGESTED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Improvement suggestions emitted, labeled by category.
pub static SUGGESTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Regeneration requests handled, labeled by disposition.
pub static REGENERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Mentor hints served, labeled by hint stage and source (backend or template).
pub static MENTOR_HINTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but leave the
/// first one in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Generation metrics
    let generations_total = CounterVec::new(
        Opts::new(
            "capsule_forge_generations_total",
            "Finished generation requests",
        ),
        &["status", "language"],
    )?;

    let generation_duration = HistogramVec::new(
        HistogramOpts::new(
            "capsule_forge_generation_duration_seconds",
            "End-to-end generation duration in seconds",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["status"],
    )?;

    let generations_in_flight = Gauge::new(
        "capsule_forge_generations_in_flight",
        "Generation requests currently running",
    )?;

    let stage_latency = HistogramVec::new(
        HistogramOpts::new(
            "capsule_forge_stage_latency_seconds",
            "Pipeline stage latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["stage"],
    )?;

    let debug_attempts = Histogram::with_opts(
        HistogramOpts::new(
            "capsule_forge_debug_attempts",
            "Debugger fix attempts per generation",
        )
        .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0]),
    )?;

    // External service metrics
    let backend_calls_total = CounterVec::new(
        Opts::new(
            "capsule_forge_backend_calls_total",
            "Generation backend calls",
        ),
        &["stage", "outcome"],
    )?;

    let backend_tokens_total = CounterVec::new(
        Opts::new(
            "capsule_forge_backend_tokens_total",
            "Generation backend tokens consumed",
        ),
        &["stage"],
    )?;

    let sandbox_calls_total = CounterVec::new(
        Opts::new("capsule_forge_sandbox_calls_total", "Sandbox calls"),
        &["outcome"],
    )?;

    // Flywheel metrics
    let events_ingested_total = CounterVec::new(
        Opts::new(
            "capsule_forge_events_ingested_total",
            "Learner events ingested",
        ),
        &["kind"],
    )?;

    let suggestions_total = CounterVec::new(
        Opts::new(
            "capsule_forge_suggestions_total",
            "Improvement suggestions emitted",
        ),
        &["category"],
    )?;

    let regenerations_total = CounterVec::new(
        Opts::new(
            "capsule_forge_regenerations_total",
            "Regeneration requests handled",
        ),
        &["disposition"],
    )?;

    let mentor_hints_total = CounterVec::new(
        Opts::new("capsule_forge_mentor_hints_total", "Mentor hints served"),
        &["stage", "source"],
    )?;

    registry.register(Box::new(generations_total.clone()))?;
    registry.register(Box::new(generation_duration.clone()))?;
    registry.register(Box::new(generations_in_flight.clone()))?;
    registry.register(Box::new(stage_latency.clone()))?;
    registry.register(Box::new(debug_attempts.clone()))?;
    registry.register(Box::new(backend_calls_total.clone()))?;
    registry.register(Box::new(backend_tokens_total.clone()))?;
    registry.register(Box::new(sandbox_calls_total.clone()))?;
    registry.register(Box::new(events_ingested_total.clone()))?;
    registry.register(Box::new(suggestions_total.clone()))?;
    registry.register(Box::new(regenerations_total.clone()))?;
    registry.register(Box::new(mentor_hints_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = GENERATIONS_TOTAL.set(generations_total);
    let _ = GENERATION_DURATION.set(generation_duration);
    let _ = GENERATIONS_IN_FLIGHT.set(generations_in_flight);
    let _ = STAGE_LATENCY.set(stage_latency);
    let _ = DEBUG_ATTEMPTS.set(debug_attempts);
    let _ = BACKEND_CALLS_TOTAL.set(backend_calls_total);
    let _ = BACKEND_TOKENS_TOTAL.set(backend_tokens_total);
    let _ = SANDBOX_CALLS_TOTAL.set(sandbox_calls_total);
    let _ = EVENTS_INGESTED_TOTAL.set(events_ingested_total);
    let _ = SUGGESTIONS_TOTAL.set(suggestions_total);
    let _ = REGENERATIONS_TOTAL.set(regenerations_total);
    let _ = MENTOR_HINTS_TOTAL.set(mentor_hints_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
    }
}
