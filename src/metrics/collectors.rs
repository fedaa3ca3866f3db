//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! records unconditionally and tests need no setup.

use super::prometheus::{
    BACKEND_CALLS_TOTAL, BACKEND_TOKENS_TOTAL, DEBUG_ATTEMPTS, EVENTS_INGESTED_TOTAL,
    GENERATIONS_IN_FLIGHT, GENERATIONS_TOTAL, GENERATION_DURATION, MENTOR_HINTS_TOTAL,
    REGENERATIONS_TOTAL, SANDBOX_CALLS_TOTAL, STAGE_LATENCY, SUGGESTIONS_TOTAL,
};

/// Metrics collector for recording capsule-forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use capsule_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_generation("published", "python", 42.0);
/// collector.record_backend_call("coder", "success", 1800);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished generation request.
    pub fn record_generation(&self, status: &str, language: &str, duration_secs: f64) {
        if let Some(total) = GENERATIONS_TOTAL.get() {
            total.with_label_values(&[status, language]).inc();
        }

        if let Some(duration) = GENERATION_DURATION.get() {
            duration.with_label_values(&[status]).observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            language = language,
            duration_secs = duration_secs,
            "Recorded generation metric"
        );
    }

    /// Record how long one stage took.
    pub fn record_stage(&self, stage: &str, duration_secs: f64) {
        if let Some(latency) = STAGE_LATENCY.get() {
            latency.with_label_values(&[stage]).observe(duration_secs);
        }
    }

    /// Record the number of debugger attempts a generation consumed.
    pub fn record_debug_attempts(&self, attempts: u32) {
        if let Some(histogram) = DEBUG_ATTEMPTS.get() {
            histogram.observe(f64::from(attempts));
        }
    }

    /// Record one backend call.
    ///
    /// `outcome` is one of "success", "unusable", "error" or "timeout".
    pub fn record_backend_call(&self, stage: &str, outcome: &str, tokens: u32) {
        if let Some(calls) = BACKEND_CALLS_TOTAL.get() {
            calls.with_label_values(&[stage, outcome]).inc();
        }

        if tokens > 0 {
            if let Some(total) = BACKEND_TOKENS_TOTAL.get() {
                total.with_label_values(&[stage]).inc_by(f64::from(tokens));
            }
        }

        tracing::trace!(
            stage = stage,
            outcome = outcome,
            tokens = tokens,
            "Recorded backend call metric"
        );
    }

    /// Record one sandbox call.
    pub fn record_sandbox_call(&self, outcome: &str) {
        if let Some(calls) = SANDBOX_CALLS_TOTAL.get() {
            calls.with_label_values(&[outcome]).inc();
        }
    }

    /// Record an ingested learner event.
    pub fn record_event(&self, kind: &str) {
        if let Some(events) = EVENTS_INGESTED_TOTAL.get() {
            events.with_label_values(&[kind]).inc();
        }
    }

    /// Record an emitted improvement suggestion.
    pub fn record_suggestion(&self, category: &str) {
        if let Some(suggestions) = SUGGESTIONS_TOTAL.get() {
            suggestions.with_label_values(&[category]).inc();
        }
    }

    /// Record how a regeneration request was handled.
    pub fn record_regeneration(&self, disposition: &str) {
        if let Some(regenerations) = REGENERATIONS_TOTAL.get() {
            regenerations.with_label_values(&[disposition]).inc();
        }

        tracing::trace!(disposition = disposition, "Recorded regeneration metric");
    }

    /// Record a served mentor hint.
    pub fn record_mentor_hint(&self, stage: &str, source: &str) {
        if let Some(hints) = MENTOR_HINTS_TOTAL.get() {
            hints.with_label_values(&[stage, source]).inc();
        }
    }

    /// Increment the in-flight generations gauge.
    pub fn inc_generations_in_flight(&self) {
        if let Some(gauge) = GENERATIONS_IN_FLIGHT.get() {
            gauge.inc();
        }
    }

    /// Decrement the in-flight generations gauge.
    pub fn dec_generations_in_flight(&self) {
        if let Some(gauge) = GENERATIONS_IN_FLIGHT.get() {
            gauge.dec();
        }
    }

    /// Counts one generation as in flight until the guard is dropped.
    pub fn track_generation(&self) -> InFlightGuard<'_> {
        self.inc_generations_in_flight();
        InFlightGuard { metrics: self }
    }
}

/// Decrements the in-flight gauge on drop, including when the request is abandoned.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    metrics: &'a MetricsCollector,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.dec_generations_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_is_zero_sized() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_generation_pipeline() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();
        let in_flight = || GENERATIONS_IN_FLIGHT.get().map(|g| g.get()).unwrap_or_default();
        let before = in_flight();

        let guard = collector.track_generation();
        assert_eq!(in_flight(), before + 1.0);
        collector.record_stage("pedagogist", 1.2);
        collector.record_backend_call("coder", "success", 1500);
        collector.record_backend_call("coder", "unusable", 0);
        collector.record_sandbox_call("ok");
        collector.record_debug_attempts(2);
        collector.record_generation("published", "python", 12.5);
        drop(guard);
        assert_eq!(in_flight(), before);

        let text = export_metrics();
        assert!(text.contains("capsule_forge_generations_total"));
        assert!(text.contains("capsule_forge_backend_calls_total"));
    }

    #[test]
    fn test_record_flywheel() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_event("give_up");
        collector.record_suggestion("high_give_up_rate");
        collector.record_regeneration("replaced");
        collector.record_mentor_hint("nudge", "template");

        let text = export_metrics();
        assert!(text.contains("capsule_forge_events_ingested_total"));
    }
}
