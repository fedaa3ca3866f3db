//! Learner analytics for published capsules.
//!
//! Events are appended to an [`EventTracker`]; everything downstream is a
//! pure computation over an immutable [`EventWindow`]:
//!
//! - [`ContentMetrics::compute`] folds a window into engagement rates
//! - [`evaluate`] compares metrics with [`QualityThresholds`]
//! - [`cluster_failures`] groups failing outcomes into [`ErrorPattern`]s

pub mod content;
pub mod events;
pub mod patterns;
pub mod quality;
pub mod tracker;

use serde::{Deserialize, Serialize};

pub use content::{ContentMetrics, FailingTestCount};
pub use events::{EventKind, EventTestOutcome, UserEvent};
pub use patterns::{cluster_failures, normalize_signature, patterns_for_test, ErrorPattern};
pub use quality::{
    evaluate, ImprovementSuggestion, QualityThresholds, SuggestionCategory, TriggeringMetric,
};
pub use tracker::{EventTracker, EventWindow, IngestReport};

use crate::metrics::MetricsCollector;

/// Analytics settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub thresholds: QualityThresholds,
    /// Clusters seen fewer times are not reported.
    pub min_pattern_frequency: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            min_pattern_frequency: 3,
        }
    }
}

impl AnalyticsConfig {
    pub fn with_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_min_pattern_frequency(mut self, frequency: u64) -> Self {
        self.min_pattern_frequency = frequency;
        self
    }
}

/// Everything derived from one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub metrics: ContentMetrics,
    pub suggestions: Vec<ImprovementSuggestion>,
    pub patterns: Vec<ErrorPattern>,
}

/// Computes metrics, suggestions and error patterns for a window.
pub fn analyze(window: &EventWindow, config: &AnalyticsConfig) -> AnalyticsReport {
    let metrics = ContentMetrics::compute(window);
    let suggestions = evaluate(&metrics, &config.thresholds);
    let patterns = cluster_failures(window, config.min_pattern_frequency);

    let collector = MetricsCollector::new();
    for suggestion in &suggestions {
        collector.record_suggestion(suggestion.category.as_str());
    }

    tracing::debug!(
        capsule_id = %window.capsule_id,
        events = metrics.event_count,
        suggestions = suggestions.len(),
        patterns = patterns.len(),
        "Analytics computed"
    );

    AnalyticsReport {
        metrics,
        suggestions,
        patterns,
    }
}
