//! Threshold evaluation over `ContentMetrics`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::content::ContentMetrics;

/// Quality boundaries. A metric strictly above its limit triggers a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub max_give_up_rate: f64,
    pub max_run_to_pass_ratio: f64,
    pub max_hint_utilization: f64,
    /// Share of all failures landing on a single test.
    pub failure_concentration: f64,
    /// Windows with fewer events are not judged.
    pub min_events: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_give_up_rate: 0.40,
            max_run_to_pass_ratio: 8.0,
            max_hint_utilization: 0.50,
            failure_concentration: 0.60,
            min_events: 20,
        }
    }
}

impl QualityThresholds {
    pub fn with_max_give_up_rate(mut self, rate: f64) -> Self {
        self.max_give_up_rate = rate;
        self
    }

    pub fn with_max_run_to_pass_ratio(mut self, ratio: f64) -> Self {
        self.max_run_to_pass_ratio = ratio;
        self
    }

    pub fn with_max_hint_utilization(mut self, rate: f64) -> Self {
        self.max_hint_utilization = rate;
        self
    }

    pub fn with_failure_concentration(mut self, share: f64) -> Self {
        self.failure_concentration = share;
        self
    }

    pub fn with_min_events(mut self, min_events: u64) -> Self {
        self.min_events = min_events;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    HighGiveUpRate,
    HighRunToPassRatio,
    HighHintUtilization,
    ConcentratedTestFailure,
}

impl SuggestionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionCategory::HighGiveUpRate => "high_give_up_rate",
            SuggestionCategory::HighRunToPassRatio => "high_run_to_pass_ratio",
            SuggestionCategory::HighHintUtilization => "high_hint_utilization",
            SuggestionCategory::ConcentratedTestFailure => "concentrated_test_failure",
        }
    }
}

impl std::fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The metric value that crossed its boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeringMetric {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    pub capsule_id: Uuid,
    pub category: SuggestionCategory,
    pub description: String,
    pub triggering_metric: TriggeringMetric,
    /// Test the suggestion is about, for concentrated failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_index: Option<usize>,
    /// Stable identity: same capsule, category and window give the same value.
    pub fingerprint: String,
}

/// Compares metrics against thresholds. Pure; at most one suggestion per category.
pub fn evaluate(metrics: &ContentMetrics, thresholds: &QualityThresholds) -> Vec<ImprovementSuggestion> {
    if metrics.event_count < thresholds.min_events {
        return Vec::new();
    }

    let mut suggestions = Vec::new();
    let mut emit = |category: SuggestionCategory,
                    description: String,
                    name: &str,
                    value: f64,
                    threshold: f64,
                    test_index: Option<usize>| {
        suggestions.push(ImprovementSuggestion {
            capsule_id: metrics.capsule_id,
            category,
            description,
            triggering_metric: TriggeringMetric {
                name: name.to_string(),
                value,
                threshold,
            },
            test_index,
            fingerprint: fingerprint(metrics, category),
        });
    };

    if metrics.give_up_rate > thresholds.max_give_up_rate {
        emit(
            SuggestionCategory::HighGiveUpRate,
            format!(
                "{:.0}% of learner events are give-ups; the exercise needs more scaffolding or a gentler difficulty ramp",
                metrics.give_up_rate * 100.0
            ),
            "give_up_rate",
            metrics.give_up_rate,
            thresholds.max_give_up_rate,
            None,
        );
    }

    if metrics.run_to_pass_ratio > thresholds.max_run_to_pass_ratio {
        emit(
            SuggestionCategory::HighRunToPassRatio,
            format!(
                "learners need {:.1} runs per pass; clarify the problem statement and expected output format",
                metrics.run_to_pass_ratio
            ),
            "run_to_pass_ratio",
            metrics.run_to_pass_ratio,
            thresholds.max_run_to_pass_ratio,
            None,
        );
    }

    if metrics.hint_utilization > thresholds.max_hint_utilization {
        emit(
            SuggestionCategory::HighHintUtilization,
            format!(
                "{:.0}% of learner events are hint requests; the starter code should guide learners further",
                metrics.hint_utilization * 100.0
            ),
            "hint_utilization",
            metrics.hint_utilization,
            thresholds.max_hint_utilization,
            None,
        );
    }

    let concentration = metrics.failure_concentration();
    if concentration > thresholds.failure_concentration {
        if let Some(top) = metrics.top_failing_tests.first() {
            emit(
                SuggestionCategory::ConcentratedTestFailure,
                format!(
                    "{:.0}% of failures hit test {}; explain the case it covers or add scaffolding for it",
                    concentration * 100.0,
                    top.test_index
                ),
                "failure_concentration",
                concentration,
                thresholds.failure_concentration,
                Some(top.test_index),
            );
        }
    }

    suggestions
}

fn fingerprint(metrics: &ContentMetrics, category: SuggestionCategory) -> String {
    let bound = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    let mut hasher = Sha256::new();
    hasher.update(metrics.capsule_id.as_bytes());
    hasher.update(category.as_str().as_bytes());
    hasher.update(bound(metrics.window_start).as_bytes());
    hasher.update(b"..");
    hasher.update(bound(metrics.window_end).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::content::FailingTestCount;

    fn metrics(event_count: u64) -> ContentMetrics {
        ContentMetrics {
            capsule_id: Uuid::new_v4(),
            window_start: None,
            window_end: None,
            event_count,
            runs: event_count / 2,
            passes: event_count / 4,
            hints: 0,
            give_ups: 0,
            distinct_learners: 10,
            test_failures: 0,
            run_to_pass_ratio: 2.0,
            give_up_rate: 0.0,
            hint_utilization: 0.0,
            top_failing_tests: Vec::new(),
        }
    }

    #[test]
    fn test_healthy_metrics_emit_nothing() {
        assert!(evaluate(&metrics(100), &QualityThresholds::default()).is_empty());
    }

    #[test]
    fn test_comparisons_are_strict() {
        let mut m = metrics(100);
        m.give_up_rate = 0.40;
        m.run_to_pass_ratio = 8.0;
        assert!(evaluate(&m, &QualityThresholds::default()).is_empty());

        m.give_up_rate = 0.41;
        let suggestions = evaluate(&m, &QualityThresholds::default());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].category, SuggestionCategory::HighGiveUpRate);
        assert!(suggestions[0].description.contains("41%"));
    }

    #[test]
    fn test_small_windows_are_not_judged() {
        let mut m = metrics(19);
        m.give_up_rate = 0.9;
        assert!(evaluate(&m, &QualityThresholds::default()).is_empty());
        assert_eq!(
            evaluate(&m, &QualityThresholds::default().with_min_events(5)).len(),
            1
        );
    }

    #[test]
    fn test_concentrated_failure_names_test() {
        let mut m = metrics(50);
        m.test_failures = 10;
        m.top_failing_tests = vec![
            FailingTestCount { test_index: 2, failures: 7 },
            FailingTestCount { test_index: 0, failures: 3 },
        ];
        let suggestions = evaluate(&m, &QualityThresholds::default());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].test_index, Some(2));
        assert_eq!(suggestions[0].triggering_metric.name, "failure_concentration");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let mut m = metrics(100);
        m.give_up_rate = 0.5;
        m.hint_utilization = 0.6;
        let first = evaluate(&m, &QualityThresholds::default());
        let second = evaluate(&m, &QualityThresholds::default());
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].fingerprint, first[1].fingerprint);
        assert_eq!(first[0].fingerprint.len(), 64);
    }
}
