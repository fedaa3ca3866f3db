//! Per-capsule engagement aggregate.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{EventKind, UserEvent};
use super::tracker::EventWindow;

/// How many failing tests `top_failing_tests` keeps.
pub const TOP_FAILING_TESTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailingTestCount {
    pub test_index: usize,
    pub failures: u64,
}

/// Aggregate over one event window. Recomputed, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetrics {
    pub capsule_id: Uuid,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    /// Events after deduplication.
    pub event_count: u64,
    pub runs: u64,
    pub passes: u64,
    pub hints: u64,
    pub give_ups: u64,
    pub distinct_learners: u64,
    /// Events that reported a failing test.
    pub test_failures: u64,
    /// Runs per pass; equals `runs` when nobody passed.
    pub run_to_pass_ratio: f64,
    pub give_up_rate: f64,
    pub hint_utilization: f64,
    /// Most failed tests first, ties broken by index.
    pub top_failing_tests: Vec<FailingTestCount>,
}

impl ContentMetrics {
    /// Folds a window into metrics.
    ///
    /// Duplicate deliveries (same `event_id`) count once and the fold runs
    /// over a canonical ordering, so the result depends only on the set of
    /// events in the window.
    pub fn compute(window: &EventWindow) -> Self {
        let events = canonical_events(window.events());

        let mut runs = 0u64;
        let mut passes = 0u64;
        let mut hints = 0u64;
        let mut give_ups = 0u64;
        let mut learners: HashSet<&str> = HashSet::new();
        let mut failing: BTreeMap<usize, u64> = BTreeMap::new();

        for event in &events {
            match event.kind {
                EventKind::Run => runs += 1,
                EventKind::Pass => passes += 1,
                EventKind::Hint => hints += 1,
                EventKind::GiveUp => give_ups += 1,
            }
            if let Some(learner) = event.learner_id.as_deref() {
                learners.insert(learner);
            }
            if let Some(outcome) = &event.test_outcome {
                *failing.entry(outcome.test_index).or_default() += 1;
            }
        }

        let event_count = events.len() as u64;
        let test_failures = failing.values().sum();
        let rate = |count: u64| {
            if event_count == 0 {
                0.0
            } else {
                count as f64 / event_count as f64
            }
        };

        let run_to_pass_ratio = if passes == 0 {
            runs as f64
        } else {
            runs as f64 / passes as f64
        };

        let mut top_failing_tests: Vec<FailingTestCount> = failing
            .into_iter()
            .map(|(test_index, failures)| FailingTestCount {
                test_index,
                failures,
            })
            .collect();
        top_failing_tests.sort_by(|a, b| {
            b.failures
                .cmp(&a.failures)
                .then(a.test_index.cmp(&b.test_index))
        });
        top_failing_tests.truncate(TOP_FAILING_TESTS);

        Self {
            capsule_id: window.capsule_id,
            window_start: window.start,
            window_end: window.end,
            event_count,
            runs,
            passes,
            hints,
            give_ups,
            distinct_learners: learners.len() as u64,
            test_failures,
            run_to_pass_ratio,
            give_up_rate: rate(give_ups),
            hint_utilization: rate(hints),
            top_failing_tests,
        }
    }

    /// Share of all recorded failures that hit the most-failed test.
    pub fn failure_concentration(&self) -> f64 {
        match self.top_failing_tests.first() {
            Some(top) if self.test_failures > 0 => top.failures as f64 / self.test_failures as f64,
            _ => 0.0,
        }
    }
}

/// Deduplicated events in canonical order.
pub(crate) fn canonical_events(events: &[UserEvent]) -> Vec<&UserEvent> {
    let mut ordered: Vec<&UserEvent> = events.iter().collect();
    ordered.sort_by(|a, b| a.canonical_key().cmp(&b.canonical_key()));

    let mut seen: HashSet<&str> = HashSet::new();
    ordered.retain(|e| match e.event_id.as_deref() {
        Some(id) => seen.insert(id),
        None => true,
    });
    ordered
}
