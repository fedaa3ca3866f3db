//! Clustering of learner failures into recurring error patterns.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::content::canonical_events;
use super::tracker::EventWindow;

const MAX_SIGNATURE_CHARS: usize = 160;
const NO_MESSAGE: &str = "<no message>";

/// A failure many learners hit on the same test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub test_index: usize,
    pub signature: String,
    pub frequency: u64,
    pub distinct_learners: u64,
    /// One raw message from the cluster.
    pub sample_error: Option<String>,
}

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").expect("static regex"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]*"|'[^']*'|`[^`]*`"#).expect("static regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\b\d+(\.\d+)?\b").expect("static regex"))
}

/// Reduces an error message to a learner-independent signature.
///
/// Multi-line output (tracebacks) is reduced to its last non-empty line.
/// Addresses, quoted literals and numbers become placeholders.
pub fn normalize_signature(error: &str) -> String {
    let line = error
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("");
    if line.is_empty() {
        return NO_MESSAGE.to_string();
    }

    let line = address_re().replace_all(line, "<addr>");
    let line = quoted_re().replace_all(&line, "<str>");
    let line = number_re().replace_all(&line, "<num>");
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_SIGNATURE_CHARS).collect()
}

#[derive(Default)]
struct Cluster<'a> {
    frequency: u64,
    learners: BTreeSet<&'a str>,
    sample: Option<&'a str>,
}

/// Groups failing outcomes by `(test index, signature)`.
///
/// Clusters seen fewer than `min_frequency` times are dropped. The result is
/// ordered by frequency, then test index, then signature.
pub fn cluster_failures(window: &EventWindow, min_frequency: u64) -> Vec<ErrorPattern> {
    let mut clusters: BTreeMap<(usize, String), Cluster<'_>> = BTreeMap::new();

    for event in canonical_events(window.events()) {
        let Some(outcome) = &event.test_outcome else {
            continue;
        };
        let signature = outcome
            .error
            .as_deref()
            .map(normalize_signature)
            .unwrap_or_else(|| NO_MESSAGE.to_string());

        let cluster = clusters.entry((outcome.test_index, signature)).or_default();
        cluster.frequency += 1;
        if let Some(learner) = event.learner_id.as_deref() {
            cluster.learners.insert(learner);
        }
        if cluster.sample.is_none() {
            cluster.sample = outcome.error.as_deref();
        }
    }

    let mut patterns: Vec<ErrorPattern> = clusters
        .into_iter()
        .filter(|(_, c)| c.frequency >= min_frequency.max(1))
        .map(|((test_index, signature), c)| ErrorPattern {
            test_index,
            signature,
            frequency: c.frequency,
            distinct_learners: c.learners.len() as u64,
            sample_error: c.sample.map(str::to_string),
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then(a.test_index.cmp(&b.test_index))
            .then(a.signature.cmp(&b.signature))
    });
    patterns
}

/// Patterns for one test, most frequent first.
pub fn patterns_for_test(patterns: &[ErrorPattern], test_index: usize) -> Vec<&ErrorPattern> {
    patterns.iter().filter(|p| p.test_index == test_index).collect()
}
