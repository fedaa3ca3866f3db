//! Learner interaction events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AnalyticsError;

/// Kind of learner interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Run,
    Pass,
    Hint,
    #[serde(alias = "give_up", alias = "giveup")]
    GiveUp,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Run => "run",
            EventKind::Pass => "pass",
            EventKind::Hint => "hint",
            EventKind::GiveUp => "give_up",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failing test reported with a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTestOutcome {
    pub test_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One learner interaction with a published capsule. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    /// Delivery id used for deduplication. Events without one are counted as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub capsule_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learner_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_outcome: Option<EventTestOutcome>,
}

impl UserEvent {
    pub fn new(capsule_id: Uuid, kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: None,
            capsule_id,
            learner_id: None,
            kind,
            timestamp,
            test_outcome: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_learner(mut self, learner_id: impl Into<String>) -> Self {
        self.learner_id = Some(learner_id.into());
        self
    }

    pub fn with_failure(mut self, test_index: usize, error: Option<String>) -> Self {
        self.test_outcome = Some(EventTestOutcome { test_index, error });
        self
    }

    /// Parses one JSON line.
    pub fn from_json_line(line: &str) -> Result<Self, AnalyticsError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Total order used to fold windows deterministically.
    pub(crate) fn canonical_key(
        &self,
    ) -> (
        DateTime<Utc>,
        Option<&str>,
        EventKind,
        Option<&str>,
        Option<&EventTestOutcome>,
    ) {
        (
            self.timestamp,
            self.event_id.as_deref(),
            self.kind,
            self.learner_id.as_deref(),
            self.test_outcome.as_ref(),
        )
    }
}
