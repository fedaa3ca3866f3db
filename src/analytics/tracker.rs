//! Append-only event log, one stream per capsule.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AnalyticsError;
use crate::metrics::MetricsCollector;

use super::events::UserEvent;

/// Result of a bulk ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Immutable snapshot of one capsule's events between two instants.
///
/// `start` and `end` are the requested bounds, or the first and last event
/// timestamps when a bound was left open. They identify the window.
#[derive(Debug, Clone)]
pub struct EventWindow {
    pub capsule_id: Uuid,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    events: Arc<[UserEvent]>,
}

impl EventWindow {
    /// Builds a window from arbitrary events; other capsules' events are dropped.
    pub fn from_events(capsule_id: Uuid, events: impl IntoIterator<Item = UserEvent>) -> Self {
        let mut events: Vec<UserEvent> = events
            .into_iter()
            .filter(|e| e.capsule_id == capsule_id)
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self::bounded(capsule_id, None, None, events)
    }

    fn bounded(
        capsule_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        events: Vec<UserEvent>,
    ) -> Self {
        let start = start.or_else(|| events.first().map(|e| e.timestamp));
        let end = end.or_else(|| events.last().map(|e| e.timestamp));
        Self {
            capsule_id,
            start,
            end,
            events: events.into(),
        }
    }

    pub fn events(&self) -> &[UserEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Append-only store of learner events.
///
/// Events are never edited or removed. Within a capsule they are kept in
/// timestamp order; arrival order breaks ties.
#[derive(Debug, Default)]
pub struct EventTracker {
    streams: RwLock<HashMap<Uuid, Vec<UserEvent>>>,
    metrics: MetricsCollector,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: UserEvent) {
        self.metrics.record_event(event.kind.as_str());
        let mut streams = self.streams.write().await;
        let stream = streams.entry(event.capsule_id).or_default();
        let position = stream.partition_point(|e| e.timestamp <= event.timestamp);
        stream.insert(position, event);
    }

    pub async fn record_all(&self, events: impl IntoIterator<Item = UserEvent>) {
        for event in events {
            self.record(event).await;
        }
    }

    /// Ingests JSON lines. Blank lines are skipped, malformed lines rejected.
    pub async fn ingest_jsonl<R>(&self, reader: R) -> Result<IngestReport, AnalyticsError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut report = IngestReport::default();
        let mut lines = reader.lines();
        let mut line_number = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            match UserEvent::from_json_line(&line) {
                Ok(event) => {
                    self.record(event).await;
                    report.accepted += 1;
                }
                Err(e) => {
                    tracing::warn!(line = line_number, error = %e, "Rejected malformed event");
                    report.rejected += 1;
                }
            }
        }

        tracing::info!(
            accepted = report.accepted,
            rejected = report.rejected,
            "Event ingestion complete"
        );
        Ok(report)
    }

    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport, AnalyticsError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        self.ingest_jsonl(BufReader::new(file)).await
    }

    /// Snapshot of a capsule's events with `start <= timestamp <= end`.
    pub async fn window(
        &self,
        capsule_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<EventWindow, AnalyticsError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AnalyticsError::InvalidWindow {
                    start: s.to_rfc3339(),
                    end: e.to_rfc3339(),
                });
            }
        }

        let streams = self.streams.read().await;
        let events: Vec<UserEvent> = streams
            .get(&capsule_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| start.is_none_or(|s| e.timestamp >= s))
                    .filter(|e| end.is_none_or(|end| e.timestamp <= end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(EventWindow::bounded(capsule_id, start, end, events))
    }

    /// Everything recorded for a capsule.
    pub async fn full_window(&self, capsule_id: Uuid) -> EventWindow {
        let streams = self.streams.read().await;
        let events = streams.get(&capsule_id).cloned().unwrap_or_default();
        EventWindow::bounded(capsule_id, None, None, events)
    }

    pub async fn event_count(&self, capsule_id: Uuid) -> usize {
        self.streams
            .read()
            .await
            .get(&capsule_id)
            .map_or(0, Vec::len)
    }

    pub async fn capsules(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.streams.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}
