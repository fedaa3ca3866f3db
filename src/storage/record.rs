//! Persisted capsule record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::PedagogicalAnalysis;
use crate::capsule::{CapsuleIdea, CodeGenerationResult, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Published,
    PendingReview,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Published => "published",
            RecordStatus::PendingReview => "pending_review",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "published" => Some(RecordStatus::Published),
            "pending_review" => Some(RecordStatus::PendingReview),
            _ => None,
        }
    }
}

/// Authoritative stored form of a capsule.
///
/// `validation` is the result for exactly the stored solution and tests,
/// and always has `all_passed == true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleRecord {
    pub capsule_id: Uuid,
    pub idea: CapsuleIdea,
    pub analysis: PedagogicalAnalysis,
    pub capsule: CodeGenerationResult,
    pub validation: ValidationResult,
    pub status: RecordStatus,
    /// First capsule of the regeneration chain; the capsule itself when new.
    pub lineage_root: Uuid,
    pub supersedes: Option<Uuid>,
    pub superseded_by: Option<Uuid>,
    /// Fingerprints of the suggestions this capsule was regenerated for.
    #[serde(default)]
    pub addressed_fingerprints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl CapsuleRecord {
    /// Published and not replaced.
    pub fn is_live(&self) -> bool {
        self.status == RecordStatus::Published && self.superseded_by.is_none()
    }
}
