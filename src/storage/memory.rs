//! Process-local capsule store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;

use super::{CapsuleRecord, CapsuleStore, RecordStatus};

#[derive(Debug, Default)]
pub struct MemoryCapsuleStore {
    records: RwLock<HashMap<Uuid, CapsuleRecord>>,
}

impl MemoryCapsuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CapsuleStore for MemoryCapsuleStore {
    async fn save(&self, record: &CapsuleRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.capsule_id) {
            return Err(StorageError::Duplicate(record.capsule_id.to_string()));
        }
        records.insert(record.capsule_id, record.clone());
        Ok(())
    }

    async fn get(&self, capsule_id: Uuid) -> Result<Option<CapsuleRecord>, StorageError> {
        Ok(self.records.read().await.get(&capsule_id).cloned())
    }

    async fn mark_superseded(
        &self,
        capsule_id: Uuid,
        superseded_by: Uuid,
    ) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&capsule_id)
            .ok_or_else(|| StorageError::NotFound(capsule_id.to_string()))?;
        record.superseded_by = Some(superseded_by);
        Ok(())
    }

    async fn list_pending_review(&self) -> Result<Vec<CapsuleRecord>, StorageError> {
        let mut pending: Vec<CapsuleRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == RecordStatus::PendingReview)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn list_lineage(&self, lineage_root: Uuid) -> Result<Vec<CapsuleRecord>, StorageError> {
        let mut chain: Vec<CapsuleRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.lineage_root == lineage_root)
            .cloned()
            .collect();
        chain.sort_by_key(|r| r.created_at);
        Ok(chain)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use crate::agents::PedagogicalAnalysis;
    use crate::capsule::{
        CapsuleIdea, CodeGenerationResult, Difficulty, Language, TestCase, TestOutcome,
        ValidationResult,
    };
    use crate::storage::{CapsuleRecord, RecordStatus};

    pub fn record(status: RecordStatus) -> CapsuleRecord {
        let idea = CapsuleIdea::new("sum a list", Language::Python, Difficulty::Easy);
        let capsule_id = Uuid::new_v4();
        CapsuleRecord {
            capsule_id,
            analysis: PedagogicalAnalysis {
                objectives: vec!["iterate over a list".to_string()],
                concepts: vec!["loops".to_string()],
                quality_score: 80,
                accepted: true,
                rationale: "clear".to_string(),
            },
            capsule: CodeGenerationResult {
                problem_statement: "Return the sum of xs.".to_string(),
                starter_code: "def solve(xs):\n    pass\n".to_string(),
                solution_code: "def solve(xs):\n    return sum(xs)\n".to_string(),
                test_cases: vec![TestCase::new(vec![json!([1, 2])], json!(3), "two items")],
                language: idea.language,
                runtime_tier: idea.runtime_tier(),
            },
            idea,
            validation: ValidationResult::from_outcomes(vec![TestOutcome::pass(0)]),
            status,
            lineage_root: capsule_id,
            supersedes: None,
            superseded_by: None,
            addressed_fingerprints: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[tokio::test]
    async fn test_save_and_get() {
        let store = MemoryCapsuleStore::new();
        let rec = record(RecordStatus::Published);
        store.save(&rec).await.unwrap();

        assert_eq!(store.get(rec.capsule_id).await.unwrap(), Some(rec.clone()));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            store.save(&rec).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_superseded() {
        let store = MemoryCapsuleStore::new();
        let rec = record(RecordStatus::Published);
        store.save(&rec).await.unwrap();

        let replacement = Uuid::new_v4();
        store.mark_superseded(rec.capsule_id, replacement).await.unwrap();
        let stored = store.require(rec.capsule_id).await.unwrap();
        assert_eq!(stored.superseded_by, Some(replacement));
        assert!(!stored.is_live());

        assert!(matches!(
            store.mark_superseded(Uuid::new_v4(), replacement).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pending_review() {
        let store = MemoryCapsuleStore::new();
        store.save(&record(RecordStatus::Published)).await.unwrap();
        let pending = record(RecordStatus::PendingReview);
        store.save(&pending).await.unwrap();

        let listed = store.list_pending_review().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].capsule_id, pending.capsule_id);
    }

    #[tokio::test]
    async fn test_list_lineage() {
        let store = MemoryCapsuleStore::new();
        let root = record(RecordStatus::Published);
        let mut next = record(RecordStatus::PendingReview);
        next.lineage_root = root.capsule_id;
        next.supersedes = Some(root.capsule_id);
        next.created_at = root.created_at + chrono::Duration::seconds(1);
        store.save(&next).await.unwrap();
        store.save(&root).await.unwrap();
        store.save(&record(RecordStatus::Published)).await.unwrap();

        let chain = store.list_lineage(root.capsule_id).await.unwrap();
        let ids: Vec<Uuid> = chain.iter().map(|r| r.capsule_id).collect();
        assert_eq!(ids, vec![root.capsule_id, next.capsule_id]);
        assert!(store.list_lineage(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
