//! SQLite-backed capsule store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::agents::PedagogicalAnalysis;
use crate::capsule::{CapsuleIdea, CodeGenerationResult, ValidationResult};
use crate::error::StorageError;

use super::{CapsuleRecord, CapsuleStore, RecordStatus};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS capsules (
    capsule_id      TEXT    PRIMARY KEY,
    status          TEXT    NOT NULL,
    lineage_root    TEXT    NOT NULL,
    supersedes      TEXT,
    superseded_by   TEXT,
    language        TEXT    NOT NULL,

    -- idea, analysis, capsule body and validation as one JSON document
    payload         TEXT    NOT NULL,

    created_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_capsules_status ON capsules(status);
CREATE INDEX IF NOT EXISTS idx_capsules_lineage ON capsules(lineage_root);
"#;

/// JSON column content.
#[derive(Serialize, Deserialize)]
struct Payload {
    idea: CapsuleIdea,
    analysis: PedagogicalAnalysis,
    capsule: CodeGenerationResult,
    validation: ValidationResult,
    #[serde(default)]
    addressed_fingerprints: Vec<String>,
}

#[derive(Clone)]
pub struct SqliteCapsuleStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteCapsuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCapsuleStore").finish_non_exhaustive()
    }
}

impl SqliteCapsuleStore {
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = path, "Capsule store opened");
        Ok(Self { pool })
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<CapsuleRecord, StorageError> {
        let capsule_id: String = row.try_get("capsule_id")?;
        let status: String = row.try_get("status")?;
        let lineage_root: String = row.try_get("lineage_root")?;
        let supersedes: Option<String> = row.try_get("supersedes")?;
        let superseded_by: Option<String> = row.try_get("superseded_by")?;
        let payload: String = row.try_get("payload")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let payload: Payload = serde_json::from_str(&payload)?;
        let status = RecordStatus::parse(&status).ok_or_else(|| {
            StorageError::Database(sqlx::Error::Decode(
                format!("unknown capsule status '{}'", status).into(),
            ))
        })?;

        Ok(CapsuleRecord {
            capsule_id: parse_uuid(&capsule_id)?,
            idea: payload.idea,
            analysis: payload.analysis,
            capsule: payload.capsule,
            validation: payload.validation,
            status,
            lineage_root: parse_uuid(&lineage_root)?,
            supersedes: supersedes.as_deref().map(parse_uuid).transpose()?,
            superseded_by: superseded_by.as_deref().map(parse_uuid).transpose()?,
            addressed_fingerprints: payload.addressed_fingerprints,
            created_at,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Database(sqlx::Error::Decode(Box::new(e))))
}

#[async_trait]
impl CapsuleStore for SqliteCapsuleStore {
    async fn save(&self, record: &CapsuleRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&Payload {
            idea: record.idea.clone(),
            analysis: record.analysis.clone(),
            capsule: record.capsule.clone(),
            validation: record.validation.clone(),
            addressed_fingerprints: record.addressed_fingerprints.clone(),
        })?;

        let result = sqlx::query(
            "INSERT INTO capsules (
                capsule_id, status, lineage_root, supersedes, superseded_by,
                language, payload, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(record.capsule_id.to_string())
        .bind(record.status.as_str())
        .bind(record.lineage_root.to_string())
        .bind(record.supersedes.map(|id| id.to_string()))
        .bind(record.superseded_by.map(|id| id.to_string()))
        .bind(record.capsule.language.as_str())
        .bind(payload)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Duplicate(record.capsule_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, capsule_id: Uuid) -> Result<Option<CapsuleRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM capsules WHERE capsule_id = ?1")
            .bind(capsule_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn mark_superseded(
        &self,
        capsule_id: Uuid,
        superseded_by: Uuid,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE capsules SET superseded_by = ?1 WHERE capsule_id = ?2")
            .bind(superseded_by.to_string())
            .bind(capsule_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(capsule_id.to_string()));
        }
        Ok(())
    }

    async fn list_pending_review(&self) -> Result<Vec<CapsuleRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM capsules WHERE status = ?1 ORDER BY created_at")
            .bind(RecordStatus::PendingReview.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn list_lineage(&self, lineage_root: Uuid) -> Result<Vec<CapsuleRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM capsules WHERE lineage_root = ?1 ORDER BY created_at")
            .bind(lineage_root.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut chain = rows.iter().map(Self::decode).collect::<Result<Vec<_>, _>>()?;
        chain.sort_by_key(|r| r.created_at);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::fixtures::record;

    async fn open_temp() -> (tempfile::TempDir, SqliteCapsuleStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("capsules.db");
        let store = SqliteCapsuleStore::open(db_path.to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_dir, store) = open_temp().await;
        let rec = record(RecordStatus::Published);
        store.save(&rec).await.unwrap();

        let loaded = store.require(rec.capsule_id).await.unwrap();
        assert_eq!(loaded.capsule, rec.capsule);
        assert_eq!(loaded.idea, rec.idea);
        assert_eq!(loaded.validation, rec.validation);
        assert_eq!(loaded.lineage_root, rec.capsule_id);
        assert!(loaded.is_live());
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (_dir, store) = open_temp().await;
        let rec = record(RecordStatus::Published);
        store.save(&rec).await.unwrap();
        assert!(matches!(
            store.save(&rec).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_supersede_and_pending() {
        let (_dir, store) = open_temp().await;
        let old = record(RecordStatus::Published);
        let pending = record(RecordStatus::PendingReview);
        store.save(&old).await.unwrap();
        store.save(&pending).await.unwrap();

        store
            .mark_superseded(old.capsule_id, pending.capsule_id)
            .await
            .unwrap();
        assert_eq!(
            store.require(old.capsule_id).await.unwrap().superseded_by,
            Some(pending.capsule_id)
        );

        let listed = store.list_pending_review().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].capsule_id, pending.capsule_id);

        assert!(matches!(
            store.mark_superseded(Uuid::new_v4(), old.capsule_id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lineage_keeps_addressed_fingerprints() {
        let (_dir, store) = open_temp().await;
        let root = record(RecordStatus::Published);
        let mut next = record(RecordStatus::PendingReview);
        next.lineage_root = root.capsule_id;
        next.supersedes = Some(root.capsule_id);
        next.addressed_fingerprints = vec!["fp-1".to_string()];
        store.save(&root).await.unwrap();
        store.save(&next).await.unwrap();
        store.save(&record(RecordStatus::Published)).await.unwrap();

        let chain = store.list_lineage(root.capsule_id).await.unwrap();
        assert_eq!(chain.len(), 2);
        let loaded = chain.iter().find(|r| r.capsule_id == next.capsule_id).unwrap();
        assert_eq!(loaded.addressed_fingerprints, vec!["fp-1".to_string()]);
        assert_eq!(loaded.supersedes, Some(root.capsule_id));
    }
}
