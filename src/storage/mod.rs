//! Capsule persistence.
//!
//! The orchestrator writes a [`CapsuleRecord`] for every capsule that passed
//! validation, published or held for review. Readers look records up by id.
//!
//! Two implementations ship with the crate:
//! - [`MemoryCapsuleStore`]: process-local, used by tests and one-shot runs
//! - [`SqliteCapsuleStore`]: SQLite in WAL mode with a JSON payload column

pub mod memory;
pub mod record;
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;

pub use memory::MemoryCapsuleStore;
pub use record::{CapsuleRecord, RecordStatus};
pub use sqlite::SqliteCapsuleStore;

/// Storage contract for capsule records.
#[async_trait]
pub trait CapsuleStore: Send + Sync {
    /// Inserts a new record. Fails with `Duplicate` if the id exists.
    async fn save(&self, record: &CapsuleRecord) -> Result<(), StorageError>;

    /// Lookup by id.
    async fn get(&self, capsule_id: Uuid) -> Result<Option<CapsuleRecord>, StorageError>;

    /// Links `capsule_id` to its replacement. Fails with `NotFound` if absent.
    async fn mark_superseded(
        &self,
        capsule_id: Uuid,
        superseded_by: Uuid,
    ) -> Result<(), StorageError>;

    /// Records held for human review, oldest first.
    async fn list_pending_review(&self) -> Result<Vec<CapsuleRecord>, StorageError>;

    /// Every record whose `lineage_root` is `lineage_root`, oldest first.
    async fn list_lineage(&self, lineage_root: Uuid) -> Result<Vec<CapsuleRecord>, StorageError>;

    /// Like `get`, but a missing record is an error.
    async fn require(&self, capsule_id: Uuid) -> Result<CapsuleRecord, StorageError> {
        self.get(capsule_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(capsule_id.to_string()))
    }
}
