// Persistence interfaces for schedule overrides and task run history.

pub mod memory;
pub mod postgres;

use crate::errors::StoreError;
use crate::models::ScheduledTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::{connect, ensure_override_table, PgOverrideStore, PgTaskStore};

/// Store for persisted schedule overrides, keyed by `(source, name)`.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// The persisted override schedule, or `None` when the job runs on its
    /// default.
    async fn get_override(&self, source: &str, name: &str) -> Result<Option<String>, StoreError>;

    async fn upsert_override(
        &self,
        source: &str,
        name: &str,
        schedule: &str,
    ) -> Result<(), StoreError>;

    async fn delete_override(&self, source: &str, name: &str) -> Result<(), StoreError>;
}

/// Store for polling task definitions and their run history.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_active_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError>;

    async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>, StoreError>;

    /// Create a run row before any network I/O begins.
    async fn create_run(
        &self,
        task_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    async fn finalize_run_success(
        &self,
        run_id: Uuid,
        status_code: u16,
        summary: &str,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn finalize_run_failure(
        &self,
        run_id: Uuid,
        error_message: &str,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete run rows started before `cutoff`, returning how many were removed.
    async fn delete_runs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
