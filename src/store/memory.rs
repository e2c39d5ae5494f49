// In-memory store implementation, used by tests and light embeddings.

use crate::errors::StoreError;
use crate::models::{ScheduledTask, TaskRun};
use crate::store::{OverrideStore, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Implements both [`OverrideStore`] and [`TaskStore`] over plain hash maps.
/// Writes can be made to fail on demand to exercise the log-don't-fail
/// persistence policy of the registry.
#[derive(Default)]
pub struct MemoryStore {
    overrides: Mutex<HashMap<(String, String), String>>,
    tasks: Mutex<HashMap<i64, ScheduledTask>>,
    runs: Mutex<HashMap<Uuid, TaskRun>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every mutating store call returns a query error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_task(&self, task: ScheduledTask) {
        lock(&self.tasks).insert(task.id, task);
    }

    pub fn remove_task(&self, id: i64) {
        lock(&self.tasks).remove(&id);
    }

    pub fn run(&self, id: Uuid) -> Option<TaskRun> {
        lock(&self.runs).get(&id).cloned()
    }

    /// Run history for one task, oldest first.
    pub fn runs_for_task(&self, task_id: i64) -> Vec<TaskRun> {
        let mut runs: Vec<TaskRun> = lock(&self.runs)
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    pub fn run_count(&self) -> usize {
        lock(&self.runs).len()
    }

    pub fn override_for(&self, source: &str, name: &str) -> Option<String> {
        lock(&self.overrides)
            .get(&(source.to_string(), name.to_string()))
            .cloned()
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::QueryFailed(
                "write failure injected".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl OverrideStore for MemoryStore {
    async fn get_override(&self, source: &str, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.override_for(source, name))
    }

    async fn upsert_override(
        &self,
        source: &str,
        name: &str,
        schedule: &str,
    ) -> Result<(), StoreError> {
        self.check_writes()?;
        lock(&self.overrides).insert(
            (source.to_string(), name.to_string()),
            schedule.to_string(),
        );
        Ok(())
    }

    async fn delete_override(&self, source: &str, name: &str) -> Result<(), StoreError> {
        self.check_writes()?;
        lock(&self.overrides).remove(&(source.to_string(), name.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_active_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let mut tasks: Vec<ScheduledTask> =
            lock(&self.tasks).values().filter(|t| t.active).cloned().collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>, StoreError> {
        Ok(lock(&self.tasks).get(&id).cloned())
    }

    async fn create_run(
        &self,
        task_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        self.check_writes()?;
        let id = Uuid::new_v4();
        lock(&self.runs).insert(
            id,
            TaskRun {
                id,
                task_id,
                started_at,
                completed_at: None,
                status_code: None,
                response_summary: None,
                error_message: None,
                duration_ms: None,
            },
        );
        Ok(id)
    }

    async fn finalize_run_success(
        &self,
        run_id: Uuid,
        status_code: u16,
        summary: &str,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_writes()?;
        let mut runs = lock(&self.runs);
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
        run.completed_at = Some(completed_at);
        run.status_code = Some(i32::from(status_code));
        run.response_summary = Some(summary.to_string());
        run.duration_ms = Some(duration_ms);
        Ok(())
    }

    async fn finalize_run_failure(
        &self,
        run_id: Uuid,
        error_message: &str,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_writes()?;
        let mut runs = lock(&self.runs);
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;
        run.completed_at = Some(completed_at);
        run.error_message = Some(error_message.to_string());
        run.duration_ms = Some(duration_ms);
        Ok(())
    }

    async fn delete_runs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_writes()?;
        let mut runs = lock(&self.runs);
        let before = runs.len();
        runs.retain(|_, run| run.started_at >= cutoff);
        Ok((before - runs.len()) as u64)
    }
}
