// Data models shared across the scheduling core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable snapshot of a registered job, returned by `JobRegistry::list`.
/// Run times are read from the live cron engine at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub source: String,
    pub name: String,
    pub description: String,
    pub default_schedule: String,
    pub effective_schedule: String,
    pub is_overridden: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub can_trigger: bool,
}

/// Persisted schedule override for a `(source, name)` job. Absence of a row
/// means the job runs on its default schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerOverride {
    pub source: String,
    pub name: String,
    pub override_schedule: String,
    pub updated_at: DateTime<Utc>,
}

/// User-defined HTTP polling task, owned by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub schedule: String,
    pub timeout_seconds: i32,
    pub active: bool,
}

/// One execution of a polling task. Created before any network I/O starts and
/// finalized exactly once through either the success or the failure path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: Uuid,
    pub task_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_code: Option<i32>,
    pub response_summary: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl TaskRun {
    /// A run is finished once either finalize path has executed.
    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_run_is_finished() {
        let mut run = TaskRun {
            id: Uuid::new_v4(),
            task_id: 1,
            started_at: Utc::now(),
            completed_at: None,
            status_code: None,
            response_summary: None,
            error_message: None,
            duration_ms: None,
        };
        assert!(!run.is_finished());
        run.completed_at = Some(Utc::now());
        assert!(run.is_finished());
    }

    #[test]
    fn test_job_info_serializes_run_times_as_null_when_unset() {
        let info = JobInfo {
            source: "core".to_string(),
            name: "sitemap".to_string(),
            description: "Regenerates the sitemap".to_string(),
            default_schedule: "0 0 3 * * *".to_string(),
            effective_schedule: "0 0 3 * * *".to_string(),
            is_overridden: false,
            next_run: None,
            last_run: None,
            can_trigger: false,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["next_run"], serde_json::Value::Null);
        assert_eq!(json["source"], "core");
    }
}
