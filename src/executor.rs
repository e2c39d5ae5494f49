// Task executor: user-defined HTTP polling tasks layered on the job registry.
//
// Every poll re-validates its URL through the SSRF guard immediately before
// use, so a hostname that has been re-pointed at a private address since
// scheduling time is caught at fire time. Redirects are followed manually so
// each hop passes the guard as well.

use crate::config::HttpConfig;
use crate::engine::{CronEngine, JobHandler};
use crate::errors::{SsrfError, TaskError};
use crate::models::ScheduledTask;
use crate::rate_limit::TriggerLimiter;
use crate::registry::{JobRegistry, TriggerHandler};
use crate::ssrf::{SsrfGuard, ValidatedTarget};
use crate::store::TaskStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client, Response};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Registry source under which all polling tasks appear.
pub const TASK_SOURCE: &str = "tasks";

const CLEANUP_JOB_NAME: &str = "cleanup-runs";
const CLEANUP_SCHEDULE: &str = "0 0 3 * * *";
/// Response bytes read at most; the raw body is never stored.
const MAX_RESPONSE_BYTES: usize = 4096;
const MAX_REDIRECTS: usize = 10;
const RUN_RETENTION_DAYS: i64 = 30;
/// One manual trigger per task per this interval.
const TRIGGER_REFILL_INTERVAL: Duration = Duration::from_secs(10);

/// Deterministic registry name for a task.
pub fn task_job_name(task_id: i64) -> String {
    format!("task-{task_id}")
}

struct PollOutcome {
    status_code: u16,
    summary: String,
}

/// Manages the lifecycle and execution of HTTP polling tasks.
pub struct TaskExecutor {
    registry: Arc<JobRegistry>,
    engine: Arc<CronEngine>,
    store: Arc<dyn TaskStore>,
    guard: SsrfGuard,
    limiter: TriggerLimiter,
    http: HttpConfig,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<CronEngine>,
        store: Arc<dyn TaskStore>,
        http: HttpConfig,
    ) -> Arc<Self> {
        let guard = if http.allow_private_targets {
            SsrfGuard::allowing_private_targets()
        } else {
            SsrfGuard::new()
        };
        Arc::new(Self {
            registry,
            engine,
            store,
            guard,
            limiter: TriggerLimiter::new(TRIGGER_REFILL_INTERVAL),
            http,
        })
    }

    /// Schedule every active task from storage. Per-task failures are logged
    /// and skipped; only a storage listing failure aborts the load.
    #[instrument(skip(self))]
    pub async fn load_and_schedule_all(self: &Arc<Self>) -> Result<usize, TaskError> {
        let tasks = self.store.list_active_tasks().await?;
        let total = tasks.len();
        let mut scheduled = 0;
        for task in &tasks {
            match self.add_task(task).await {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "Failed to schedule task, skipping");
                }
            }
        }
        info!(scheduled, total, "Polling tasks scheduled");
        Ok(scheduled)
    }

    /// Schedule one task and register it so it shows up in the job catalog.
    #[instrument(skip(self, task), fields(task_id = task.id, task_name = %task.name))]
    pub async fn add_task(self: &Arc<Self>, task: &ScheduledTask) -> Result<(), TaskError> {
        let name = task_job_name(task.id);
        let effective = self
            .registry
            .effective_schedule(TASK_SOURCE, &name, &task.schedule)
            .await;
        let job = Arc::new(PollJob {
            executor: Arc::downgrade(self),
            task_id: task.id,
        });
        let entry = self
            .engine
            .add_job(&effective, Arc::clone(&job) as Arc<dyn JobHandler>)?;
        self.registry
            .register(
                TASK_SOURCE,
                &name,
                &format!("Polls {}", task.url),
                &task.schedule,
                entry,
                Arc::clone(&job) as Arc<dyn JobHandler>,
                Some(job as Arc<dyn TriggerHandler>),
            )
            .await;
        Ok(())
    }

    /// Drop a task's engine entry, catalog record, schedule override, and
    /// rate-limit bucket.
    pub async fn remove_task(&self, task_id: i64) {
        self.limiter.remove(task_id);
        self.registry
            .unregister(TASK_SOURCE, &task_job_name(task_id))
            .await;
    }

    /// Replace a task's scheduling after its definition changed.
    pub async fn reschedule_task(self: &Arc<Self>, task: &ScheduledTask) -> Result<(), TaskError> {
        self.remove_task(task.id).await;
        self.add_task(task).await
    }

    /// Manually fire a task. Rate-limited per task; execution is dispatched
    /// asynchronously so the caller is not blocked on the network call.
    #[instrument(skip(self))]
    pub async fn trigger_task(self: &Arc<Self>, task_id: i64) -> Result<(), TaskError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskError::TaskNotFound(task_id))?;
        if !self.limiter.try_acquire(task_id) {
            return Err(TaskError::RateLimited { task_id });
        }
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.execute_task(&task).await;
        });
        Ok(())
    }

    /// Register the daily retention job that prunes run history. Schedulable,
    /// overridable, and manually triggerable like any other job.
    pub async fn register_cleanup_job(&self) -> Result<(), TaskError> {
        let job = Arc::new(CleanupJob {
            store: Arc::clone(&self.store),
        });
        let effective = self
            .registry
            .effective_schedule(TASK_SOURCE, CLEANUP_JOB_NAME, CLEANUP_SCHEDULE)
            .await;
        let entry = self
            .engine
            .add_job(&effective, Arc::clone(&job) as Arc<dyn JobHandler>)?;
        self.registry
            .register(
                TASK_SOURCE,
                CLEANUP_JOB_NAME,
                &format!("Deletes task run history older than {RUN_RETENTION_DAYS} days"),
                CLEANUP_SCHEDULE,
                entry,
                Arc::clone(&job) as Arc<dyn JobHandler>,
                Some(job as Arc<dyn TriggerHandler>),
            )
            .await;
        Ok(())
    }

    /// Execute one poll of a task. A run record is created before any network
    /// I/O and finalized exactly once; failures are recorded there and never
    /// propagate to the scheduler loop.
    #[instrument(skip(self, task), fields(task_id = task.id, task_name = %task.name))]
    pub async fn execute_task(&self, task: &ScheduledTask) {
        let started_at = Utc::now();
        let run_id = match self.store.create_run(task.id, started_at).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to create run record, skipping poll");
                return;
            }
        };

        let timeout_secs = if task.timeout_seconds > 0 {
            task.timeout_seconds as u64
        } else {
            self.http.default_timeout_seconds
        };
        let timer = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.poll(&task.url),
        )
        .await
        .unwrap_or(Err(TaskError::Timeout(timeout_secs)));
        let duration_ms = timer.elapsed().as_millis() as i64;
        let completed_at = Utc::now();

        match result {
            Ok(outcome) => {
                info!(status = outcome.status_code, duration_ms, "Task poll completed");
                if let Err(e) = self
                    .store
                    .finalize_run_success(
                        run_id,
                        outcome.status_code,
                        &outcome.summary,
                        duration_ms,
                        completed_at,
                    )
                    .await
                {
                    error!(error = %e, "Failed to finalize run record");
                }
            }
            Err(e) => {
                warn!(error = %e, duration_ms, "Task poll failed");
                if let Err(store_err) = self
                    .store
                    .finalize_run_failure(run_id, &e.to_string(), duration_ms, completed_at)
                    .await
                {
                    error!(error = %store_err, "Failed to finalize run record");
                }
            }
        }
    }

    /// One GET with guard validation on the initial URL and on every redirect
    /// hop, capped at [`MAX_REDIRECTS`].
    async fn poll(&self, raw_url: &str) -> Result<PollOutcome, TaskError> {
        let mut target = self.guard.validate(raw_url).await?;
        for _ in 0..=MAX_REDIRECTS {
            let response = self.fetch(&target).await?;
            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        TaskError::HttpRequestFailed(
                            "redirect response missing Location header".to_string(),
                        )
                    })?;
                let next_url = target
                    .url
                    .join(location)
                    .map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;
                debug!(location = %next_url, "Following redirect");
                target = self.guard.validate(next_url.as_str()).await?;
                continue;
            }
            return self.summarize(response).await;
        }
        Err(SsrfError::TooManyRedirects(MAX_REDIRECTS).into())
    }

    /// Send a single GET. The client is built per hop with the validated
    /// address pinned onto the hostname, so the transport connects to exactly
    /// the address the guard approved and never re-resolves.
    async fn fetch(&self, target: &ValidatedTarget) -> Result<Response, TaskError> {
        let mut builder = Client::builder()
            .user_agent(self.http.user_agent.clone())
            .redirect(redirect::Policy::none());
        if let (Some(domain), Some(addr)) = (target.url.domain(), target.addrs.first()) {
            builder = builder.resolve(domain, *addr);
        }
        let client = builder
            .build()
            .map_err(|e| TaskError::HttpRequestFailed(format!("failed to build client: {e}")))?;
        client
            .get(target.url.clone())
            .send()
            .await
            .map_err(|e| TaskError::HttpRequestFailed(e.to_string()))
    }

    /// Read at most [`MAX_RESPONSE_BYTES`] of the body and reduce the response
    /// to a `content-type (n bytes)` summary. The body itself is discarded so
    /// hostile or sensitive payloads never reach storage.
    async fn summarize(&self, response: Response) -> Result<PollOutcome, TaskError> {
        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let mut read = 0usize;
        let mut response = response;
        while read < MAX_RESPONSE_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    read = (read + chunk.len()).min(MAX_RESPONSE_BYTES);
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(TaskError::HttpRequestFailed(format!(
                        "failed to read response body: {e}"
                    )));
                }
            }
        }

        Ok(PollOutcome {
            status_code,
            summary: format!("{content_type} ({read} bytes)"),
        })
    }
}

/// Engine/registry callback for one polling task. Holds a weak reference to
/// the executor; the executor owns the engine and registry, so a strong
/// reference here would form a cycle.
struct PollJob {
    executor: Weak<TaskExecutor>,
    task_id: i64,
}

#[async_trait]
impl JobHandler for PollJob {
    async fn execute(&self) {
        let Some(executor) = self.executor.upgrade() else {
            return;
        };
        // Re-read the task so a poll always uses the current definition.
        match executor.store.get_task(self.task_id).await {
            Ok(Some(task)) if task.active => executor.execute_task(&task).await,
            Ok(Some(_)) => debug!(task_id = self.task_id, "Task inactive, skipping poll"),
            Ok(None) => warn!(task_id = self.task_id, "Scheduled task no longer exists"),
            Err(e) => {
                error!(task_id = self.task_id, error = %e, "Failed to load task for poll");
            }
        }
    }
}

#[async_trait]
impl TriggerHandler for PollJob {
    async fn trigger(&self) -> anyhow::Result<()> {
        let executor = self
            .executor
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("task executor is no longer running"))?;
        executor.trigger_task(self.task_id).await?;
        Ok(())
    }
}

/// Retention job for run history.
struct CleanupJob {
    store: Arc<dyn TaskStore>,
}

impl CleanupJob {
    async fn run(&self) -> Result<u64, TaskError> {
        let cutoff = Utc::now() - chrono::Duration::days(RUN_RETENTION_DAYS);
        let removed = self.store.delete_runs_older_than(cutoff).await?;
        info!(removed, "Pruned old task runs");
        Ok(removed)
    }
}

#[async_trait]
impl JobHandler for CleanupJob {
    async fn execute(&self) {
        if let Err(e) = self.run().await {
            error!(error = %e, "Run history cleanup failed");
        }
    }
}

#[async_trait]
impl TriggerHandler for CleanupJob {
    async fn trigger(&self) -> anyhow::Result<()> {
        self.run().await?;
        Ok(())
    }
}
