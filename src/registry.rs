// Job registry: catalog of every scheduled job, schedule-override resolution,
// atomic rescheduling with rollback, and manual triggering.

use crate::engine::{CronEngine, EntryId, JobHandler};
use crate::errors::RegistryError;
use crate::models::JobInfo;
use crate::schedule::parse_cron_expression;
use crate::store::OverrideStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

/// Manual-trigger capability, present only on jobs that support it.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn trigger(&self) -> anyhow::Result<()>;
}

struct RegisteredJob {
    description: String,
    default_schedule: String,
    effective_schedule: String,
    entry: EntryId,
    handler: Arc<dyn JobHandler>,
    trigger: Option<Arc<dyn TriggerHandler>>,
}

type JobKey = (String, String);

/// Catalog of all scheduled jobs, keyed by `(source, name)`. The registry is
/// a passive catalog plus scheduling glue for the mutation operations: the
/// caller schedules its engine entry first and hands the entry id to
/// `register`. Mutations hold the write lock across the whole
/// remove/add/persist sequence so a reschedule is atomic to observers.
pub struct JobRegistry {
    engine: Arc<CronEngine>,
    overrides: Arc<dyn OverrideStore>,
    jobs: RwLock<BTreeMap<JobKey, RegisteredJob>>,
}

impl JobRegistry {
    pub fn new(engine: Arc<CronEngine>, overrides: Arc<dyn OverrideStore>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            overrides,
            jobs: RwLock::new(BTreeMap::new()),
        })
    }

    /// The schedule a job should run on: its persisted override when one
    /// exists and is non-empty, otherwise the supplied default. Callers use
    /// this before scheduling so the engine starts with the right cadence.
    pub async fn effective_schedule(&self, source: &str, name: &str, default: &str) -> String {
        match self.overrides.get_override(source, name).await {
            Ok(Some(schedule)) if !schedule.is_empty() => schedule,
            Ok(_) => default.to_string(),
            Err(e) => {
                warn!(source, name, error = %e, "Override lookup failed, using default schedule");
                default.to_string()
            }
        }
    }

    /// Record a job the caller has already scheduled with the engine.
    /// Registration never fails; engine errors belong to the caller.
    #[instrument(skip(self, handler, trigger))]
    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        &self,
        source: &str,
        name: &str,
        description: &str,
        default_schedule: &str,
        entry: EntryId,
        handler: Arc<dyn JobHandler>,
        trigger: Option<Arc<dyn TriggerHandler>>,
    ) {
        let effective = self
            .effective_schedule(source, name, default_schedule)
            .await;
        let mut jobs = self.jobs.write().await;
        let replaced = jobs.insert(
            (source.to_string(), name.to_string()),
            RegisteredJob {
                description: description.to_string(),
                default_schedule: default_schedule.to_string(),
                effective_schedule: effective,
                entry,
                handler,
                trigger,
            },
        );
        // Re-registering a key must not orphan the old entry in the engine.
        if let Some(old) = replaced {
            self.engine.remove(old.entry);
        }
        info!(source, name, "Job registered");
    }

    /// Snapshot of every registered job, ascending by `(source, name)`.
    /// Run times come from the live engine entry at call time.
    pub async fn list(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        jobs.iter()
            .map(|((source, name), job)| {
                let times = self.engine.entry(job.entry);
                JobInfo {
                    source: source.clone(),
                    name: name.clone(),
                    description: job.description.clone(),
                    default_schedule: job.default_schedule.clone(),
                    effective_schedule: job.effective_schedule.clone(),
                    is_overridden: job.effective_schedule != job.default_schedule,
                    next_run: times.as_ref().and_then(|t| t.next_run),
                    last_run: times.as_ref().and_then(|t| t.prev_run),
                    can_trigger: job.trigger.is_some(),
                }
            })
            .collect()
    }

    /// Run a job's manual trigger synchronously and propagate its result.
    #[instrument(skip(self))]
    pub async fn trigger_now(&self, source: &str, name: &str) -> Result<(), RegistryError> {
        let trigger = {
            let jobs = self.jobs.read().await;
            let job = jobs
                .get(&key(source, name))
                .ok_or_else(|| not_found(source, name))?;
            job.trigger
                .clone()
                .ok_or_else(|| RegistryError::TriggerUnavailable {
                    job_source: source.to_string(),
                    name: name.to_string(),
                })?
        };
        trigger.trigger().await.map_err(RegistryError::TriggerFailed)
    }

    /// Move a job to a new schedule and persist the override. Validates the
    /// expression before touching anything; on an engine failure the previous
    /// schedule is re-added so the job is never left unscheduled when
    /// avoidable. A persistence failure is logged, not returned: the
    /// in-memory schedule is already live and authoritative.
    #[instrument(skip(self))]
    pub async fn update_schedule(
        &self,
        source: &str,
        name: &str,
        new_schedule: &str,
    ) -> Result<(), RegistryError> {
        parse_cron_expression(new_schedule).map_err(|e| RegistryError::InvalidSchedule {
            expression: new_schedule.to_string(),
            reason: e.to_string(),
        })?;

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&key(source, name))
            .ok_or_else(|| not_found(source, name))?;

        self.reschedule(source, name, job, new_schedule).await?;

        if let Err(e) = self
            .overrides
            .upsert_override(source, name, new_schedule)
            .await
        {
            warn!(
                source, name, error = %e,
                "Failed to persist schedule override; in-memory schedule is live"
            );
        }
        info!(source, name, schedule = new_schedule, "Job schedule updated");
        Ok(())
    }

    /// Restore a job to its default schedule and drop the persisted override.
    /// A no-op when the job is already at its default.
    #[instrument(skip(self))]
    pub async fn reset_schedule(&self, source: &str, name: &str) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&key(source, name))
            .ok_or_else(|| not_found(source, name))?;

        if job.effective_schedule == job.default_schedule {
            return Ok(());
        }

        let default = job.default_schedule.clone();
        self.reschedule(source, name, job, &default).await?;

        if let Err(e) = self.overrides.delete_override(source, name).await {
            warn!(source, name, error = %e, "Failed to delete schedule override row");
        }
        info!(source, name, "Job schedule reset to default");
        Ok(())
    }

    /// Drop a job entirely: engine entry, catalog record, and any persisted
    /// override. Cleanup path, everything best-effort.
    #[instrument(skip(self))]
    pub async fn unregister(&self, source: &str, name: &str) {
        let removed = self.jobs.write().await.remove(&key(source, name));
        if let Some(job) = removed {
            self.engine.remove(job.entry);
            if let Err(e) = self.overrides.delete_override(source, name).await {
                warn!(source, name, error = %e, "Failed to delete schedule override row");
            }
            info!(source, name, "Job unregistered");
        }
    }

    /// Swap a job's engine entry to `schedule`, rolling back to the previous
    /// schedule if the new one cannot be added. Caller holds the write lock.
    async fn reschedule(
        &self,
        source: &str,
        name: &str,
        job: &mut RegisteredJob,
        schedule: &str,
    ) -> Result<(), RegistryError> {
        self.engine.remove(job.entry);
        match self.engine.add_job(schedule, Arc::clone(&job.handler)) {
            Ok(entry) => {
                job.entry = entry;
                job.effective_schedule = schedule.to_string();
                Ok(())
            }
            Err(apply) => {
                let previous = job.effective_schedule.clone();
                match self.engine.add_job(&previous, Arc::clone(&job.handler)) {
                    Ok(entry) => {
                        job.entry = entry;
                        warn!(
                            source, name, schedule, error = %apply,
                            "New schedule rejected by engine; previous schedule restored"
                        );
                        Err(RegistryError::InvalidSchedule {
                            expression: schedule.to_string(),
                            reason: apply.to_string(),
                        })
                    }
                    Err(rollback) => {
                        let err = RegistryError::CriticalRescheduleFailure {
                            job_source: source.to_string(),
                            name: name.to_string(),
                            apply,
                            rollback,
                        };
                        error!(source, name, error = %err, "Job left unscheduled");
                        Err(err)
                    }
                }
            }
        }
    }
}

fn key(source: &str, name: &str) -> JobKey {
    (source.to_string(), name.to_string())
}

fn not_found(source: &str, name: &str) -> RegistryError {
    RegistryError::JobNotFound {
        job_source: source.to_string(),
        name: name.to_string(),
    }
}
