// Cron engine: entry table plus a tokio tick loop that fires due jobs.

use crate::errors::ScheduleError;
use crate::schedule::{next_occurrence, parse_cron_expression};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

/// The work a scheduled entry performs when it fires. Fired entries run as
/// independent tokio tasks and may overlap with each other and with registry
/// mutations.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self);
}

/// Opaque, arena-style identifier for an engine entry. The engine holds no
/// back-reference to whoever registered the entry.
pub type EntryId = u64;

/// Live fire-time state of an entry, read at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryTimes {
    pub next_run: Option<DateTime<Utc>>,
    pub prev_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the engine checks for due entries.
    pub tick_interval: Duration,
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            timezone: chrono_tz::UTC,
        }
    }
}

struct Entry {
    schedule: CronSchedule,
    job: Arc<dyn JobHandler>,
    next_run: Option<DateTime<Utc>>,
    prev_run: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EntryTable {
    entries: HashMap<EntryId, Entry>,
    next_id: EntryId,
}

/// Wall-clock schedule evaluator. Entries can be added and removed while the
/// engine is running; the entry table has its own synchronization.
pub struct CronEngine {
    config: EngineConfig,
    table: Mutex<EntryTable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CronEngine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            table: Mutex::new(EntryTable::default()),
            shutdown_tx,
        })
    }

    /// Register a job under a cron expression. The expression is validated
    /// here; the first fire time is computed immediately.
    pub fn add_job(
        &self,
        spec: &str,
        job: Arc<dyn JobHandler>,
    ) -> Result<EntryId, ScheduleError> {
        let schedule = parse_cron_expression(spec)?;
        let next_run = next_occurrence(&schedule, Utc::now(), self.config.timezone);
        let mut table = self.lock_table();
        table.next_id += 1;
        let id = table.next_id;
        table.entries.insert(
            id,
            Entry {
                schedule,
                job,
                next_run,
                prev_run: None,
            },
        );
        debug!(entry_id = id, spec, "Engine entry added");
        Ok(id)
    }

    /// Remove an entry. Removing an unknown id is a no-op.
    pub fn remove(&self, id: EntryId) {
        if self.lock_table().entries.remove(&id).is_some() {
            debug!(entry_id = id, "Engine entry removed");
        }
    }

    /// Live next/previous fire times for an entry, if it still exists.
    pub fn entry(&self, id: EntryId) -> Option<EntryTimes> {
        self.lock_table().entries.get(&id).map(|e| EntryTimes {
            next_run: e.next_run,
            prev_run: e.prev_run,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.lock_table().entries.len()
    }

    /// Start the timing loop in a background task.
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(
                tick_interval_ms = engine.config.tick_interval.as_millis() as u64,
                timezone = %engine.config.timezone,
                "Cron engine started"
            );
            let mut ticker = tokio::time::interval(engine.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.tick(Utc::now());
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Cron engine stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Signal the timing loop to stop. Entries stay registered.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Fire every entry whose next run time has passed. Handlers are spawned
    /// so a slow job never stalls the tick loop.
    fn tick(&self, now: DateTime<Utc>) {
        let due: Vec<Arc<dyn JobHandler>> = {
            let mut table = self.lock_table();
            let mut due = Vec::new();
            for entry in table.entries.values_mut() {
                if let Some(next) = entry.next_run {
                    if next <= now {
                        entry.prev_run = Some(next);
                        entry.next_run =
                            next_occurrence(&entry.schedule, now, self.config.timezone);
                        due.push(Arc::clone(&entry.job));
                    }
                }
            }
            due
        };

        for job in due {
            tokio::spawn(async move {
                job.execute().await;
            });
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, EntryTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}
