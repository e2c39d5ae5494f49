// Property-based tests for the job registry and schedule parsing.

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use proptest::prelude::*;
use schedcore::engine::{CronEngine, EngineConfig, JobHandler};
use schedcore::registry::{JobRegistry, TriggerHandler};
use schedcore::schedule::{next_occurrence, parse_cron_expression};
use schedcore::store::{MemoryStore, OverrideStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct NoopJob;

#[async_trait]
impl JobHandler for NoopJob {
    async fn execute(&self) {}
}

struct CountingTrigger(AtomicUsize);

#[async_trait]
impl TriggerHandler for CountingTrigger {
    async fn trigger(&self) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn setup() -> (Arc<CronEngine>, Arc<MemoryStore>, Arc<JobRegistry>) {
    let engine = CronEngine::new(EngineConfig::default());
    let store = Arc::new(MemoryStore::new());
    let registry = JobRegistry::new(
        Arc::clone(&engine),
        Arc::clone(&store) as Arc<dyn OverrideStore>,
    );
    (engine, store, registry)
}

async fn register_job(
    engine: &Arc<CronEngine>,
    registry: &JobRegistry,
    source: &str,
    name: &str,
    schedule: &str,
    trigger: Option<Arc<dyn TriggerHandler>>,
) {
    let handler: Arc<dyn JobHandler> = Arc::new(NoopJob);
    let entry = engine.add_job(schedule, Arc::clone(&handler)).unwrap();
    registry
        .register(source, name, "test job", schedule, entry, handler, trigger)
        .await;
}

// A strategy producing valid six-field cron expressions.
fn valid_schedule() -> impl Strategy<Value = String> {
    (0u32..60, 0u32..24).prop_map(|(minute, hour)| format!("0 {minute} {hour} * * *"))
}

// For any set of registered jobs, the catalog is sorted ascending by
// (source, name) and contains exactly one record per distinct key.
#[test]
fn property_catalog_is_sorted_and_deduplicated() {
    proptest!(|(
        keys in prop::collection::vec(("[a-z]{1,6}", "[a-z0-9]{1,8}"), 1..8),
    )| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (engine, _store, registry) = setup();
            let mut distinct: Vec<(String, String)> = keys.clone();
            distinct.sort();
            distinct.dedup();

            for (source, name) in &keys {
                register_job(&engine, &registry, source, name, "0 0 3 * * *", None).await;
            }

            let listed: Vec<(String, String)> = registry
                .list()
                .await
                .into_iter()
                .map(|j| (j.source, j.name))
                .collect();
            prop_assert_eq!(listed, distinct);
            Ok(())
        })?;
    });
}

// For any syntactically invalid schedule string, an update is rejected and
// leaves both the live schedule and the persisted override untouched.
#[test]
fn property_invalid_update_never_mutates_state() {
    proptest!(|(garbage in "[a-z@#]{1,12}")| {
        prop_assume!(parse_cron_expression(&garbage).is_err());
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (engine, store, registry) = setup();
            register_job(&engine, &registry, "core", "job", "0 0 3 * * *", None).await;

            prop_assert!(registry.update_schedule("core", "job", &garbage).await.is_err());

            let jobs = registry.list().await;
            prop_assert_eq!(jobs[0].effective_schedule.as_str(), "0 0 3 * * *");
            prop_assert!(!jobs[0].is_overridden);
            prop_assert_eq!(store.override_for("core", "job"), None);
            prop_assert_eq!(engine.entry_count(), 1);
            Ok(())
        })?;
    });
}

// For any sequence of valid schedule updates, the last applied schedule is
// the one the catalog and the override row both report.
#[test]
fn property_last_valid_update_wins() {
    proptest!(|(
        updates in prop::collection::vec(valid_schedule(), 1..5),
    )| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (engine, store, registry) = setup();
            register_job(&engine, &registry, "core", "job", "0 0 3 * * *", None).await;

            for schedule in &updates {
                registry.update_schedule("core", "job", schedule).await.unwrap();
            }

            let last = updates.last().unwrap().clone();
            let jobs = registry.list().await;
            prop_assert_eq!(jobs[0].effective_schedule.clone(), last.clone());
            prop_assert_eq!(store.override_for("core", "job"), Some(last));
            prop_assert_eq!(engine.entry_count(), 1);
            Ok(())
        })?;
    });
}

// For any number of manual triggers, the handler runs exactly that many times.
#[test]
fn property_trigger_count_matches_calls() {
    proptest!(|(count in 1usize..6)| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (engine, _store, registry) = setup();
            let counter = Arc::new(CountingTrigger(AtomicUsize::new(0)));
            register_job(
                &engine,
                &registry,
                "core",
                "job",
                "0 0 3 * * *",
                Some(Arc::clone(&counter) as Arc<dyn TriggerHandler>),
            )
            .await;

            for _ in 0..count {
                registry.trigger_now("core", "job").await.unwrap();
            }
            prop_assert_eq!(counter.0.load(Ordering::SeqCst), count);
            Ok(())
        })?;
    });
}

// For any daily schedule, the next occurrence is strictly after the anchor
// and lands on the scheduled minute and hour.
#[test]
fn property_next_occurrence_matches_schedule_fields() {
    proptest!(|((minute, hour) in (0u32..60, 0u32..24))| {
        let expression = format!("0 {minute} {hour} * * *");
        let schedule = parse_cron_expression(&expression).unwrap();
        let after = Utc::now();
        let next = next_occurrence(&schedule, after, chrono_tz::UTC).unwrap();
        prop_assert!(next > after);
        prop_assert_eq!(next.minute(), minute);
        prop_assert_eq!(next.hour(), hour);
        prop_assert_eq!(next.second(), 0);
    });
}
