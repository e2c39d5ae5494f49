// PostgreSQL-backed stores for overrides, tasks, and run history.

use crate::config::DatabaseConfig;
use crate::errors::StoreError;
use crate::models::ScheduledTask;
use crate::store::{OverrideStore, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Open a connection pool from configuration.
#[instrument(skip(config), fields(max_connections = config.max_connections))]
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create database pool");
            StoreError::ConnectionFailed(e.to_string())
        })?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool initialized"
    );
    Ok(pool)
}

/// Create the override table if it does not exist yet. Safety net that keeps
/// the core working independently of external migration tooling.
#[instrument(skip(pool))]
pub async fn ensure_override_table(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_overrides (
            source TEXT NOT NULL,
            name TEXT NOT NULL,
            override_schedule TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (source, name)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Override rows keyed by `(source, name)`.
pub struct PgOverrideStore {
    pool: PgPool,
}

impl PgOverrideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OverrideStore for PgOverrideStore {
    #[instrument(skip(self))]
    async fn get_override(&self, source: &str, name: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT override_schedule FROM scheduler_overrides WHERE source = $1 AND name = $2",
        )
        .bind(source)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get::<String, _>("override_schedule"))
            .transpose()
            .map_err(StoreError::from)
    }

    #[instrument(skip(self))]
    async fn upsert_override(
        &self,
        source: &str,
        name: &str,
        schedule: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_overrides (source, name, override_schedule, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (source, name)
            DO UPDATE SET override_schedule = EXCLUDED.override_schedule, updated_at = now()
            "#,
        )
        .bind(source)
        .bind(name)
        .bind(schedule)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_override(&self, source: &str, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM scheduler_overrides WHERE source = $1 AND name = $2")
            .bind(source)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Polling task definitions and run history.
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<ScheduledTask, StoreError> {
        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            schedule: row.try_get("schedule")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            active: row.try_get("active")?,
        })
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self))]
    async fn list_active_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, url, schedule, timeout_seconds, active
            FROM scheduled_tasks
            WHERE active = true
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            tasks.push(Self::task_from_row(row)?);
        }
        tracing::debug!(count = tasks.len(), "Loaded active polling tasks");
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, url, schedule, timeout_seconds, active
            FROM scheduled_tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn create_run(
        &self,
        task_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO task_runs (id, task_id, started_at) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(task_id)
            .bind(started_at)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    #[instrument(skip(self, summary))]
    async fn finalize_run_success(
        &self,
        run_id: Uuid,
        status_code: u16,
        summary: &str,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE task_runs
            SET completed_at = $2, status_code = $3, response_summary = $4, duration_ms = $5
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(completed_at)
        .bind(i32::from(status_code))
        .bind(summary)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn finalize_run_failure(
        &self,
        run_id: Uuid,
        error_message: &str,
        duration_ms: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE task_runs
            SET completed_at = $2, error_message = $3, duration_ms = $4
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(completed_at)
        .bind(error_message)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_runs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM task_runs WHERE started_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
