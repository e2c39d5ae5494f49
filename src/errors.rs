// Error types for the scheduling core, one enum per failure family.

use std::net::IpAddr;
use thiserror::Error;

/// Cron expression and schedule calculation errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next execution time for expression '{0}'")]
    NoNextExecution(String),
}

/// Job registry operation errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Job not found: {job_source}:{name}")]
    JobNotFound { job_source: String, name: String },

    #[error("Job {job_source}:{name} does not support manual triggering")]
    TriggerUnavailable { job_source: String, name: String },

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// Both the new schedule and the rollback to the previous schedule failed.
    /// The job is still registered but has no live engine entry and will not
    /// fire again until re-registered.
    #[error(
        "Job {job_source}:{name} left unscheduled: applying new schedule failed ({apply}) \
         and rollback to previous schedule failed ({rollback})"
    )]
    CriticalRescheduleFailure {
        job_source: String,
        name: String,
        apply: ScheduleError,
        rollback: ScheduleError,
    },

    #[error("Manual trigger failed: {0}")]
    TriggerFailed(#[source] anyhow::Error),
}

/// Outbound URL validation errors raised by the SSRF guard
#[derive(Error, Debug)]
pub enum SsrfError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Disallowed URL scheme '{0}': only http and https are permitted")]
    DisallowedScheme(String),

    #[error("URL has no hostname")]
    MissingHostname,

    #[error("Hostname '{0}' is blocked")]
    BlockedHostname(String),

    #[error("Hostname '{host}' resolves to private or reserved address {ip}")]
    PrivateOrReservedAddress { host: String, ip: IpAddr },

    #[error("DNS resolution failed for '{host}': {reason}")]
    DnsResolutionFailed { host: String, reason: String },

    #[error("Redirect limit of {0} exceeded")]
    TooManyRedirects(usize),
}

/// Polling task execution errors
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Task {task_id} was triggered too recently, try again in a few seconds")]
    RateLimited { task_id: i64 },

    #[error(transparent)]
    Ssrf(#[from] SsrfError),

    #[error("HTTP request failed: {0}")]
    HttpRequestFailed(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::ConnectionFailed(err.to_string())
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::JobNotFound {
            job_source: "core".to_string(),
            name: "cleanup".to_string(),
        };
        assert_eq!(err.to_string(), "Job not found: core:cleanup");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_critical_reschedule_failure_mentions_both_causes() {
        let err = RegistryError::CriticalRescheduleFailure {
            job_source: "tasks".to_string(),
            name: "task-1".to_string(),
            apply: ScheduleError::InvalidCronExpression {
                expression: "bad".to_string(),
                reason: "parse error".to_string(),
            },
            rollback: ScheduleError::NoNextExecution("0 0 3 * * *".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("bad"));
        assert!(msg.contains("0 0 3 * * *"));
    }

    #[test]
    fn test_ssrf_error_display() {
        let err = SsrfError::DisallowedScheme("ftp".to_string());
        assert!(err.to_string().contains("ftp"));
    }
}
