//! Job scheduling core: a registry of every periodic job in the system, a
//! cron engine that fires them, and an executor for user-defined HTTP polling
//! tasks guarded against SSRF and DNS rebinding.
//!
//! Construction order on process start: open the database pool
//! ([`store::connect`]), run [`store::ensure_override_table`], build a
//! [`engine::CronEngine`] and a [`registry::JobRegistry`], register jobs
//! (built-ins directly, polling tasks through [`executor::TaskExecutor`]),
//! then start the engine. On shutdown, stop the engine; entries are released
//! with it.

pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod schedule;
pub mod ssrf;
pub mod store;
pub mod telemetry;
