// Layered configuration (file, env) for the scheduling core.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub http: HttpConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Engine tick granularity.
    pub tick_interval_seconds: u64,
    /// Timezone cron expressions are evaluated in, e.g. "UTC".
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to task polls that carry no per-task timeout.
    pub default_timeout_seconds: u64,
    pub user_agent: String,
    /// Skip the private/reserved address check of the SSRF guard. Only for
    /// environments that poll internal services on purpose.
    #[serde(default)]
    pub allow_private_targets: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Settings::default();

        let builder = Config::builder()
            .add_source(Config::try_from(&defaults)?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.scheduler.tick_interval_seconds == 0 {
            return Err("Scheduler tick_interval_seconds must be greater than 0".to_string());
        }
        if crate::schedule::parse_timezone(&self.scheduler.timezone).is_err() {
            return Err(format!("Unknown timezone: {}", self.scheduler.timezone));
        }
        if self.http.default_timeout_seconds == 0 {
            return Err("HTTP default_timeout_seconds must be greater than 0".to_string());
        }
        if self.http.user_agent.is_empty() {
            return Err("HTTP user_agent cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/schedcore".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            scheduler: SchedulerConfig {
                tick_interval_seconds: 1,
                timezone: "UTC".to_string(),
            },
            http: HttpConfig {
                default_timeout_seconds: 30,
                user_agent: "schedcore-poller/0.1".to_string(),
                allow_private_targets: false,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unknown_timezone() {
        let mut settings = Settings::default();
        settings.scheduler.timezone = "Mars/Olympus_Mons".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_timeout() {
        let mut settings = Settings::default();
        settings.http.default_timeout_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_dir_falls_back_to_defaults() {
        let settings = Settings::load_from_path("does-not-exist").unwrap();
        assert_eq!(settings.scheduler.timezone, "UTC");
        assert!(!settings.http.allow_private_targets);
    }
}
