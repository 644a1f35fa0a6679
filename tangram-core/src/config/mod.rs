//! Configuration management for Tangram
//!
//! Environment-based configuration with defaults, TOML file loading, and
//! validation. Environment variables follow the pattern
//! `TANGRAM_<SECTION>_<KEY>`, e.g. `TANGRAM_SYNC_MAX_TASKS=16`.

use crate::core_store::object_store::StoreConfig;
use crate::core_sync::synchronizer::SyncConfig;
use crate::driver::DriverConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry configuration
    pub store: StoreConfig,

    /// Anti-entropy configuration
    pub sync: SyncConfig,

    /// Tick-loop configuration
    pub driver: DriverConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(level) = env::var("TANGRAM_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("TANGRAM_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        if let Ok(max_tasks) = env::var("TANGRAM_SYNC_MAX_TASKS") {
            config.sync.max_tasks = max_tasks
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid max tasks: {}", e)))?;
        }
        if let Ok(max_requests) = env::var("TANGRAM_SYNC_MAX_REQUESTS_PER_TASK") {
            config.sync.max_requests_per_task = max_requests.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid max requests per task: {}", e))
            })?;
        }
        if let Ok(ttl) = env::var("TANGRAM_SYNC_REQUEST_TTL") {
            config.sync.request_ttl = ttl
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid request ttl: {}", e)))?;
        }
        if let Ok(timeout_ms) = env::var("TANGRAM_SYNC_TASK_TIMEOUT_MS") {
            let millis: u64 = timeout_ms
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid task timeout: {}", e)))?;
            config.sync.task_timeout = Duration::from_millis(millis);
        }

        if let Ok(horizon_ms) = env::var("TANGRAM_STORE_GC_HORIZON_MS") {
            let millis: u64 = horizon_ms
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid GC horizon: {}", e)))?;
            config.store.gc_horizon = Duration::from_millis(millis);
        }
        if let Ok(threshold) = env::var("TANGRAM_STORE_GC_THRESHOLD") {
            config.store.gc_threshold = threshold
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid GC threshold: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.max_tasks == 0 {
            return Err(ConfigError::ValidationFailed(
                "sync.max_tasks must be at least 1".to_string(),
            ));
        }
        if self.sync.max_requests_per_task == 0 {
            return Err(ConfigError::ValidationFailed(
                "sync.max_requests_per_task must be at least 1".to_string(),
            ));
        }
        if self.sync.catalog_chunk_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "sync.catalog_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.sync.task_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync.task_timeout must be positive".to_string(),
            ));
        }
        if self.driver.flush_interval.is_zero() || self.driver.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "driver intervals must be positive".to_string(),
            ));
        }
        if crate::logging::LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "unknown log level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.max_tasks, 32);
        assert_eq!(config.sync.request_ttl, 2);
        assert_eq!(config.store.gc_threshold, 100_000);
        assert_eq!(config.store.gc_horizon, Duration::from_millis(600_000));
    }

    #[test]
    fn test_validate_rejects_zero_tasks() {
        let mut config = Config::default();
        config.sync.max_tasks = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "shouting".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let encoded = toml::to_string_pretty(&config).unwrap();
        let decoded: Config = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.sync.max_tasks, config.sync.max_tasks);
        assert_eq!(decoded.store.gc_horizon, config.store.gc_horizon);
        assert_eq!(decoded.driver.flush_interval, config.driver.flush_interval);
    }

    #[test]
    fn test_from_toml_overrides() {
        let toml_text = r#"
            [store]
            gc_horizon = "5m"
            gc_throttle = "1s"
            gc_threshold = 1000

            [sync]
            max_tasks = 8
            max_requests_per_task = 16
            request_ttl = 3
            task_timeout = "10s"
            catalog_chunk_size = 512

            [driver]
            flush_interval = "5ms"
            poll_interval = "100ms"

            [logging]
            level = "debug"
            json_format = false
            with_target = true
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.max_tasks, 8);
        assert_eq!(config.store.gc_horizon, Duration::from_secs(300));
        assert_eq!(config.sync.task_timeout, Duration::from_secs(10));
    }
}
