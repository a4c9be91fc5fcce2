use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::AppConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid minimum_polling_interval: {0}. Must be positive")]
    InvalidMinimumPollingInterval(f64),

    #[error("Invalid group '{0}': minimum_polling_interval must be positive")]
    InvalidGroupInterval(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid max_concurrent_publishes: {0}. Must be at least 1")]
    InvalidMaxConcurrentPublishes(usize),

    #[error("Figment extraction failed: {0}")]
    Figment(#[from] figment::Error),
}

const DEFAULT_CONFIG_PATH: &str = "config/platform-driver.yaml";
const LOCAL_CONFIG_PATH: &str = "config/platform-driver.local.yaml";
const ENV_PREFIX: &str = "PLATFORM_DRIVER_";

/// Configuration loader with hierarchical merging (§10.2).
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`AppConfig::default()`)
    /// 2. `config/platform-driver.yaml` (primary config)
    /// 3. `config/platform-driver.local.yaml` (optional local override)
    /// 4. Environment variables (`PLATFORM_DRIVER_*`, `__` nesting separator)
    pub fn load() -> Result<AppConfig, ConfigError> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(DEFAULT_CONFIG_PATH))
            .merge(Yaml::file(LOCAL_CONFIG_PATH))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing the default
    /// project-local paths. Used by `--config`.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading. Enforces the recognized-options
    /// table's ranges rather than panicking on a bad deployment config.
    pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
        if config.driver.minimum_polling_interval <= 0.0 {
            return Err(ConfigError::InvalidMinimumPollingInterval(
                config.driver.minimum_polling_interval,
            ));
        }

        for (name, group) in &config.driver.groups {
            if group.minimum_polling_interval <= 0.0 {
                return Err(ConfigError::InvalidGroupInterval(name.clone()));
            }
        }

        if config.driver.timezone.trim().is_empty() {
            return Err(ConfigError::InvalidTimezone(config.driver.timezone.clone()));
        }

        if config.driver.max_concurrent_publishes == 0 {
            return Err(ConfigError::InvalidMaxConcurrentPublishes(
                config.driver.max_concurrent_publishes,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.rate_limit.requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidRateLimit(
                config.rate_limit.requests_per_second,
            ));
        }

        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        Ok(())
    }

    /// Checks whether applying a live `config` `UPDATE` event would touch a
    /// field that requires a process restart (§4.F). Called by the
    /// coordinator before accepting a config-store change in place.
    pub fn requires_restart(current: &AppConfig, incoming: &AppConfig) -> bool {
        current.driver.max_open_sockets != incoming.driver.max_open_sockets
            || current.driver.max_concurrent_publishes != incoming.driver.max_concurrent_publishes
    }
}
