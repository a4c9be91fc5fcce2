use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scheduling group configuration (`groups.<name>` in the root config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub minimum_polling_interval: f64,
    pub start_offset: f64,
    pub poll_scheduler_class_name: String,
    pub poll_scheduler_module: String,
    pub parallel_subgroups: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            minimum_polling_interval: 1.0,
            start_offset: 0.0,
            poll_scheduler_class_name: "StaticCyclicPollScheduler".to_string(),
            poll_scheduler_module: "platform_driver.poll_scheduler".to_string(),
            parallel_subgroups: false,
        }
    }
}

/// Publish-flag defaults that differ between `config_version` 1 and 2.
///
/// `config_version` 1 shipped with `publish_depth_first_all` on and
/// `publish_depth_first_multi` off by default; version 2 flipped the
/// default the other way. A field explicitly present in the loaded
/// document always overrides whichever default applies here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PublishDefaults {
    pub publish_all_depth: bool,
    pub publish_multi_depth: bool,
}

impl PublishDefaults {
    pub fn for_version(config_version: u32) -> Self {
        if config_version <= 1 {
            Self {
                publish_all_depth: true,
                publish_multi_depth: false,
            }
        } else {
            Self {
                publish_all_depth: false,
                publish_multi_depth: true,
            }
        }
    }
}

/// Root driver configuration, validated against the recognized-options
/// table before the driver starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformDriverConfig {
    pub config_version: u32,
    pub allow_duplicate_remotes: bool,
    pub allow_no_lock_write: bool,
    pub allow_reschedule: bool,
    pub breadth_first_base: String,
    pub depth_first_base: String,
    pub default_polling_interval: f64,
    pub groups: HashMap<String, GroupConfig>,
    pub group_offset_interval: f64,
    pub max_concurrent_publishes: usize,
    pub max_open_sockets: Option<usize>,
    pub minimum_polling_interval: f64,
    pub poll_scheduler_class_name: String,
    pub poll_scheduler_module: String,
    pub publish_single_depth: bool,
    pub publish_single_breadth: bool,
    pub publish_all_breadth: bool,
    pub publish_multi_breadth: bool,
    /// `None` means "use the `config_version`-gated default" (§11).
    pub publish_all_depth: Option<bool>,
    pub publish_multi_depth: Option<bool>,
    pub remote_heartbeat_interval: f64,
    pub reservation_preempt_grace_time: f64,
    pub reservation_publish_interval: f64,
    pub reservation_required_for_write: bool,
    pub scalability_test: bool,
    pub scalability_test_iterations: u32,
    pub timezone: String,
}

impl Default for PlatformDriverConfig {
    fn default() -> Self {
        Self {
            config_version: 2,
            allow_duplicate_remotes: false,
            allow_no_lock_write: false,
            allow_reschedule: true,
            breadth_first_base: "points".to_string(),
            depth_first_base: "devices".to_string(),
            default_polling_interval: 60.0,
            groups: HashMap::new(),
            group_offset_interval: 0.0,
            max_concurrent_publishes: 10_000,
            max_open_sockets: None,
            minimum_polling_interval: 0.02,
            poll_scheduler_class_name: "StaticCyclicPollScheduler".to_string(),
            poll_scheduler_module: "platform_driver.poll_scheduler".to_string(),
            publish_single_depth: false,
            publish_single_breadth: false,
            publish_all_breadth: false,
            publish_multi_breadth: false,
            publish_all_depth: None,
            publish_multi_depth: None,
            remote_heartbeat_interval: 60.0,
            reservation_preempt_grace_time: 60.0,
            reservation_publish_interval: 60.0,
            reservation_required_for_write: false,
            scalability_test: false,
            scalability_test_iterations: 3,
            timezone: "UTC".to_string(),
        }
    }
}

impl PlatformDriverConfig {
    /// Resolved `publish_all_depth`, falling back to the `config_version`
    /// default when the field was not set explicitly.
    pub fn effective_publish_all_depth(&self) -> bool {
        self.publish_all_depth
            .unwrap_or_else(|| PublishDefaults::for_version(self.config_version).publish_all_depth)
    }

    /// Resolved `publish_multi_depth`, same rule as above.
    pub fn effective_publish_multi_depth(&self) -> bool {
        self.publish_multi_depth.unwrap_or_else(|| {
            PublishDefaults::for_version(self.config_version).publish_multi_depth
        })
    }

    /// Synthesize `groups["default"]` from top-level fields when the
    /// loaded document doesn't declare one. Idempotent: a no-op if
    /// `"default"` is already present.
    ///
    /// The corrected field-name intent (REDESIGN FLAG, see DESIGN.md):
    /// seeded from the canonical top-level fields, with
    /// `parallel_subgroups = true` for the synthesized group specifically.
    pub fn ensure_default_group(&mut self) {
        self.groups.entry("default".to_string()).or_insert_with(|| GroupConfig {
            minimum_polling_interval: self.minimum_polling_interval,
            start_offset: self.group_offset_interval,
            poll_scheduler_class_name: self.poll_scheduler_class_name.clone(),
            poll_scheduler_module: self.poll_scheduler_module.clone(),
            parallel_subgroups: true,
        });
    }
}

/// SQLite `ConfigStore` connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "platform-driver.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Structured logging settings (§10.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub retention_days: u32,
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            retention_days: 30,
            log_dir: None,
        }
    }
}

/// Heartbeat/publish-retry throttle per remote (§10.6), backed by `governor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 20,
        }
    }
}

/// Transport-error retry/backoff ceiling per remote (§10.6), backed by
/// `backoff::ExponentialBackoff`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Per-remote circuit breaker thresholds (§10.6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout_secs: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 60.0,
        }
    }
}

/// Root application configuration: the driver configuration plus the
/// ambient stack (database, logging, rate limiting, retry) that the
/// driver itself has no opinion about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub driver: PlatformDriverConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_group_synthesized_with_corrected_intent() {
        let mut config = PlatformDriverConfig {
            minimum_polling_interval: 5.0,
            group_offset_interval: 2.5,
            ..PlatformDriverConfig::default()
        };
        config.ensure_default_group();
        let default_group = &config.groups["default"];
        assert_eq!(default_group.minimum_polling_interval, 5.0);
        assert_eq!(default_group.start_offset, 2.5);
        assert!(default_group.parallel_subgroups);
    }

    #[test]
    fn ensure_default_group_does_not_clobber_explicit_group() {
        let mut config = PlatformDriverConfig::default();
        config.groups.insert(
            "default".to_string(),
            GroupConfig {
                parallel_subgroups: false,
                ..GroupConfig::default()
            },
        );
        config.ensure_default_group();
        assert!(!config.groups["default"].parallel_subgroups);
    }

    #[test]
    fn publish_defaults_flip_between_config_versions() {
        let mut v1 = PlatformDriverConfig {
            config_version: 1,
            ..PlatformDriverConfig::default()
        };
        assert!(v1.effective_publish_all_depth());
        assert!(!v1.effective_publish_multi_depth());

        v1.publish_all_depth = Some(false);
        assert!(!v1.effective_publish_all_depth());
    }
}
