//! Configuration management for Courier
//!
//! Configuration is layered: built-in defaults, then an optional YAML, TOML or
//! JSON file, then `COURIER__SECTION__KEY` environment variables. The result is
//! validated before it is handed to the engine or the transfer manager.
//!
//! # Examples
//!
//! ```rust
//! use courier_config::{Config, ConfigBuilder};
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("courier.yaml")
//!     .add_env_prefix("COURIER")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Workers: {}", config.engine.worker_count.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use courier_types::config::duration_millis;
use courier_types::{ChunkSize, RetryLimit, TimeoutConfig, WorkerCount};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for Courier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Task engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// Defaults applied to every transfer request
    #[serde(default)]
    pub transfer: TransferDefaults,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Task engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of parallel workers
    pub worker_count: WorkerCount,
    /// Maximum number of waiting tasks, 0 means unlimited
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: WorkerCount::new(4).unwrap_or_default(),
            queue_capacity: 0,
        }
    }
}

/// Defaults seeded into each transfer's settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDefaults {
    /// Retry limit: -1 unlimited, 0 none, n retries
    pub retry_limit: RetryLimit,
    /// Delay between attempts
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// I/O chunk size in bytes
    pub chunk_size: ChunkSize,
    /// Default minimum interval between progress notifications
    #[serde(with = "duration_millis")]
    pub notify_interval: Duration,
    /// User agent sent with every request
    pub user_agent: String,
    /// Connection and read timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            retry_limit: RetryLimit::limited(3),
            retry_delay: Duration::from_secs(1),
            chunk_size: ChunkSize::default(),
            notify_interval: Duration::from_millis(2000),
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON formatted log lines
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            colored_output: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.worker_count.get(), 4);
        assert_eq!(config.engine.queue_capacity, 0);
        assert_eq!(config.transfer.notify_interval, Duration::from_millis(2000));
        assert_eq!(config.transfer.retry_limit, RetryLimit::Limited(3));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("retry_limit: 3"));
        assert!(yaml.contains("notify_interval: 2000"));

        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_section_defaults() {
        let config: Config = serde_yaml::from_str("logging:\n  level: debug\n  json_format: true\n  colored_output: false\n").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.engine, EngineConfig::default());
    }
}
