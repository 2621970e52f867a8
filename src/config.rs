//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - ruleflow.toml (default configuration)
//! - ruleflow.local.toml (git-ignored local overrides)
//! - Environment variables (RULEFLOW_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # ruleflow.toml
//! environment = "prod"
//!
//! [storage]
//! backend = "file"
//! rules_config_path = "/etc/ruleflow/rules.json"
//! conditions_config_path = "/etc/ruleflow/conditions.json"
//! data_dir = "/var/lib/ruleflow"
//!
//! [registry]
//! monitor_interval_secs = 30
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RULEFLOW_STORAGE__RULES_CONFIG_PATH=/custom/rules.json
//! RULEFLOW_REGISTRY__MONITOR_INTERVAL_SECS=10
//! ```
//!
//! The configuration is validated once at startup and treated as
//! immutable afterwards.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors found at startup validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Loading/merging failed
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// A field combination is invalid
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Dev,
    /// Pre-production
    Staging,
    /// Production
    Prod,
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Rule-set JSON files on disk
    #[default]
    File,
    /// In-process state (tests, embedding)
    Memory,
}

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Registry / hot-reload settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Evaluation and batch settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// HTTP surface settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use
    #[serde(default)]
    pub backend: BackendKind,

    /// Rule-set JSON file (file backend)
    #[serde(default = "default_rules_path")]
    pub rules_config_path: PathBuf,

    /// Conditions JSON file (file backend, optional)
    #[serde(default)]
    pub conditions_config_path: Option<PathBuf>,

    /// Directory for execution logs, versions and A/B state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Background monitor poll interval (0 disables the monitor)
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// Age after which the registry reports itself stale
    #[serde(default = "default_staleness")]
    pub staleness_threshold_secs: u64,

    /// Per-subscriber change-event buffer
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

/// Evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Execution-log queue capacity; overflow drops records
    #[serde(default = "default_log_queue")]
    pub log_queue_capacity: usize,

    /// Default batch worker count (0 = CPU count)
    #[serde(default)]
    pub default_max_workers: usize,
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address for the server binary
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Request body limit in bytes
    #[serde(default = "default_body_limit")]
    pub request_body_limit: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("./rules.json")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_monitor_interval() -> u64 {
    30
}
fn default_staleness() -> u64 {
    300
}
fn default_subscriber_buffer() -> usize {
    256
}
fn default_log_queue() -> usize {
    1024
}
fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_body_limit() -> usize {
    1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: BackendKind::File,
            rules_config_path: default_rules_path(),
            conditions_config_path: None,
            data_dir: default_data_dir(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            monitor_interval_secs: default_monitor_interval(),
            staleness_threshold_secs: default_staleness(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            log_queue_capacity: default_log_queue(),
            default_max_workers: 0,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            bind_addr: default_bind_addr(),
            request_body_limit: default_body_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. ruleflow.toml (base configuration)
    /// 2. ruleflow.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (RULEFLOW_* prefix)
    pub fn load() -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Toml::file("ruleflow.toml"))
            .merge(Toml::file("ruleflow.local.toml"))
            .merge(Env::prefixed("RULEFLOW_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RULEFLOW_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field combinations once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == BackendKind::File
            && self.storage.rules_config_path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "storage.rules_config_path must be set for the file backend".to_string(),
            ));
        }
        if self.execution.log_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "execution.log_queue_capacity must be at least 1".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.format must be 'text' or 'json', got '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.storage.backend, BackendKind::File);
        assert_eq!(config.registry.monitor_interval_secs, 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[registry]"));

        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.storage.backend, BackendKind::File);
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_log_queue_rejected() {
        let mut config = Config::default();
        config.execution.log_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        let config: Config = toml::from_str("environment = \"prod\"").unwrap();
        assert_eq!(config.environment, Environment::Prod);
    }
}
