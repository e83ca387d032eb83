//! Monitor configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Configuration for the monitor daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Where per-target flags are persisted
    pub settings_path: PathBuf,

    /// Transport connect timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Prompt on the terminal for credentials and insecure retries
    pub interactive: bool,

    /// Heartbeat scheduling
    pub heartbeat: HeartbeatConfig,

    /// Targets registered at startup
    pub targets: Vec<TargetConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            settings_path: super::default_settings_path(),
            connect_timeout: Duration::from_secs(10),
            interactive: false,
            heartbeat: HeartbeatConfig::default(),
            targets: vec![],
        }
    }
}

impl MonitorConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heartbeat.validate()?;
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Heartbeat scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Delay before each probe dispatched by the immediate strategy
    #[serde(rename = "immediate_delay_ms", with = "duration_millis")]
    pub immediate_delay: Duration,

    /// Delay before each probe of a lazy sweep
    #[serde(rename = "poll_delay_ms", with = "duration_millis")]
    pub poll_delay: Duration,

    /// Upper bound on concurrently running probes per batch
    pub max_workers: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            immediate_delay: Duration::from_millis(100),
            poll_delay: Duration::from_millis(5000),
            max_workers: 10,
        }
    }
}

impl HeartbeatConfig {
    /// Reject a zero-sized worker pool
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A target registered from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Connection string (`host:port` or a full service URL)
    pub connection: String,

    /// Name shown in logs and prompts
    #[serde(default)]
    pub display_name: Option<String>,

    /// Environment/credential provider identity
    #[serde(default)]
    pub env_provider: Option<String>,

    /// Username used to build the suggested name
    #[serde(default)]
    pub username: Option<String>,

    /// Pre-approve retrying without the transport trust check
    #[serde(default)]
    pub allow_insecure: bool,
}

impl TargetConfig {
    /// Target with only a connection string
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            display_name: None,
            env_provider: None,
            username: None,
            allow_insecure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.immediate_delay, Duration::from_millis(100));
        assert_eq!(config.poll_delay, Duration::from_secs(5));
        assert_eq!(config.max_workers, 10);
        assert!(config.immediate_delay < config.poll_delay);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            connect_timeout = 3
            interactive = true

            [heartbeat]
            immediate_delay_ms = 50
            poll_delay_ms = 2000
            max_workers = 4

            [[targets]]
            connection = "db-1:9010"
            display_name = "orders db"
            allow_insecure = true

            [[targets]]
            connection = "service:jmx:jmxmp://app:5555"
        "#;

        let config: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(config.interactive);
        assert_eq!(config.heartbeat.immediate_delay, Duration::from_millis(50));
        assert_eq!(config.heartbeat.poll_delay, Duration::from_secs(2));
        assert_eq!(config.heartbeat.max_workers, 4);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].display_name.as_deref(), Some("orders db"));
        assert!(config.targets[0].allow_insecure);
        assert!(!config.targets[1].allow_insecure);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = MonitorConfig::default();
        config.heartbeat.max_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
