//! Configuration: server settings from environment variables, monitor
//! definitions from a YAML file.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::db::{ResourceRetention, RetentionPolicy};
use crate::status::AppDefinition;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Configuration error types. An unparsable monitor config is the one
/// hard-fail at boot.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the SQLite database file (default: "hostwatch.db")
    pub db_path: String,
    /// Path to the monitor YAML config (default: "monitorconfig.yaml")
    pub monitor_config_path: String,
    /// Optional chat webhook URL for alerts
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "hostwatch.db".to_string(),
            monitor_config_path: "monitorconfig.yaml".to_string(),
            webhook_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HOSTWATCH_DB_PATH`: database file path
    /// - `HOSTWATCH_CONFIG_PATH`: monitor config path
    /// - `HOSTWATCH_WEBHOOK_URL`: alert webhook URL
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(db_path) = env::var("HOSTWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Ok(path) = env::var("HOSTWATCH_CONFIG_PATH") {
            cfg.monitor_config_path = path;
        }
        if let Ok(url) = env::var("HOSTWATCH_WEBHOOK_URL") {
            cfg.webhook_url = Some(url);
        }

        cfg
    }
}

/// Monitor configuration: app definitions, enabled resource monitors,
/// sampling intervals and retention ages. Read-only once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    app_monitor_interval_s: u64,
    resource_monitor_interval_s: u64,
    history_duration_m: u64,
    db_purge_days: Option<u64>,
    apps: Option<Vec<AppDefinition>>,
    resources: Option<ResourcesConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResourcesConfig {
    items: Vec<ResourceItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResourceItem {
    id: String,
    db_purge_days: Option<u64>,
}

impl MonitorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&yaml)?;
        tracing::info!(
            "Loaded {} app monitors and {} resource monitors",
            config.app_definitions().len(),
            config.enabled_resource_ids().len()
        );
        Ok(config)
    }

    pub fn app_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.app_monitor_interval_s)
    }

    pub fn resource_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.resource_monitor_interval_s)
    }

    pub fn history_duration(&self) -> Duration {
        Duration::from_secs(self.history_duration_m * 60)
    }

    pub fn app_definitions(&self) -> &[AppDefinition] {
        self.apps.as_deref().unwrap_or(&[])
    }

    pub fn enabled_resource_ids(&self) -> Vec<String> {
        self.resources
            .as_ref()
            .map(|r| r.items.iter().map(|item| item.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Purge policy in milliseconds: the optional global age plus the
    /// per-resource ages configured on individual items.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age_ms: self.db_purge_days.map(|days| days as i64 * MS_PER_DAY),
            per_resource: self
                .resources
                .as_ref()
                .map(|r| {
                    r.items
                        .iter()
                        .filter_map(|item| {
                            item.db_purge_days.map(|days| ResourceRetention {
                                id_prefix: item.id.clone(),
                                max_age_ms: days as i64 * MS_PER_DAY,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
app_monitor_interval_s: 30
resource_monitor_interval_s: 60
history_duration_m: 120
db_purge_days: 30
apps:
  - name: web
    description: Main web app
    command: nginx
    url: example.com
    https: example.com
resources:
  items:
    - id: RCpu
    - id: RRam
    - id: RVolume
      db_purge_days: 7
";

    #[test]
    fn test_default_server_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.db_path, "hostwatch.db");
        assert_eq!(cfg.monitor_config_path, "monitorconfig.yaml");
        assert!(cfg.webhook_url.is_none());
    }

    #[test]
    fn test_parse_monitor_config() {
        let config: MonitorConfig = serde_yaml::from_str(SAMPLE).unwrap();

        assert_eq!(config.app_monitor_interval(), Duration::from_secs(30));
        assert_eq!(config.resource_monitor_interval(), Duration::from_secs(60));
        assert_eq!(config.history_duration(), Duration::from_secs(7200));

        let apps = config.app_definitions();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "web");
        assert_eq!(apps[0].http_url().unwrap(), "http://example.com");
        assert_eq!(apps[0].https_url().unwrap(), "https://example.com");

        assert_eq!(config.enabled_resource_ids(), vec!["RCpu", "RRam", "RVolume"]);
    }

    #[test]
    fn test_retention_policy_conversion() {
        let config: MonitorConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let policy = config.retention_policy();

        assert_eq!(policy.max_age_ms, Some(30 * MS_PER_DAY));
        assert_eq!(policy.per_resource.len(), 1);
        assert_eq!(policy.per_resource[0].id_prefix, "RVolume");
        assert_eq!(policy.per_resource[0].max_age_ms, 7 * MS_PER_DAY);
    }

    #[test]
    fn test_minimal_config_has_empty_policy() {
        let yaml = "\
app_monitor_interval_s: 10
resource_monitor_interval_s: 10
history_duration_m: 60
";
        let config: MonitorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.app_definitions().is_empty());
        assert!(config.enabled_resource_ids().is_empty());
        assert!(config.retention_policy().is_empty());
    }

    #[test]
    fn test_garbage_config_fails() {
        assert!(serde_yaml::from_str::<MonitorConfig>("not: valid").is_err());
    }
}
