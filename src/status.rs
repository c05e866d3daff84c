//! Core status model: app/resource statuses and the per-tick evaluation.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Static definition of a monitored application.
///
/// Loaded once from configuration and treated as read-only afterwards.
/// URLs are configured as bare hosts and exposed with their scheme prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Pattern matched against running processes (pgrep -f).
    pub command: Option<String>,
    #[serde(rename = "url")]
    pub http_host: Option<String>,
    #[serde(rename = "https")]
    pub https_host: Option<String>,
    pub basic_auth_username: Option<String>,
    pub basic_auth_password: Option<String>,
}

impl AppDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            command: None,
            http_host: None,
            https_host: None,
            basic_auth_username: None,
            basic_auth_password: None,
        }
    }

    pub fn http_url(&self) -> Option<String> {
        self.http_host.as_ref().map(|h| format!("http://{}", h))
    }

    pub fn https_url(&self) -> Option<String> {
        self.https_host.as_ref().map(|h| format!("https://{}", h))
    }
}

/// Result of probing one application: process liveness plus optional
/// HTTP/HTTPS reachability. Reachability is `None` when no URL is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub app: AppDefinition,
    pub is_running: bool,
    pub is_http_reachable: Option<bool>,
    pub is_https_reachable: Option<bool>,
}

impl AppStatus {
    /// Stable identifier used to match persisted rows back to an app.
    pub fn id(&self) -> String {
        format!("A{}", self.app.name)
    }

    pub fn name(&self) -> &str {
        &self.app.name
    }

    pub fn is_error(&self) -> bool {
        !self.is_running
            || self.is_http_reachable == Some(false)
            || self.is_https_reachable == Some(false)
    }

    /// Field-wise equality ignoring the app definition, used by the
    /// persistence dedup rule and the alert diff.
    pub fn same_state(&self, other: &AppStatus) -> bool {
        self.is_running == other.is_running
            && self.is_http_reachable == other.is_http_reachable
            && self.is_https_reachable == other.is_https_reachable
    }
}

/// A sampled current/total pair for one host resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub id: String,
    pub name: String,
    pub description: String,
    pub current: f32,
    pub total: f32,
}

impl ResourceStatus {
    pub fn usage(&self) -> f32 {
        self.current / self.total * 100.0
    }

    pub fn free(&self) -> f32 {
        self.total - self.current
    }
}

/// One monitor's evaluation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Status {
    App(AppStatus),
    Resource(ResourceStatus),
}

impl Status {
    pub fn id(&self) -> String {
        match self {
            Status::App(app) => app.id(),
            Status::Resource(res) => res.id.clone(),
        }
    }
}

/// One fan-out cycle's aggregated result. Immutable once constructed; the
/// unit of both in-memory history and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Epoch milliseconds.
    pub time: i64,
    pub apps: Vec<AppStatus>,
    pub resources: Vec<ResourceStatus>,
}

impl Evaluation {
    pub fn new(apps: Vec<AppStatus>, resources: Vec<ResourceStatus>) -> Self {
        Self {
            time: Utc::now().timestamp_millis(),
            apps,
            resources,
        }
    }

    pub fn at(time: i64, apps: Vec<AppStatus>, resources: Vec<ResourceStatus>) -> Self {
        Self { time, apps, resources }
    }

    pub fn app_with_id(&self, id: &str) -> Option<&AppStatus> {
        self.apps.iter().find(|a| a.id() == id)
    }

    pub fn resource_with_id(&self, id: &str) -> Option<&ResourceStatus> {
        self.resources.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_status(running: bool, http: Option<bool>, https: Option<bool>) -> AppStatus {
        AppStatus {
            app: AppDefinition::new("web", "test app"),
            is_running: running,
            is_http_reachable: http,
            is_https_reachable: https,
        }
    }

    #[test]
    fn test_app_status_id_prefix() {
        assert_eq!(app_status(true, None, None).id(), "Aweb");
    }

    #[test]
    fn test_app_status_error_derivation() {
        assert!(!app_status(true, None, None).is_error());
        assert!(!app_status(true, Some(true), Some(true)).is_error());
        assert!(app_status(false, None, None).is_error());
        assert!(app_status(true, Some(false), Some(true)).is_error());
        assert!(app_status(true, Some(true), Some(false)).is_error());
    }

    #[test]
    fn test_same_state_ignores_definition() {
        let mut a = app_status(true, Some(true), None);
        let b = app_status(true, Some(true), None);
        assert!(a.same_state(&b));
        a.app.description = "changed".to_string();
        assert!(a.same_state(&b));
        a.is_running = false;
        assert!(!a.same_state(&b));
    }

    #[test]
    fn test_resource_usage_and_free() {
        let res = ResourceStatus {
            id: "RRam".to_string(),
            name: "RAM usage".to_string(),
            description: String::new(),
            current: 80.0,
            total: 100.0,
        };
        assert_eq!(res.usage(), 80.0);
        assert_eq!(res.free(), 20.0);
    }

    #[test]
    fn test_evaluation_lookup() {
        let eval = Evaluation::at(
            42,
            vec![app_status(true, None, None)],
            vec![ResourceStatus {
                id: "RCpu".to_string(),
                name: "CPU usage".to_string(),
                description: String::new(),
                current: 10.0,
                total: 100.0,
            }],
        );
        assert!(eval.app_with_id("Aweb").is_some());
        assert!(eval.app_with_id("Aother").is_none());
        assert!(eval.resource_with_id("RCpu").is_some());
    }
}
