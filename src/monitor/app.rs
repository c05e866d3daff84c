//! Application monitor: process liveness plus optional HTTP/HTTPS
//! reachability.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use super::{Monitor, MonitorError};
use crate::status::{AppDefinition, AppStatus, Status};

/// Probes one configured application. Liveness and the two reachability
/// checks run concurrently; each degrades to a negative result on error or
/// timeout instead of failing the evaluation.
pub struct AppMonitor {
    app: AppDefinition,
    timeout: Duration,
}

impl AppMonitor {
    pub fn new(app: AppDefinition, timeout: Duration) -> Self {
        Self { app, timeout }
    }

    async fn is_process_running(&self) -> bool {
        let Some(command) = &self.app.command else {
            // No process to check; liveness is reachability-only.
            return true;
        };

        tracing::debug!("Running pgrep for {}", command);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new("pgrep").arg("-f").arg(command).output(),
        )
        .await;

        match output {
            Ok(Ok(out)) => out.status.success() && !out.stdout.is_empty(),
            Ok(Err(e)) => {
                tracing::warn!("pgrep failed for {}: {}", command, e);
                false
            }
            Err(_) => {
                tracing::warn!("pgrep timed out for {}", command);
                false
            }
        }
    }

    async fn is_url_reachable(&self, url: Option<String>) -> Option<bool> {
        let url = url?;

        tracing::debug!("Checking reachability for {}", url);

        let client = match reqwest::Client::builder().timeout(self.timeout).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client: {}", e);
                return Some(false);
            }
        };

        let mut request = client.get(&url);
        if let (Some(user), Some(password)) = (
            &self.app.basic_auth_username,
            &self.app.basic_auth_password,
        ) {
            request = request.basic_auth(user, Some(password));
        }

        match request.send().await {
            Ok(response) => Some(response.status().is_success()),
            Err(e) => {
                tracing::debug!("Reachability check failed for {}: {}", url, e);
                Some(false)
            }
        }
    }
}

#[async_trait]
impl Monitor for AppMonitor {
    fn id(&self) -> String {
        format!("A{}", self.app.name)
    }

    fn name(&self) -> String {
        self.app.name.clone()
    }

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError> {
        let (is_running, is_http_reachable, is_https_reachable) = tokio::join!(
            self.is_process_running(),
            self.is_url_reachable(self.app.http_url()),
            self.is_url_reachable(self.app.https_url()),
        );

        Ok(vec![Status::App(AppStatus {
            app: self.app.clone(),
            is_running,
            is_http_reachable,
            is_https_reachable,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_url_degrades_to_false() {
        let mut app = AppDefinition::new("web", "test app");
        app.http_host = Some("256.256.256.256".to_string());

        let monitor = AppMonitor::new(app, Duration::from_millis(200));
        let statuses = monitor.evaluate().await.unwrap();

        let Status::App(status) = &statuses[0] else {
            panic!("expected app status");
        };
        assert_eq!(status.is_http_reachable, Some(false));
        assert_eq!(status.is_https_reachable, None);
    }

    #[tokio::test]
    async fn test_no_urls_yield_unknown_reachability() {
        let monitor = AppMonitor::new(
            AppDefinition::new("worker", "no urls"),
            Duration::from_millis(200),
        );
        let statuses = monitor.evaluate().await.unwrap();

        let Status::App(status) = &statuses[0] else {
            panic!("expected app status");
        };
        assert_eq!(status.is_http_reachable, None);
        assert_eq!(status.is_https_reachable, None);
    }

    #[tokio::test]
    async fn test_missing_process_reports_not_running() {
        let mut app = AppDefinition::new("ghost", "not a real process");
        app.command = Some("hostwatch-test-process-that-does-not-exist".to_string());

        let monitor = AppMonitor::new(app, Duration::from_secs(2));
        let statuses = monitor.evaluate().await.unwrap();

        let Status::App(status) = &statuses[0] else {
            panic!("expected app status");
        };
        assert!(!status.is_running);
        assert!(status.is_error());
    }
}
