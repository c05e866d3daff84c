//! Change-diff alert reporting.
//!
//! Compares the two most recent evaluations per app and pushes
//! human-readable transition messages through an injected notifier.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::Store;
use crate::repository::StatusRepository;
use crate::status::AppStatus;

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Outbound notification capability: fire-and-forget text messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Wall-clock bound for one webhook delivery.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts messages to a chat webhook as `{"content": text}`.
pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self::with_timeout(url, NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(url: String, timeout: Duration) -> Self {
        Self { url, timeout }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        // Bounded per-call client; a stalled webhook must not stall the
        // evaluate tick behind it.
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let response = client
            .post(&self.url)
            .json(&serde_json::json!({ "content": message }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }
        Ok(())
    }
}

/// Fallback notifier used when no webhook is configured: transitions are
/// only logged.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        tracing::info!("Notification: {}", message.replace('\n', " | "));
        Ok(())
    }
}

/// Emits one message per app state transition, once per tick after a new
/// evaluation is recorded. Unchanged states are suppressed; the first sample
/// for an app never alerts.
pub struct AlertReporter {
    repository: Arc<StatusRepository>,
    store: Store,
    notifier: Arc<dyn Notifier>,
}

impl AlertReporter {
    pub fn new(repository: Arc<StatusRepository>, store: Store, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            repository,
            store,
            notifier,
        }
    }

    pub async fn report(&self) {
        let history = self.repository.history();
        let Some(current) = history.last() else {
            return;
        };
        let previous_eval = history.len().checked_sub(2).map(|i| &history[i]);

        for status in &current.apps {
            let id = status.id();
            let previous = previous_eval
                .and_then(|eval| eval.app_with_id(&id).cloned())
                .or_else(|| self.previous_from_store(&id));

            let Some(previous) = previous else {
                continue;
            };

            if let Some(message) = diff_message(&previous, status) {
                tracing::info!("Reporting state change for {}", status.name());
                if let Err(e) = self.notifier.notify(&message).await {
                    // Best effort: log and move on, never retry inline.
                    tracing::warn!("Failed to send notification for {}: {}", status.name(), e);
                }
            }
        }
    }

    /// Previous persisted state for apps whose history fell out of the
    /// in-memory window. The newest row is the entry for the current tick,
    /// so the one before it is the previous state.
    fn previous_from_store(&self, app_id: &str) -> Option<AppStatus> {
        match self.store.app_status_history(app_id, 2) {
            Ok(rows) => rows.into_iter().nth(1).map(|(_, status)| status),
            Err(e) => {
                tracing::warn!("Failed to look up previous status for {}: {}", app_id, e);
                None
            }
        }
    }
}

/// The transition message for a `(previous, current)` pair, or `None` when
/// nothing should be reported.
fn diff_message(previous: &AppStatus, current: &AppStatus) -> Option<String> {
    if previous.same_state(current) {
        return None;
    }

    if current.is_error() {
        if previous.is_error() && partly_recovered(previous, current) {
            return Some(partial_recovery_message(previous, current));
        }
        return Some(error_message(current));
    }

    if previous.is_error() {
        return Some(format!("**Application fully recovered: {}**", current.name()));
    }

    // Changed but healthy on both sides (e.g. a probe newly configured).
    None
}

fn partly_recovered(previous: &AppStatus, current: &AppStatus) -> bool {
    (current.is_running && !previous.is_running)
        || (current.is_http_reachable == Some(true) && previous.is_http_reachable == Some(false))
        || (current.is_https_reachable == Some(true) && previous.is_https_reachable == Some(false))
}

fn error_message(status: &AppStatus) -> String {
    let mut message = format!("**Application error: {}**\n", status.name());
    if !status.is_running {
        message.push_str("Process is not running\n");
    }
    if status.is_http_reachable == Some(false) {
        message.push_str("HTTP ping failed\n");
    }
    if status.is_https_reachable == Some(false) {
        message.push_str("HTTPS ping failed\n");
    }
    message.trim_end().to_string()
}

fn partial_recovery_message(previous: &AppStatus, current: &AppStatus) -> String {
    let mut message = format!("**Application partly recovered: {}**\n", current.name());
    if current.is_running && !previous.is_running {
        message.push_str("Process recovered\n");
    } else if !current.is_running {
        message.push_str("Process is not running\n");
    }
    if current.is_http_reachable == Some(true) && previous.is_http_reachable == Some(false) {
        message.push_str("HTTP recovered\n");
    } else if current.is_http_reachable == Some(false) {
        message.push_str("HTTP ping failed\n");
    }
    if current.is_https_reachable == Some(true) && previous.is_https_reachable == Some(false) {
        message.push_str("HTTPS recovered\n");
    } else if current.is_https_reachable == Some(false) {
        message.push_str("HTTPS ping failed\n");
    }
    message.trim_end().to_string()
}
