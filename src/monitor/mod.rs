//! Monitor capabilities: app liveness/reachability probes and host
//! resource probes.

mod app;
mod resources;

pub use app::*;
pub use resources::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::status::Status;

/// Default wall-clock bound for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Monitor error types.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("command failed: {0}")]
    Command(String),
    #[error("could not parse probe output: {0}")]
    Parse(String),
}

/// A single monitoring capability. One evaluation returns zero or more
/// statuses (a disk monitor reports one per mount, a sensor may report
/// temperature and humidity).
#[async_trait]
pub trait Monitor: Send + Sync {
    fn id(&self) -> String;
    fn name(&self) -> String;

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError>;
}
