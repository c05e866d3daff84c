//! Concurrent fan-out over the configured monitor set.

use std::sync::Arc;
use std::time::Duration;

use crate::monitor::Monitor;
use crate::status::{Evaluation, Status};

/// Runs every monitor concurrently and collects the results into one
/// timestamped evaluation.
pub struct Evaluator {
    monitors: Vec<Arc<dyn Monitor>>,
}

impl Evaluator {
    pub fn new(monitors: Vec<Arc<dyn Monitor>>) -> Self {
        Self { monitors }
    }

    /// One tick: launch every monitor, await them all (a slow or failing
    /// probe never cancels the others), flatten into one evaluation.
    /// A monitor returning an error contributes no statuses.
    pub async fn run(&self) -> Evaluation {
        tracing::debug!("Evaluating {} monitors", self.monitors.len());

        let handles: Vec<_> = self
            .monitors
            .iter()
            .map(|monitor| {
                let monitor = monitor.clone();
                tokio::spawn(async move {
                    // Jitter to avoid a thundering herd of probes on each tick
                    let jitter = rand::random::<u64>() % 100;
                    tokio::time::sleep(Duration::from_millis(jitter)).await;

                    (monitor.id(), monitor.evaluate().await)
                })
            })
            .collect();

        let mut apps = Vec::new();
        let mut resources = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((_, Ok(statuses))) => {
                    for status in statuses {
                        match status {
                            Status::App(app) => apps.push(app),
                            Status::Resource(resource) => resources.push(resource),
                        }
                    }
                }
                Ok((id, Err(e))) => {
                    tracing::warn!("Monitor {} failed, omitting from evaluation: {}", id, e);
                }
                Err(e) => {
                    tracing::error!("Monitor task panicked: {}", e);
                }
            }
        }

        Evaluation::new(apps, resources)
    }
}
