//! Interval scheduler driving named background jobs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Runs one independent timer loop per named job. Job semantics are
/// injected; a failing action is logged and the loop continues to the next
/// tick, isolated from other jobs.
pub struct Scheduler {
    stop_chans: Arc<RwLock<HashMap<String, broadcast::Sender<()>>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            stop_chans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a job: sleep `interval`, run `action`, repeat until stopped.
    /// Adding a name twice is a no-op while the first loop is running.
    pub async fn add_job<F, Fut>(&self, name: &str, interval: Duration, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let mut stop_chans = self.stop_chans.write().await;
        if stop_chans.contains_key(name) {
            return;
        }

        // tokio panics on a zero-period interval; a zero from config falls
        // back to one second.
        let interval = if interval.is_zero() {
            tracing::warn!("Job {} has a zero interval, clamping to 1s", name);
            Duration::from_secs(1)
        } else {
            interval
        };

        // Subscribe before spawning so a stop sent before the loop is first
        // polled is still delivered.
        let (stop_tx, stop_rx) = broadcast::channel(1);
        stop_chans.insert(name.to_string(), stop_tx);
        drop(stop_chans);

        tracing::info!("Scheduler: adding job {} every {:?}", name, interval);

        let name = name.to_string();
        let stop_chans = self.stop_chans.clone();
        tokio::spawn(async move {
            run_job_loop(&name, interval, action, stop_rx).await;

            let mut chans = stop_chans.write().await;
            chans.remove(&name);
        });
    }

    /// Stop one job. Idempotent; an in-flight tick finishes before the loop
    /// exits.
    pub async fn stop(&self, name: &str) {
        let mut stop_chans = self.stop_chans.write().await;
        if let Some(stop_tx) = stop_chans.remove(name) {
            let _ = stop_tx.send(());
            tracing::info!("Scheduler: stopped job {}", name);
        }
    }

    /// Stop every job. Idempotent.
    pub async fn cancel_all(&self) {
        let mut stop_chans = self.stop_chans.write().await;
        for (name, stop_tx) in stop_chans.drain() {
            let _ = stop_tx.send(());
            tracing::info!("Scheduler: stopped job {}", name);
        }
    }

    pub async fn job_count(&self) -> usize {
        self.stop_chans.read().await.len()
    }
}

async fn run_job_loop<F, Fut>(
    name: &str,
    interval: Duration,
    action: F,
    mut stop_rx: broadcast::Receiver<()>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    // First tick fires after one full interval, not immediately.
    let start = tokio::time::Instant::now() + interval;
    let mut timer = tokio::time::interval_at(start, interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = timer.tick() => {
                // The action is awaited here, so a stop signal arriving
                // mid-tick is observed only after the tick completes.
                if let Err(e) = action().await {
                    tracing::error!("Job {} failed: {}", name, e);
                }
            }
        }
    }

    tracing::debug!("Job {} loop exited", name);
}
