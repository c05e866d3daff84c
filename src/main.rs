//! HostWatch - local application and host resource monitor.
//!
//! Periodically samples configured apps and host resources, keeps a bounded
//! in-memory history window, persists every sample to SQLite and raises
//! change-based alerts through a webhook.

mod config;
mod db;
mod evaluator;
mod monitor;
mod report;
mod repository;
mod scheduler;
mod status;

use config::{MonitorConfig, ServerConfig};
use db::Store;
use evaluator::Evaluator;
use monitor::{resource_monitors, AppMonitor, Monitor, DEFAULT_PROBE_TIMEOUT};
use report::{AlertReporter, LogNotifier, Notifier, WebhookNotifier};
use repository::StatusRepository;
use scheduler::Scheduler;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("hostwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting HostWatch...");
    tracing::info!("Using database at {}", cfg.db_path);

    let monitor_cfg = MonitorConfig::load(&cfg.monitor_config_path)?;

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("Database initialized successfully");

    // Rebuild the in-memory window from persisted measurements
    let repository = Arc::new(StatusRepository::with_window(
        monitor_cfg.history_duration(),
        monitor_cfg.app_monitor_interval(),
        store.clone(),
    ));
    repository.restore();

    // Build the monitor set: enabled resource monitors plus one app monitor
    // per configured application
    let mut monitors = resource_monitors(&monitor_cfg.enabled_resource_ids(), DEFAULT_PROBE_TIMEOUT);
    for app in monitor_cfg.app_definitions() {
        monitors.push(Arc::new(AppMonitor::new(app.clone(), DEFAULT_PROBE_TIMEOUT)) as Arc<dyn Monitor>);
    }
    let evaluator = Arc::new(Evaluator::new(monitors));

    let notifier: Arc<dyn Notifier> = match &cfg.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => {
            tracing::warn!("No webhook configured, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let reporter = Arc::new(AlertReporter::new(
        repository.clone(),
        store.clone(),
        notifier,
    ));

    // Register scheduler jobs
    let scheduler = Scheduler::new();

    {
        let evaluator = evaluator.clone();
        let repository = repository.clone();
        let reporter = reporter.clone();
        scheduler
            .add_job("evaluate", monitor_cfg.app_monitor_interval(), move || {
                let evaluator = evaluator.clone();
                let repository = repository.clone();
                let reporter = reporter.clone();
                async move {
                    let evaluation = evaluator.run().await;
                    repository.add(evaluation)?;
                    reporter.report().await;
                    Ok(())
                }
            })
            .await;
    }

    let policy = monitor_cfg.retention_policy();
    if !policy.is_empty() {
        let store = store.clone();
        scheduler
            .add_job("purge", CLEANUP_INTERVAL, move || {
                let store = store.clone();
                let policy = policy.clone();
                async move {
                    store.apply_retention(&policy, Utc::now().timestamp_millis())?;
                    store.vacuum()?;
                    tracing::info!("Database size: {} bytes", store.db_size_bytes()?);
                    Ok(())
                }
            })
            .await;
    }

    tracing::info!("Scheduler running with {} jobs", scheduler.job_count().await);

    // Run until interrupted, then let in-flight ticks finish
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.cancel_all().await;

    Ok(())
}
