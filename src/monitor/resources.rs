//! Host resource monitors: CPU, RAM, disks and command-driven sensors.
//!
//! All built-in monitors are stateless value instances registered in a
//! table; configuration selects which ids are enabled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::process::Command;

use super::{Monitor, MonitorError};
use crate::status::{ResourceStatus, Status};

const MIB: u64 = 1024 * 1024;
const GIB: f32 = 1024.0 * 1024.0 * 1024.0;

/// Build the enabled resource monitor set from the configured ids.
pub fn resource_monitors(enabled: &[String], timeout: Duration) -> Vec<Arc<dyn Monitor>> {
    let table: Vec<Arc<dyn Monitor>> = vec![
        Arc::new(CpuMonitor),
        Arc::new(RamMonitor),
        Arc::new(DiskMonitor),
        Arc::new(CommandMonitor::new(
            NumberCommandDefinition {
                id: "RTemp".to_string(),
                name: "CPU temperature".to_string(),
                description: "Current CPU temperature".to_string(),
                command: "cat /sys/class/thermal/thermal_zone0/temp \
                          | awk '{printf \"%.1f\", $1 / 1000}'"
                    .to_string(),
                total: 100.0,
            },
            timeout,
        )),
        Arc::new(Dht22Monitor::new(timeout)),
    ];

    table
        .into_iter()
        .filter(|monitor| enabled.iter().any(|id| *id == monitor.id()))
        .collect()
}

/// Global CPU usage in percent.
pub struct CpuMonitor;

#[async_trait]
impl Monitor for CpuMonitor {
    fn id(&self) -> String {
        "RCpu".to_string()
    }

    fn name(&self) -> String {
        "CPU usage".to_string()
    }

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError> {
        let mut sys = System::new();
        // Two refreshes with a delay in between; a single snapshot has no
        // usage delta to compute from.
        sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();

        Ok(vec![Status::Resource(ResourceStatus {
            id: self.id(),
            name: self.name(),
            description: "Current CPU usage".to_string(),
            current: sys.global_cpu_info().cpu_usage(),
            total: 100.0,
        })])
    }
}

/// Used/total RAM in MiB.
pub struct RamMonitor;

#[async_trait]
impl Monitor for RamMonitor {
    fn id(&self) -> String {
        "RRam".to_string()
    }

    fn name(&self) -> String {
        "RAM usage".to_string()
    }

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError> {
        let mut sys = System::new();
        sys.refresh_memory();

        Ok(vec![Status::Resource(ResourceStatus {
            id: self.id(),
            name: self.name(),
            description: "Current RAM usage".to_string(),
            current: (sys.used_memory() / MIB) as f32,
            total: (sys.total_memory() / MIB) as f32,
        })])
    }
}

/// Used/total space per mounted volume in GiB, one status per mount.
pub struct DiskMonitor;

#[async_trait]
impl Monitor for DiskMonitor {
    fn id(&self) -> String {
        "RVolume".to_string()
    }

    fn name(&self) -> String {
        "Disk usage".to_string()
    }

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError> {
        let disks = Disks::new_with_refreshed_list();

        let statuses = disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let mount = disk.mount_point().to_string_lossy();
                let total = disk.total_space() as f32 / GIB;
                let free = disk.available_space() as f32 / GIB;
                Status::Resource(ResourceStatus {
                    id: format!("{}_{}", self.id(), mount),
                    name: self.name(),
                    description: mount.to_string(),
                    current: total - free,
                    total,
                })
            })
            .collect();

        Ok(statuses)
    }
}

/// A shell command yielding one float value that can be graphed.
#[derive(Debug, Clone)]
pub struct NumberCommandDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub command: String,
    pub total: f32,
}

/// Executes a command and parses its stdout as a single number.
pub struct CommandMonitor {
    definition: NumberCommandDefinition,
    timeout: Duration,
}

impl CommandMonitor {
    pub fn new(definition: NumberCommandDefinition, timeout: Duration) -> Self {
        Self { definition, timeout }
    }
}

#[async_trait]
impl Monitor for CommandMonitor {
    fn id(&self) -> String {
        self.definition.id.clone()
    }

    fn name(&self) -> String {
        self.definition.name.clone()
    }

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError> {
        let stdout = run_shell_command(&self.definition.command, self.timeout).await?;
        let value: f32 = stdout
            .trim()
            .parse()
            .map_err(|_| MonitorError::Parse(stdout.trim().to_string()))?;

        Ok(vec![Status::Resource(ResourceStatus {
            id: self.definition.id.clone(),
            name: self.definition.name.clone(),
            description: self.definition.description.clone(),
            current: value,
            total: self.definition.total,
        })])
    }
}

/// DHT22 sensor read: the probe script prints temperature and humidity on
/// two lines. Either line failing to parse drops that status only.
pub struct Dht22Monitor {
    command: String,
    timeout: Duration,
}

impl Dht22Monitor {
    pub fn new(timeout: Duration) -> Self {
        Self::with_command("hostwatch-dht22-read".to_string(), timeout)
    }

    pub fn with_command(command: String, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    fn parse(&self, stdout: &str) -> Vec<Status> {
        let mut lines = stdout.lines();
        let temperature = lines.next().and_then(|l| l.trim().parse::<f32>().ok());
        let humidity = lines.next().and_then(|l| l.trim().parse::<f32>().ok());

        let mut statuses = Vec::new();
        if let Some(temperature) = temperature {
            statuses.push(Status::Resource(ResourceStatus {
                id: format!("{}Temp", self.id()),
                name: self.name(),
                description: "Temperature".to_string(),
                current: temperature,
                total: 60.0,
            }));
        }
        if let Some(humidity) = humidity {
            statuses.push(Status::Resource(ResourceStatus {
                id: format!("{}Humidity", self.id()),
                name: self.name(),
                description: "Humidity".to_string(),
                current: humidity,
                total: 100.0,
            }));
        }
        statuses
    }
}

#[async_trait]
impl Monitor for Dht22Monitor {
    fn id(&self) -> String {
        "RDht".to_string()
    }

    fn name(&self) -> String {
        "Environment sensor".to_string()
    }

    async fn evaluate(&self) -> Result<Vec<Status>, MonitorError> {
        let stdout = run_shell_command(&self.command, self.timeout).await?;
        Ok(self.parse(&stdout))
    }
}

async fn run_shell_command(command: &str, timeout: Duration) -> Result<String, MonitorError> {
    let output = tokio::time::timeout(
        timeout,
        Command::new("bash").arg("-c").arg(command).output(),
    )
    .await
    .map_err(|_| MonitorError::Timeout(timeout))?
    .map_err(|e| MonitorError::Command(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MonitorError::Command(format!(
            "exit {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DEFAULT_PROBE_TIMEOUT;

    #[tokio::test]
    async fn test_ram_monitor_reports_sane_values() {
        let statuses = RamMonitor.evaluate().await.unwrap();
        assert_eq!(statuses.len(), 1);
        let Status::Resource(status) = &statuses[0] else {
            panic!("expected resource status");
        };
        assert_eq!(status.id, "RRam");
        assert!(status.total > 0.0);
        assert!(status.current <= status.total);
    }

    #[tokio::test]
    async fn test_disk_monitor_id_prefix() {
        let statuses = DiskMonitor.evaluate().await.unwrap();
        for status in statuses {
            let Status::Resource(status) = status else {
                panic!("expected resource status");
            };
            assert!(status.id.starts_with("RVolume_"));
            assert!(status.total > 0.0);
        }
    }

    #[tokio::test]
    async fn test_command_monitor_parses_float() {
        let monitor = CommandMonitor::new(
            NumberCommandDefinition {
                id: "RTest".to_string(),
                name: "test".to_string(),
                description: "test".to_string(),
                command: "echo 42.5".to_string(),
                total: 100.0,
            },
            DEFAULT_PROBE_TIMEOUT,
        );
        let statuses = monitor.evaluate().await.unwrap();
        let Status::Resource(status) = &statuses[0] else {
            panic!("expected resource status");
        };
        assert_eq!(status.current, 42.5);
    }

    #[tokio::test]
    async fn test_command_monitor_rejects_garbage() {
        let monitor = CommandMonitor::new(
            NumberCommandDefinition {
                id: "RTest".to_string(),
                name: "test".to_string(),
                description: "test".to_string(),
                command: "echo not-a-number".to_string(),
                total: 100.0,
            },
            DEFAULT_PROBE_TIMEOUT,
        );
        assert!(matches!(
            monitor.evaluate().await,
            Err(MonitorError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_dht22_parses_both_lines() {
        let monitor =
            Dht22Monitor::with_command("printf '21.5\\n48.0\\n'".to_string(), DEFAULT_PROBE_TIMEOUT);
        let statuses = monitor.evaluate().await.unwrap();
        assert_eq!(statuses.len(), 2);
        let ids: Vec<String> = statuses.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["RDhtTemp", "RDhtHumidity"]);
    }

    #[tokio::test]
    async fn test_dht22_partial_read() {
        let monitor =
            Dht22Monitor::with_command("printf '21.5\\n'".to_string(), DEFAULT_PROBE_TIMEOUT);
        let statuses = monitor.evaluate().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].id(), "RDhtTemp");
    }

    #[test]
    fn test_registry_filters_by_enabled_ids() {
        let enabled = vec!["RCpu".to_string(), "RRam".to_string()];
        let monitors = resource_monitors(&enabled, DEFAULT_PROBE_TIMEOUT);
        let ids: Vec<String> = monitors.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["RCpu", "RRam"]);
    }
}
