//! vigil-reporter — pluggable sinks for service up/down status.
//!
//! Watchers push a [`StatusReport`] on every tick whether or not the
//! status changed; a backend that only cares about transitions
//! deduplicates on its side, as [`LogReporter`] does.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One status observation for one watched service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Watcher key (`name_port`).
    pub key: String,
    /// Service name.
    pub name: String,
    /// Identity of the host reporting the status.
    pub instance_id: String,
    /// Port the service listens on.
    pub port: u16,
    /// Damped health status.
    pub up: bool,
}

/// A status sink. Receives every tick's result for every watcher.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()>;
}

/// Default backend: logs transitions at info, steady state at debug.
#[derive(Default)]
pub struct LogReporter {
    last: Mutex<BTreeMap<String, bool>>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Reporter for LogReporter {
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()> {
        let changed = {
            let mut last = self.last.lock().await;
            last.insert(report.key.clone(), report.up) != Some(report.up)
        };
        if changed {
            info!(
                service = %report.name,
                key = %report.key,
                up = report.up,
                "service status"
            );
        } else {
            debug!(key = %report.key, up = report.up, "service status unchanged");
        }
        Ok(())
    }
}

/// Writes the full status table as JSON after every report.
///
/// Useful for local inspection: `jq . < /run/vigil/status.json`.
pub struct FileReporter {
    path: PathBuf,
    table: Mutex<BTreeMap<String, StatusReport>>,
}

impl FileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()> {
        let json = {
            let mut table = self.table.lock().await;
            table.insert(report.key.clone(), report.clone());
            serde_json::to_vec_pretty(&*table)?
        };
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// Test backend that captures every report it receives.
#[derive(Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<StatusReport>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far, in arrival order.
    pub async fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().await.clone()
    }
}

#[async_trait]
impl Reporter for MemoryReporter {
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()> {
        self.reports.lock().await.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(key: &str, up: bool) -> StatusReport {
        StatusReport {
            key: key.to_string(),
            name: key.split('_').next().unwrap_or(key).to_string(),
            instance_id: "node-1".to_string(),
            port: 8080,
            up,
        }
    }

    #[tokio::test]
    async fn memory_reporter_captures_in_order() {
        let reporter = MemoryReporter::new();
        reporter.report(&report("web_8080", true)).await.unwrap();
        reporter.report(&report("web_8080", false)).await.unwrap();

        let seen = reporter.reports().await;
        assert_eq!(seen.len(), 2);
        assert!(seen[0].up);
        assert!(!seen[1].up);
    }

    #[tokio::test]
    async fn log_reporter_accepts_repeats() {
        let reporter = LogReporter::new();
        for _ in 0..3 {
            reporter.report(&report("web_8080", true)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn file_reporter_writes_status_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let reporter = FileReporter::new(&path);

        reporter.report(&report("web_8080", true)).await.unwrap();
        reporter.report(&report("api_9090", false)).await.unwrap();
        reporter.report(&report("web_8080", false)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let table: BTreeMap<String, StatusReport> = serde_json::from_str(&content).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table["web_8080"].up);
        assert!(!table["api_9090"].up);
    }
}
