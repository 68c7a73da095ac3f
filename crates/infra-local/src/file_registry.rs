// File-backed registry
// Declared configs are re-read from a JSON file on every fetch, so editing
// the file reconfigures pools on the next sync tick. Reports go to a second
// JSON file, replaced atomically (temp file + rename).

use async_trait::async_trait;
use dynpool_core::domain::{DeclaredConfig, PoolIdentifier, ThreadPoolReport};
use dynpool_core::port::{RegistryClient, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Declared config file:
///
/// ```text
/// { "pools": [ { "identifier": "app:orders", "corePoolSize": 4, ..., "revision": 7 } ] }
/// ```
#[derive(Debug, Default, Serialize, Deserialize)]
struct DeclaredFile {
    #[serde(default)]
    pools: Vec<DeclaredConfig>,
}

/// Report file: latest record per pool
#[derive(Debug, Default, Serialize, Deserialize)]
struct ReportFile {
    #[serde(default)]
    pools: BTreeMap<PoolIdentifier, ThreadPoolReport>,
}

pub struct FileRegistry {
    config_path: PathBuf,
    report_path: PathBuf,
    /// Serializes read-modify-write of the report file
    report_lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(config_path: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            report_path: report_path.into(),
            report_lock: Mutex::new(()),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    async fn read_declared(&self) -> Result<DeclaredFile, RegistryError> {
        let bytes = match tokio::fs::read(&self.config_path).await {
            Ok(bytes) => bytes,
            // No file yet: nothing is declared
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeclaredFile::default()),
            Err(e) => {
                return Err(RegistryError::Transport(format!(
                    "read {}: {}",
                    self.config_path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            RegistryError::Transport(format!("parse {}: {}", self.config_path.display(), e))
        })
    }

    /// Current report file; a missing file is an empty one
    ///
    /// An unreadable or corrupt file is an error, so a change report never
    /// silently drops the records of every other pool. The next bulk report
    /// rewrites the file from scratch.
    async fn read_reports(&self) -> Result<ReportFile, RegistryError> {
        let bytes = match tokio::fs::read(&self.report_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReportFile::default()),
            Err(e) => {
                return Err(RegistryError::Transport(format!(
                    "read {}: {}",
                    self.report_path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path = %self.report_path.display(), error = %e, "Report file is corrupt, keeping it until the next bulk report");
            RegistryError::Transport(format!("parse {}: {}", self.report_path.display(), e))
        })
    }

    async fn write_reports(&self, reports: &ReportFile) -> Result<(), RegistryError> {
        let transport = |what: &str, e: std::io::Error| {
            RegistryError::Transport(format!("{} {}: {}", what, self.report_path.display(), e))
        };

        let json = serde_json::to_vec_pretty(reports)
            .map_err(|e| RegistryError::Transport(format!("serialize reports: {}", e)))?;

        if let Some(parent) = self.report_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| transport("create dir for", e))?;
            }
        }

        let mut tmp = self.report_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| transport("write", e))?;
        tokio::fs::rename(&tmp, &self.report_path)
            .await
            .map_err(|e| transport("replace", e))?;
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for FileRegistry {
    async fn fetch_config(&self, identifier: &PoolIdentifier) -> Result<DeclaredConfig, RegistryError> {
        let file = self.read_declared().await?;
        file.pools
            .into_iter()
            .find(|declared| &declared.config.identifier == identifier)
            .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))
    }

    async fn report_thread_pool(&self, pools: Vec<ThreadPoolReport>) -> Result<(), RegistryError> {
        let _guard = self.report_lock.lock().await;
        let count = pools.len();
        let reports = ReportFile {
            pools: pools
                .into_iter()
                .map(|report| (report.config.identifier.clone(), report))
                .collect(),
        };
        self.write_reports(&reports).await?;
        debug!(path = %self.report_path.display(), pools = count, "Report file rewritten");
        Ok(())
    }

    async fn report_thread_pool_config_parameter(&self, pool: ThreadPoolReport) -> Result<(), RegistryError> {
        let _guard = self.report_lock.lock().await;
        let mut reports = self.read_reports().await?;
        reports.pools.insert(pool.config.identifier.clone(), pool);
        self.write_reports(&reports).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynpool_core::domain::{QueueCapacity, QueueType, ThreadPoolConfig};
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    const DECLARED: &str = r#"{
        "pools": [
            {
                "identifier": "orders:io",
                "corePoolSize": 4,
                "maximumPoolSize": 16,
                "queueCapacity": 512,
                "keepAliveSeconds": 30,
                "rejectionPolicy": "CALLER_RUNS",
                "queueType": "RESIZABLE_LINKED",
                "revision": 7
            },
            {
                "identifier": "orders:cpu",
                "corePoolSize": 2,
                "maximumPoolSize": 2,
                "queueCapacity": null,
                "keepAliveSeconds": 60,
                "rejectionPolicy": "ABORT",
                "queueType": "LINKED"
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_fetch_reads_declared_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("pools.json");
        std::fs::write(&config_path, DECLARED).unwrap();
        let registry = FileRegistry::new(&config_path, dir.path().join("report.json"));

        let io = assert_ok!(registry.fetch_config(&"orders:io".into()).await);
        assert_eq!(io.revision, Some(7));
        assert_eq!(io.config.maximum_pool_size, 16);
        assert_eq!(io.config.queue_capacity, QueueCapacity::Bounded(512));

        let cpu = assert_ok!(registry.fetch_config(&"orders:cpu".into()).await);
        assert_eq!(cpu.revision, None);
        assert_eq!(cpu.config.queue_type, QueueType::Linked);
        assert_eq!(cpu.config.queue_capacity, QueueCapacity::Unbounded);

        let err = assert_err!(registry.fetch_config(&"orders:none".into()).await);
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_file_declares_nothing() {
        let dir = tempdir().unwrap();
        let registry = FileRegistry::new(dir.path().join("absent.json"), dir.path().join("report.json"));
        let err = assert_err!(registry.fetch_config(&"orders:io".into()).await);
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_file_is_transport_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("pools.json");
        std::fs::write(&config_path, "{ not json").unwrap();
        let registry = FileRegistry::new(&config_path, dir.path().join("report.json"));

        let err = assert_err!(registry.fetch_config(&"orders:io".into()).await);
        assert!(matches!(err, RegistryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_edits_are_seen_on_next_fetch() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("pools.json");
        std::fs::write(&config_path, DECLARED).unwrap();
        let registry = FileRegistry::new(&config_path, dir.path().join("report.json"));
        assert_ok!(registry.fetch_config(&"orders:io".into()).await);

        std::fs::write(&config_path, r#"{ "pools": [] }"#).unwrap();
        assert_err!(registry.fetch_config(&"orders:io".into()).await);
    }

    #[tokio::test]
    async fn test_reports_written_atomically_and_merged() {
        let dir = tempdir().unwrap();
        let report_path = dir.path().join("out").join("report.json");
        let registry = FileRegistry::new(dir.path().join("pools.json"), &report_path);

        let a = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:a", 1, 2));
        let b = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:b", 3, 4));
        assert_ok!(registry.report_thread_pool(vec![a, b]).await);

        let changed = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:a", 5, 6));
        assert_ok!(registry.report_thread_pool_config_parameter(changed.clone()).await);

        let written: ReportFile = serde_json::from_slice(&std::fs::read(&report_path).unwrap()).unwrap();
        assert_eq!(written.pools.len(), 2);
        assert_eq!(written.pools[&PoolIdentifier::new("app:a")], changed);

        // No temp file left behind
        let leftovers: Vec<_> = std::fs::read_dir(report_path.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_report_file_fails_change_report() {
        let dir = tempdir().unwrap();
        let report_path = dir.path().join("report.json");
        std::fs::write(&report_path, "{ \"pools\": { truncated").unwrap();
        let registry = FileRegistry::new(dir.path().join("pools.json"), &report_path);

        let changed = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:a", 5, 6));
        let err = assert_err!(registry.report_thread_pool_config_parameter(changed).await);
        assert!(matches!(err, RegistryError::Transport(_)));
        // Left untouched rather than replaced by a single-pool file
        assert_eq!(std::fs::read_to_string(&report_path).unwrap(), "{ \"pools\": { truncated");

        // A bulk report starts the file over
        let a = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:a", 1, 2));
        assert_ok!(registry.report_thread_pool(vec![a]).await);
        let written: ReportFile = serde_json::from_slice(&std::fs::read(&report_path).unwrap()).unwrap();
        assert_eq!(written.pools.len(), 1);
    }
}
