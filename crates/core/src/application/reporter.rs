// Registry Reporter
// One-way snapshot push of every managed pool to the registry

use crate::application::constants::DEFAULT_REPORT_INTERVAL;
use crate::application::pool_handle::PoolHandle;
use crate::application::pool_store::PoolRegistryStore;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{ReportMode, ThreadPoolConfig, ThreadPoolReport};
use crate::error::Result;
use crate::port::RegistryClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Reporter configuration
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub interval: Duration,
    pub mode: ReportMode,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REPORT_INTERVAL,
            mode: ReportMode::WithMetrics,
        }
    }
}

/// Pushes pool snapshots to the registry client
///
/// Fire-and-forget: failures are logged and returned to the caller, they
/// never touch local pool state.
pub struct RegistryReporter {
    store: Arc<PoolRegistryStore>,
    registry: Arc<dyn RegistryClient>,
    config: ReporterConfig,
}

impl RegistryReporter {
    pub fn new(
        store: Arc<PoolRegistryStore>,
        registry: Arc<dyn RegistryClient>,
        config: ReporterConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Report every registered pool in one bulk call
    ///
    /// Returns the number of pools reported.
    pub async fn report_all(&self) -> Result<usize> {
        let reports: Vec<ThreadPoolReport> = self
            .store
            .list_all()
            .iter()
            .map(|handle| handle.report(self.config.mode))
            .collect();
        let count = reports.len();

        if let Err(e) = self.registry.report_thread_pool(reports).await {
            warn!(error = %e, pools = count, "Bulk pool report failed");
            return Err(e.into());
        }

        debug!(pools = count, "Bulk pool report sent");
        Ok(count)
    }

    /// Report one pool right after its config changed
    ///
    /// `applied` is the config the apply made live; re-reading the handle
    /// here could pick up a later apply instead.
    pub async fn report_changed(&self, handle: &PoolHandle, applied: ThreadPoolConfig) -> Result<()> {
        let report = handle.report_for(applied, self.config.mode);
        if let Err(e) = self.registry.report_thread_pool_config_parameter(report).await {
            warn!(pool = %handle.identifier(), error = %e, "Pool change report failed");
            return Err(e.into());
        }
        debug!(pool = %handle.identifier(), "Pool change reported");
        Ok(())
    }

    /// Periodic bulk report loop (spawn in tokio::spawn)
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            mode = ?self.config.mode,
            "Registry reporter started"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // Failure already logged; the next tick retries
                    let _ = self.report_all().await;
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Registry reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::managed_executor::mocks::MockExecutor;
    use crate::port::registry_client::mocks::MockRegistryClient;
    use crate::application::shutdown::shutdown_channel;
    use tokio_test::{assert_err, assert_ok};

    fn setup(mode: ReportMode) -> (Arc<PoolRegistryStore>, Arc<MockRegistryClient>, RegistryReporter) {
        let store = Arc::new(PoolRegistryStore::new());
        store
            .register(ThreadPoolConfig::new("app:a", 1, 2), Arc::new(MockExecutor::resizable(1, 2)))
            .unwrap();
        store
            .register(ThreadPoolConfig::new("app:b", 2, 4), Arc::new(MockExecutor::resizable(2, 4)))
            .unwrap();
        let registry = Arc::new(MockRegistryClient::new());
        let reporter = RegistryReporter::new(
            store.clone(),
            registry.clone(),
            ReporterConfig {
                interval: Duration::from_millis(10),
                mode,
            },
        );
        (store, registry, reporter)
    }

    #[tokio::test]
    async fn test_report_all_sends_every_pool() {
        let (_store, registry, reporter) = setup(ReportMode::WithMetrics);

        assert_eq!(reporter.report_all().await.unwrap(), 2);

        let reports = registry.bulk_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].len(), 2);
        assert!(reports[0].iter().all(|r| r.metrics.is_some()));
    }

    #[tokio::test]
    async fn test_config_only_mode_omits_metrics() {
        let (_store, registry, reporter) = setup(ReportMode::ConfigOnly);
        assert_ok!(reporter.report_all().await);
        assert!(registry.bulk_reports()[0].iter().all(|r| r.metrics.is_none()));
    }

    #[tokio::test]
    async fn test_report_failure_is_returned_not_panicked() {
        let (store, registry, reporter) = setup(ReportMode::WithMetrics);
        registry.fail_reports(true);

        assert_err!(reporter.report_all().await);
        let handle = store.get(&"app:a".into()).unwrap();
        assert_err!(reporter.report_changed(&handle, handle.snapshot_config()).await);
        // Local state untouched
        assert_eq!(handle.snapshot_config().core_pool_size, 1);
    }

    #[tokio::test]
    async fn test_change_report_carries_given_config() {
        let (store, registry, reporter) = setup(ReportMode::ConfigOnly);
        let handle = store.get(&"app:b".into()).unwrap();
        let applied = ThreadPoolConfig::new("app:b", 3, 6);
        handle.apply_config(applied.clone()).unwrap();
        // A later apply lands before the report goes out
        handle.apply_config(ThreadPoolConfig::new("app:b", 5, 10)).unwrap();

        assert_ok!(reporter.report_changed(&handle, applied.clone()).await);
        let reports = registry.parameter_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].config, applied);
        assert!(reports[0].metrics.is_none());
    }

    #[tokio::test]
    async fn test_run_reports_until_shutdown() {
        let (_store, registry, reporter) = setup(ReportMode::WithMetrics);
        let (tx, token) = shutdown_channel();

        let task = tokio::spawn(Arc::new(reporter).run(token));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.shutdown();
        task.await.unwrap();

        let sent = registry.bulk_reports().len();
        assert!(sent >= 1, "expected at least one periodic report, got {}", sent);
    }
}
