// In-process registry
// Declared configs keyed by identifier plus a revision counter; publishing
// also pushes to a subscribed sync engine.

use async_trait::async_trait;
use dynpool_core::application::ConfigPushSender;
use dynpool_core::domain::{DeclaredConfig, PoolIdentifier, ThreadPoolConfig, ThreadPoolReport};
use dynpool_core::port::{RegistryClient, RegistryError};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
struct Inner {
    declared: HashMap<PoolIdentifier, DeclaredConfig>,
    revision: u64,
    subscriber: Option<ConfigPushSender>,
    /// Latest record per pool, from either report call
    reported: HashMap<PoolIdentifier, ThreadPoolReport>,
    bulk_report_count: usize,
    parameter_reports: Vec<ThreadPoolReport>,
}

/// Registry held in process memory
///
/// Stores whatever is published; validation belongs to the apply path.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver every later `publish` to this push sender as well
    pub fn subscribe(&self, sender: ConfigPushSender) {
        self.inner.lock().subscriber = Some(sender);
    }

    /// Declare a config under the next revision and push it
    ///
    /// Returns the assigned revision.
    pub fn publish(&self, config: ThreadPoolConfig) -> u64 {
        let (declared, subscriber) = {
            let mut inner = self.inner.lock();
            inner.revision += 1;
            let declared = DeclaredConfig::with_revision(config, inner.revision);
            inner
                .declared
                .insert(declared.config.identifier.clone(), declared.clone());
            (declared, inner.subscriber.clone())
        };

        let revision = declared.revision.unwrap_or_default();
        debug!(pool = %declared.config.identifier, revision = revision, "Config published");

        if let Some(sender) = subscriber {
            sender.on_config_pushed(declared.config.identifier.clone(), declared);
        }
        revision
    }

    /// Withdraw a declaration; later fetches return NotFound
    pub fn remove(&self, identifier: &PoolIdentifier) -> bool {
        self.inner.lock().declared.remove(identifier).is_some()
    }

    pub fn declared(&self, identifier: &PoolIdentifier) -> Option<DeclaredConfig> {
        self.inner.lock().declared.get(identifier).cloned()
    }

    /// Latest reported record of one pool
    pub fn reported(&self, identifier: &PoolIdentifier) -> Option<ThreadPoolReport> {
        self.inner.lock().reported.get(identifier).cloned()
    }

    pub fn bulk_report_count(&self) -> usize {
        self.inner.lock().bulk_report_count
    }

    /// Every per-pool change report, in arrival order
    pub fn parameter_reports(&self) -> Vec<ThreadPoolReport> {
        self.inner.lock().parameter_reports.clone()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn fetch_config(&self, identifier: &PoolIdentifier) -> Result<DeclaredConfig, RegistryError> {
        self.declared(identifier)
            .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))
    }

    async fn report_thread_pool(&self, pools: Vec<ThreadPoolReport>) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        inner.bulk_report_count += 1;
        for report in pools {
            inner
                .reported
                .insert(report.config.identifier.clone(), report);
        }
        Ok(())
    }

    async fn report_thread_pool_config_parameter(&self, pool: ThreadPoolReport) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        inner
            .reported
            .insert(pool.config.identifier.clone(), pool.clone());
        inner.parameter_reports.push(pool);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynpool_core::application::push_channel;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_publish_assigns_increasing_revisions() {
        let registry = InMemoryRegistry::new();
        assert_eq!(registry.publish(ThreadPoolConfig::new("app:a", 1, 2)), 1);
        assert_eq!(registry.publish(ThreadPoolConfig::new("app:b", 1, 2)), 2);
        assert_eq!(registry.publish(ThreadPoolConfig::new("app:a", 3, 4)), 3);

        let fetched = assert_ok!(registry.fetch_config(&"app:a".into()).await);
        assert_eq!(fetched.revision, Some(3));
        assert_eq!(fetched.config.core_pool_size, 3);
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_not_found() {
        let registry = InMemoryRegistry::new();
        let err = assert_err!(registry.fetch_config(&"app:none".into()).await);
        assert_eq!(err, RegistryError::NotFound("app:none".to_string()));
    }

    #[tokio::test]
    async fn test_remove_withdraws_declaration() {
        let registry = InMemoryRegistry::new();
        registry.publish(ThreadPoolConfig::new("app:a", 1, 2));
        assert!(registry.remove(&"app:a".into()));
        assert_err!(registry.fetch_config(&"app:a".into()).await);
    }

    #[tokio::test]
    async fn test_publish_pushes_to_subscriber() {
        let registry = InMemoryRegistry::new();
        let (tx, mut rx) = push_channel(4);
        registry.subscribe(tx);

        registry.publish(ThreadPoolConfig::new("app:a", 2, 8));
        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.identifier, PoolIdentifier::new("app:a"));
        assert_eq!(pushed.declared.revision, Some(1));
        assert_eq!(pushed.declared.config.maximum_pool_size, 8);
    }

    #[tokio::test]
    async fn test_reports_keep_latest_record_per_pool() {
        let registry = InMemoryRegistry::new();
        let first = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:a", 1, 2));
        let second = ThreadPoolReport::config_only(ThreadPoolConfig::new("app:a", 4, 4));

        assert_ok!(registry.report_thread_pool(vec![first]).await);
        assert_ok!(registry.report_thread_pool_config_parameter(second.clone()).await);

        assert_eq!(registry.bulk_report_count(), 1);
        assert_eq!(registry.parameter_reports(), vec![second.clone()]);
        assert_eq!(registry.reported(&"app:a".into()), Some(second));
    }
}
