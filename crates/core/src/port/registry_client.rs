// Registry Client Port
// Pull/report contract of the external configuration registry

use crate::domain::{DeclaredConfig, PoolIdentifier, ThreadPoolReport};
use async_trait::async_trait;
use thiserror::Error;

/// Registry errors
///
/// A timed-out call is reported as `Transport`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No declared config for pool {0}")]
    NotFound(String),

    #[error("Registry transport error: {0}")]
    Transport(String),
}

/// Registry client trait
///
/// Implementations:
/// - InMemoryRegistry / FileRegistry (infra-local)
/// - config-center SDKs, HTTP long-poll or KV clients (out of tree)
///
/// The push path is not part of this trait: registries that push deliver
/// through a `ConfigPushSender` (see `application::config_sync`).
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the registry-declared config of one pool
    ///
    /// # Errors
    /// - RegistryError::NotFound if the registry declares nothing for the pool
    /// - RegistryError::Transport on any transport failure or timeout
    async fn fetch_config(&self, identifier: &PoolIdentifier) -> Result<DeclaredConfig, RegistryError>;

    /// Bulk periodic report of every managed pool
    async fn report_thread_pool(&self, pools: Vec<ThreadPoolReport>) -> Result<(), RegistryError>;

    /// Immediate report of one pool right after a local change
    async fn report_thread_pool_config_parameter(&self, pool: ThreadPoolReport) -> Result<(), RegistryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Scriptable registry client that records every call
    #[derive(Default)]
    pub struct MockRegistryClient {
        declared: Mutex<HashMap<PoolIdentifier, DeclaredConfig>>,
        pending_failures: Mutex<HashMap<PoolIdentifier, u32>>,
        fetch_counts: Mutex<HashMap<PoolIdentifier, usize>>,
        bulk_reports: Mutex<Vec<Vec<ThreadPoolReport>>>,
        parameter_reports: Mutex<Vec<ThreadPoolReport>>,
        report_delays: Mutex<HashMap<PoolIdentifier, Duration>>,
        fail_reports: AtomicBool,
    }

    impl MockRegistryClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn declare(&self, declared: DeclaredConfig) {
            self.declared.lock().insert(declared.config.identifier.clone(), declared);
        }

        /// Fail the next `count` fetches for `identifier` with a transport error
        pub fn fail_next_fetches(&self, identifier: &PoolIdentifier, count: u32) {
            self.pending_failures.lock().insert(identifier.clone(), count);
        }

        /// Hold every change report for `identifier` for `delay` before recording it
        pub fn delay_reports_for(&self, identifier: &PoolIdentifier, delay: Duration) {
            self.report_delays.lock().insert(identifier.clone(), delay);
        }

        pub fn fail_reports(&self, fail: bool) {
            self.fail_reports.store(fail, Ordering::SeqCst);
        }

        pub fn fetch_count(&self, identifier: &PoolIdentifier) -> usize {
            self.fetch_counts
                .lock()
                .get(identifier)
                .copied()
                .unwrap_or(0)
        }

        pub fn bulk_reports(&self) -> Vec<Vec<ThreadPoolReport>> {
            self.bulk_reports.lock().clone()
        }

        pub fn parameter_reports(&self) -> Vec<ThreadPoolReport> {
            self.parameter_reports.lock().clone()
        }
    }

    #[async_trait]
    impl RegistryClient for MockRegistryClient {
        async fn fetch_config(&self, identifier: &PoolIdentifier) -> Result<DeclaredConfig, RegistryError> {
            *self
                .fetch_counts
                .lock()
                .entry(identifier.clone())
                .or_insert(0) += 1;

            {
                let mut failures = self.pending_failures.lock();
                if let Some(left) = failures.get_mut(identifier) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(RegistryError::Transport("connection refused".to_string()));
                    }
                }
            }

            self.declared
                .lock()
                .get(identifier)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))
        }

        async fn report_thread_pool(&self, pools: Vec<ThreadPoolReport>) -> Result<(), RegistryError> {
            if self.fail_reports.load(Ordering::SeqCst) {
                return Err(RegistryError::Transport("report rejected".to_string()));
            }
            self.bulk_reports.lock().push(pools);
            Ok(())
        }

        async fn report_thread_pool_config_parameter(&self, pool: ThreadPoolReport) -> Result<(), RegistryError> {
            let delay = self.report_delays.lock().get(&pool.config.identifier).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            // Recorded even when failing, so tests can count attempts
            self.parameter_reports.lock().push(pool);
            if self.fail_reports.load(Ordering::SeqCst) {
                return Err(RegistryError::Transport("report rejected".to_string()));
            }
            Ok(())
        }
    }
}
