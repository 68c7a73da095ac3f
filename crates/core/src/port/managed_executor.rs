// Managed Executor Port
// Abstraction over one live worker pool whose parameters can be tuned in place

use crate::domain::{PoolRuntimeMetrics, PoolSizes, QueueCapacity, QueueType, RejectionPolicy};
use std::time::Duration;
use thiserror::Error;

/// Executor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Task rejected by pool {pool}")]
    Rejected { pool: String },

    #[error("Invalid pool sizes: core {core} > max {max}")]
    InvalidSizes { core: u32, max: u32 },

    #[error("Queue {0} does not support resizing")]
    QueueNotResizable(QueueType),

    #[error("Pool is shut down")]
    Shutdown,

    #[error("Worker spawn failed: {0}")]
    Spawn(String),
}

/// Live pool whose tunables are changed while work is in flight
///
/// Implementations must:
/// - refuse any size update that would leave `core > max`
///   (`ExecutorError::InvalidSizes`) without changing anything
/// - return both sizes from one atomic read in `pool_sizes`
/// - never cancel or requeue accepted tasks when reconfigured
pub trait ManagedExecutor: Send + Sync {
    /// Current (core, max) pair, read atomically
    fn pool_sizes(&self) -> PoolSizes;

    fn set_core_pool_size(&self, core: u32) -> Result<(), ExecutorError>;

    fn set_maximum_pool_size(&self, max: u32) -> Result<(), ExecutorError>;

    fn keep_alive(&self) -> Duration;

    fn set_keep_alive(&self, keep_alive: Duration);

    fn rejection_policy(&self) -> RejectionPolicy;

    fn set_rejection_policy(&self, policy: RejectionPolicy);

    /// Queue implementation, fixed for the pool's lifetime
    fn queue_type(&self) -> QueueType;

    fn queue_capacity(&self) -> QueueCapacity;

    /// Change queue capacity
    ///
    /// # Errors
    /// - ExecutorError::QueueNotResizable if the queue type cannot be resized
    fn set_queue_capacity(&self, capacity: QueueCapacity) -> Result<(), ExecutorError>;

    /// Snapshot runtime counters (no side effects)
    fn metrics(&self) -> PoolRuntimeMetrics;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

    /// In-memory executor that enforces the size invariant like a real pool
    pub struct MockExecutor {
        sizes: AtomicU64,
        keep_alive_ms: AtomicU64,
        policy: AtomicU8,
        queue_type: QueueType,
        capacity: Mutex<QueueCapacity>,
        metrics: Mutex<PoolRuntimeMetrics>,
        fail_max_updates: AtomicBool,
        /// Size setter calls left before every later one fails
        size_update_budget: AtomicU64,
        size_updates: AtomicU64,
    }

    impl MockExecutor {
        pub fn new(core: u32, max: u32, queue_type: QueueType, capacity: QueueCapacity) -> Self {
            Self {
                sizes: AtomicU64::new(PoolSizes::new(core, max).pack()),
                keep_alive_ms: AtomicU64::new(60_000),
                policy: AtomicU8::new(RejectionPolicy::Abort.as_u8()),
                queue_type,
                capacity: Mutex::new(capacity),
                metrics: Mutex::new(PoolRuntimeMetrics::default()),
                fail_max_updates: AtomicBool::new(false),
                size_update_budget: AtomicU64::new(u64::MAX),
                size_updates: AtomicU64::new(0),
            }
        }

        /// Resizable queue of 1024, the `ThreadPoolConfig::new` default
        pub fn resizable(core: u32, max: u32) -> Self {
            Self::new(core, max, QueueType::ResizableLinked, QueueCapacity::Bounded(1024))
        }

        pub fn set_metrics(&self, metrics: PoolRuntimeMetrics) {
            *self.metrics.lock() = metrics;
        }

        /// Make every later `set_maximum_pool_size` fail
        pub fn fail_max_updates(&self, fail: bool) {
            self.fail_max_updates.store(fail, Ordering::SeqCst);
        }

        /// Let the next `calls` size setter calls through, then fail every one
        pub fn fail_size_updates_after(&self, calls: u64) {
            self.size_update_budget.store(calls, Ordering::SeqCst);
        }

        fn take_size_update(&self) -> Result<(), ExecutorError> {
            self.size_update_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                    u64::MAX => Some(u64::MAX),
                    0 => None,
                    n => Some(n - 1),
                })
                .map(|_| ())
                .map_err(|_| ExecutorError::Spawn("injected failure".to_string()))
        }

        /// Number of successful size setter calls
        pub fn size_updates(&self) -> u64 {
            self.size_updates.load(Ordering::SeqCst)
        }
    }

    impl ManagedExecutor for MockExecutor {
        fn pool_sizes(&self) -> PoolSizes {
            PoolSizes::unpack(self.sizes.load(Ordering::SeqCst))
        }

        fn set_core_pool_size(&self, core: u32) -> Result<(), ExecutorError> {
            self.take_size_update()?;
            let current = self.pool_sizes();
            if core > current.max {
                return Err(ExecutorError::InvalidSizes {
                    core,
                    max: current.max,
                });
            }
            self.sizes
                .store(PoolSizes::new(core, current.max).pack(), Ordering::SeqCst);
            self.size_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_maximum_pool_size(&self, max: u32) -> Result<(), ExecutorError> {
            if self.fail_max_updates.load(Ordering::SeqCst) {
                return Err(ExecutorError::Spawn("injected failure".to_string()));
            }
            self.take_size_update()?;
            let current = self.pool_sizes();
            if max < current.core || max == 0 {
                return Err(ExecutorError::InvalidSizes {
                    core: current.core,
                    max,
                });
            }
            self.sizes
                .store(PoolSizes::new(current.core, max).pack(), Ordering::SeqCst);
            self.size_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn keep_alive(&self) -> Duration {
            Duration::from_millis(self.keep_alive_ms.load(Ordering::SeqCst))
        }

        fn set_keep_alive(&self, keep_alive: Duration) {
            self.keep_alive_ms
                .store(keep_alive.as_millis() as u64, Ordering::SeqCst);
        }

        fn rejection_policy(&self) -> RejectionPolicy {
            RejectionPolicy::from_u8(self.policy.load(Ordering::SeqCst)).unwrap_or(RejectionPolicy::Abort)
        }

        fn set_rejection_policy(&self, policy: RejectionPolicy) {
            self.policy.store(policy.as_u8(), Ordering::SeqCst);
        }

        fn queue_type(&self) -> QueueType {
            self.queue_type
        }

        fn queue_capacity(&self) -> QueueCapacity {
            *self.capacity.lock()
        }

        fn set_queue_capacity(&self, capacity: QueueCapacity) -> Result<(), ExecutorError> {
            if !self.queue_type.supports_resize() {
                return Err(ExecutorError::QueueNotResizable(self.queue_type));
            }
            *self.capacity.lock() = capacity;
            Ok(())
        }

        fn metrics(&self) -> PoolRuntimeMetrics {
            self.metrics.lock().clone()
        }
    }
}
