//! PoolHandle - one live pool plus its last-applied configuration
//!
//! All mutation goes through `apply_config` / `apply_declared`, serialized by
//! the handle's own critical section. Config reads are copy-on-read snapshots
//! (`ArcSwap`), metric reads go straight to the executor, so monitoring never
//! waits on a reconfiguration.

use crate::application::config_sync::SyncPhase;
use crate::domain::{
    ConfigDiff, ConfigField, DeclaredConfig, DomainError, PoolIdentifier, PoolRuntimeMetrics, PoolSizes,
    ReportMode, ThreadPoolConfig, ThreadPoolReport,
};
use crate::error::{AppError, Result};
use crate::port::{ExecutorError, ManagedExecutor};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One field that could not be applied while the rest of the config was
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialApply {
    pub field: ConfigField,
    pub reason: String,
}

/// Result of a successful `apply_config`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Config equals the last-applied one; nothing touched
    Unchanged,
    /// Older registry revision than the one already applied; dropped
    Stale { incoming: u64, applied: u64 },
    /// Every changed field is live
    Applied {
        diff: ConfigDiff,
        effective: ThreadPoolConfig,
    },
    /// Sizes/policy/keep-alive are live, some queue fields are not
    Partial {
        diff: ConfigDiff,
        warnings: Vec<PartialApply>,
        effective: ThreadPoolConfig,
    },
}

impl ApplyOutcome {
    /// True when the live pool was reconfigured
    pub fn is_change(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. } | ApplyOutcome::Partial { .. })
    }

    /// Config this apply made live, captured inside the apply critical section
    pub fn effective(&self) -> Option<&ThreadPoolConfig> {
        match self {
            ApplyOutcome::Applied { effective, .. } | ApplyOutcome::Partial { effective, .. } => Some(effective),
            ApplyOutcome::Unchanged | ApplyOutcome::Stale { .. } => None,
        }
    }
}

/// State guarded by the apply critical section
#[derive(Debug, Default)]
struct ApplyState {
    applied_revision: Option<u64>,
}

/// Handle over one managed pool
pub struct PoolHandle {
    identifier: PoolIdentifier,
    executor: Arc<dyn ManagedExecutor>,
    /// Last config accepted by apply (what the registry asked for)
    declared: ArcSwap<ThreadPoolConfig>,
    /// What is actually live on the executor
    effective: ArcSwap<ThreadPoolConfig>,
    apply_lock: Mutex<ApplyState>,
    phase: AtomicU8,
}

impl PoolHandle {
    /// Attach a live executor and bring it to `initial_config`
    ///
    /// # Errors
    /// - InvalidConfig if `initial_config` fails validation
    /// - Executor error if the initial sizes cannot be applied
    pub fn new(initial_config: ThreadPoolConfig, executor: Arc<dyn ManagedExecutor>) -> Result<Self> {
        initial_config.validate()?;

        let live = Arc::new(read_live_config(&initial_config.identifier, executor.as_ref()));
        let handle = Self {
            identifier: initial_config.identifier.clone(),
            executor,
            declared: ArcSwap::new(Arc::clone(&live)),
            effective: ArcSwap::new(live),
            apply_lock: Mutex::new(ApplyState::default()),
            phase: AtomicU8::new(SyncPhase::Idle.as_u8()),
        };

        if let ApplyOutcome::Partial { warnings, .. } = handle.apply_config(initial_config)? {
            warn!(
                pool = %handle.identifier,
                warnings = ?warnings,
                "Initial config only partially applied"
            );
        }

        Ok(handle)
    }

    pub fn identifier(&self) -> &PoolIdentifier {
        &self.identifier
    }

    /// Validate and apply a config with no registry revision
    pub fn apply_config(&self, config: ThreadPoolConfig) -> Result<ApplyOutcome> {
        self.apply_declared(&DeclaredConfig::new(config))
    }

    /// Validate and apply a registry-declared config
    ///
    /// Sizes are applied in shrink-safe order so `core <= max` holds after
    /// every single executor call. If a size update fails halfway, the first
    /// half is rolled back and nothing else is touched.
    ///
    /// # Errors
    /// - InvalidConfig / IdentifierMismatch: pool untouched
    /// - Executor: sizes rolled back, pool untouched
    /// - RollbackFailed: the executor kept the half-applied sizes; the
    ///   effective snapshot is re-read from it, the declared baseline is not
    ///   advanced so the next sync retries
    pub fn apply_declared(&self, declared: &DeclaredConfig) -> Result<ApplyOutcome> {
        let target = &declared.config;
        target.validate()?;
        if target.identifier != self.identifier {
            return Err(DomainError::IdentifierMismatch {
                expected: self.identifier.to_string(),
                actual: target.identifier.to_string(),
            }
            .into());
        }

        let mut state = self.apply_lock.lock();

        if let (Some(incoming), Some(applied)) = (declared.revision, state.applied_revision) {
            if incoming < applied {
                debug!(
                    pool = %self.identifier,
                    incoming = incoming,
                    applied = applied,
                    "Dropping stale config revision"
                );
                return Ok(ApplyOutcome::Stale { incoming, applied });
            }
        }

        let current = self.declared.load_full();
        let diff = ConfigDiff::between(&current, target);
        if diff.is_empty() {
            if declared.revision.is_some() {
                state.applied_revision = declared.revision;
            }
            return Ok(ApplyOutcome::Unchanged);
        }

        if diff.touches_sizes() {
            if let Err(e) = self.apply_sizes(PoolSizes::new(target.core_pool_size, target.maximum_pool_size)) {
                if matches!(e, AppError::RollbackFailed { .. }) {
                    self.reconcile_effective_sizes();
                }
                return Err(e);
            }
        }
        if diff.contains(ConfigField::KeepAliveSeconds) {
            self.executor.set_keep_alive(target.keep_alive());
        }
        if diff.contains(ConfigField::RejectionPolicy) {
            self.executor.set_rejection_policy(target.rejection_policy);
        }

        let mut effective = target.clone();
        let mut warnings = Vec::new();

        let live_queue = self.executor.queue_type();
        if target.queue_type != live_queue {
            warnings.push(PartialApply {
                field: ConfigField::QueueType,
                reason: format!("queue type is fixed at {} while running", live_queue),
            });
            effective.queue_type = live_queue;
        }

        if target.queue_capacity != self.executor.queue_capacity() {
            if let Err(e) = self.executor.set_queue_capacity(target.queue_capacity) {
                warnings.push(PartialApply {
                    field: ConfigField::QueueCapacity,
                    reason: e.to_string(),
                });
                effective.queue_capacity = self.executor.queue_capacity();
            }
        }

        self.declared.store(Arc::new(target.clone()));
        self.effective.store(Arc::new(effective.clone()));
        if declared.revision.is_some() {
            state.applied_revision = declared.revision;
        }
        drop(state);

        if warnings.is_empty() {
            info!(
                pool = %self.identifier,
                changed = %diff,
                core = target.core_pool_size,
                max = target.maximum_pool_size,
                queue_capacity = %target.queue_capacity,
                keep_alive_secs = target.keep_alive_seconds,
                rejection_policy = %target.rejection_policy,
                "Pool config applied"
            );
            Ok(ApplyOutcome::Applied { diff, effective })
        } else {
            warn!(
                pool = %self.identifier,
                changed = %diff,
                warnings = ?warnings,
                "Pool config partially applied"
            );
            Ok(ApplyOutcome::Partial {
                diff,
                warnings,
                effective,
            })
        }
    }

    fn apply_sizes(&self, target: PoolSizes) -> Result<()> {
        let before = self.executor.pool_sizes();

        if target.max < before.max {
            // Shrinking: lower core first so max never drops below it
            if target.core != before.core {
                self.executor.set_core_pool_size(target.core)?;
            }
            if let Err(e) = self.executor.set_maximum_pool_size(target.max) {
                if let Err(rollback) = self.executor.set_core_pool_size(before.core) {
                    return Err(self.rollback_failed(e, rollback));
                }
                return Err(e.into());
            }
        } else {
            // Growing: raise max first so core always fits under it
            if target.max != before.max {
                self.executor.set_maximum_pool_size(target.max)?;
            }
            if target.core != before.core {
                if let Err(e) = self.executor.set_core_pool_size(target.core) {
                    if let Err(rollback) = self.executor.set_maximum_pool_size(before.max) {
                        return Err(self.rollback_failed(e, rollback));
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn rollback_failed(&self, cause: ExecutorError, rollback: ExecutorError) -> AppError {
        let live = self.executor.pool_sizes();
        error!(
            pool = %self.identifier,
            error = %cause,
            rollback_error = %rollback,
            core = live.core,
            max = live.max,
            "Size rollback failed, pool left half-resized"
        );
        AppError::RollbackFailed {
            pool: self.identifier.to_string(),
            cause,
            rollback,
        }
    }

    /// Point the effective snapshot at the sizes the executor actually holds
    fn reconcile_effective_sizes(&self) {
        let live = self.executor.pool_sizes();
        let mut effective = self.snapshot_config();
        effective.core_pool_size = live.core;
        effective.maximum_pool_size = live.max;
        self.effective.store(Arc::new(effective));
    }

    /// Effective config currently live on the pool (copy-on-read)
    pub fn snapshot_config(&self) -> ThreadPoolConfig {
        self.effective.load().as_ref().clone()
    }

    /// Last config accepted by apply; the baseline for registry diffs
    pub fn declared_config(&self) -> Arc<ThreadPoolConfig> {
        self.declared.load_full()
    }

    pub fn snapshot_metrics(&self) -> PoolRuntimeMetrics {
        self.executor.metrics()
    }

    /// Live (core, max) pair as the executor sees it
    pub fn snapshot_sizes(&self) -> PoolSizes {
        self.executor.pool_sizes()
    }

    pub fn applied_revision(&self) -> Option<u64> {
        self.apply_lock.lock().applied_revision
    }

    /// Registry record for this pool
    pub fn report(&self, mode: ReportMode) -> ThreadPoolReport {
        self.report_for(self.snapshot_config(), mode)
    }

    /// Registry record carrying a config captured earlier, e.g. by an apply
    pub fn report_for(&self, config: ThreadPoolConfig, mode: ReportMode) -> ThreadPoolReport {
        match mode {
            ReportMode::ConfigOnly => ThreadPoolReport::config_only(config),
            ReportMode::WithMetrics => ThreadPoolReport::with_metrics(config, self.snapshot_metrics()),
        }
    }

    pub fn sync_phase(&self) -> SyncPhase {
        SyncPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_sync_phase(&self, phase: SyncPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("identifier", &self.identifier)
            .field("effective", &self.effective.load_full())
            .finish()
    }
}

fn read_live_config(identifier: &PoolIdentifier, executor: &dyn ManagedExecutor) -> ThreadPoolConfig {
    let sizes = executor.pool_sizes();
    ThreadPoolConfig {
        identifier: identifier.clone(),
        core_pool_size: sizes.core,
        maximum_pool_size: sizes.max,
        queue_capacity: executor.queue_capacity(),
        keep_alive_seconds: executor.keep_alive().as_secs(),
        rejection_policy: executor.rejection_policy(),
        queue_type: executor.queue_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueCapacity, QueueType, RejectionPolicy};
    use crate::port::managed_executor::mocks::MockExecutor;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    const ID: &str = "app:pool";

    fn handle_with(executor: Arc<MockExecutor>) -> PoolHandle {
        PoolHandle::new(ThreadPoolConfig::new(ID, 2, 4), executor).unwrap()
    }

    #[test]
    fn test_new_brings_executor_to_initial_config() {
        let executor = Arc::new(MockExecutor::resizable(1, 1));
        let handle = PoolHandle::new(
            ThreadPoolConfig::new(ID, 3, 8).with_rejection_policy(RejectionPolicy::CallerRuns),
            executor.clone(),
        )
        .unwrap();

        assert_eq!(executor.pool_sizes(), PoolSizes::new(3, 8));
        assert_eq!(executor.rejection_policy(), RejectionPolicy::CallerRuns);
        assert_eq!(handle.snapshot_config().core_pool_size, 3);
    }

    #[test]
    fn test_apply_then_snapshot_returns_same_config() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());

        let target = ThreadPoolConfig::new(ID, 5, 10)
            .with_queue(QueueType::ResizableLinked, QueueCapacity::Bounded(64))
            .with_keep_alive_seconds(15)
            .with_rejection_policy(RejectionPolicy::DiscardOldest);

        let outcome = handle.apply_config(target.clone()).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
        assert_eq!(handle.snapshot_config(), target);
        assert_eq!(executor.queue_capacity(), QueueCapacity::Bounded(64));
        assert_eq!(executor.keep_alive().as_secs(), 15);
    }

    #[test]
    fn test_invalid_config_leaves_pool_untouched() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());
        let before = handle.snapshot_config();
        let updates_before = executor.size_updates();

        let err = handle.apply_config(ThreadPoolConfig::new(ID, 9, 3)).unwrap_err();
        assert!(err.is_invalid_config());
        assert_eq!(handle.snapshot_config(), before);
        assert_eq!(executor.size_updates(), updates_before);
    }

    #[test]
    fn test_foreign_identifier_rejected() {
        let handle = handle_with(Arc::new(MockExecutor::resizable(2, 4)));
        let err = handle
            .apply_config(ThreadPoolConfig::new("other:pool", 2, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::AppError::Domain(DomainError::IdentifierMismatch { .. })
        ));
    }

    #[test]
    fn test_same_config_twice_is_unchanged() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());
        let target = ThreadPoolConfig::new(ID, 6, 12);

        assert!(handle.apply_config(target.clone()).unwrap().is_change());
        let updates = executor.size_updates();
        assert_eq!(handle.apply_config(target).unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(executor.size_updates(), updates);
    }

    #[test]
    fn test_shrink_below_current_core() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());
        handle.apply_config(ThreadPoolConfig::new(ID, 10, 20)).unwrap();

        // New max (5) is below the current core (10): core must go first
        handle.apply_config(ThreadPoolConfig::new(ID, 3, 5)).unwrap();
        assert_eq!(executor.pool_sizes(), PoolSizes::new(3, 5));
    }

    #[test]
    fn test_grow_core_above_current_max() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());

        // New core (8) is above the current max (4): max must go first
        handle.apply_config(ThreadPoolConfig::new(ID, 8, 16)).unwrap();
        assert_eq!(executor.pool_sizes(), PoolSizes::new(8, 16));
    }

    #[test]
    fn test_failed_max_update_rolls_back_core() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());
        handle.apply_config(ThreadPoolConfig::new(ID, 4, 8)).unwrap();
        let before = handle.snapshot_config();

        executor.fail_max_updates(true);
        let err = handle
            .apply_config(ThreadPoolConfig::new(ID, 1, 2).with_keep_alive_seconds(1))
            .unwrap_err();
        assert!(matches!(err, crate::AppError::Executor(_)));

        assert_eq!(executor.pool_sizes(), PoolSizes::new(4, 8));
        assert_eq!(executor.keep_alive().as_secs(), 60);
        assert_eq!(handle.snapshot_config(), before);
    }

    #[test]
    fn test_failed_rollback_reports_live_sizes() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor.clone());

        // Max grows to 16, core update fails, restoring max fails too
        executor.fail_size_updates_after(1);
        let err = handle
            .apply_config(ThreadPoolConfig::new(ID, 8, 16).with_keep_alive_seconds(5))
            .unwrap_err();
        assert!(matches!(err, AppError::RollbackFailed { .. }));

        assert_eq!(executor.pool_sizes(), PoolSizes::new(2, 16));
        let effective = handle.snapshot_config();
        assert_eq!((effective.core_pool_size, effective.maximum_pool_size), (2, 16));
        assert_eq!(executor.keep_alive().as_secs(), 60);

        // Declared baseline stays put, so the same target is retried
        assert_eq!(handle.declared_config().maximum_pool_size, 4);
        executor.fail_size_updates_after(u64::MAX);
        let outcome = handle
            .apply_config(ThreadPoolConfig::new(ID, 8, 16).with_keep_alive_seconds(5))
            .unwrap();
        assert!(outcome.is_change());
        assert_eq!(executor.pool_sizes(), PoolSizes::new(8, 16));
    }

    #[test]
    fn test_outcome_carries_applied_config() {
        let handle = handle_with(Arc::new(MockExecutor::resizable(2, 4)));
        let target = ThreadPoolConfig::new(ID, 3, 9);

        let outcome = handle.apply_config(target.clone()).unwrap();
        assert_eq!(outcome.effective(), Some(&target));
        assert_eq!(handle.apply_config(target).unwrap().effective(), None);
    }

    #[test]
    fn test_non_resizable_queue_is_partial_apply() {
        let executor = Arc::new(MockExecutor::new(2, 4, QueueType::Array, QueueCapacity::Bounded(100)));
        let handle = PoolHandle::new(
            ThreadPoolConfig::new(ID, 2, 4).with_queue(QueueType::Array, QueueCapacity::Bounded(100)),
            executor.clone(),
        )
        .unwrap();

        let target = ThreadPoolConfig::new(ID, 3, 6)
            .with_queue(QueueType::Array, QueueCapacity::Bounded(500))
            .with_rejection_policy(RejectionPolicy::Discard);
        let outcome = handle.apply_config(target.clone()).unwrap();

        match outcome {
            ApplyOutcome::Partial { warnings, .. } => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].field, ConfigField::QueueCapacity);
            }
            other => panic!("expected partial apply, got {:?}", other),
        }
        // Sizes and policy still went through
        assert_eq!(executor.pool_sizes(), PoolSizes::new(3, 6));
        assert_eq!(executor.rejection_policy(), RejectionPolicy::Discard);
        // Effective config reports the real queue, declared keeps the request
        assert_eq!(handle.snapshot_config().queue_capacity, QueueCapacity::Bounded(100));
        assert_eq!(handle.declared_config().queue_capacity, QueueCapacity::Bounded(500));

        // Re-applying the same request is a no-op, not another warning
        assert_eq!(handle.apply_config(target).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_queue_type_change_is_partial_apply() {
        let executor = Arc::new(MockExecutor::resizable(2, 4));
        let handle = handle_with(executor);
        let target = ThreadPoolConfig::new(ID, 2, 4).with_queue(QueueType::Linked, QueueCapacity::Bounded(1024));

        match handle.apply_config(target).unwrap() {
            ApplyOutcome::Partial { warnings, .. } => {
                assert_eq!(warnings[0].field, ConfigField::QueueType);
            }
            other => panic!("expected partial apply, got {:?}", other),
        }
        assert_eq!(handle.snapshot_config().queue_type, QueueType::ResizableLinked);
    }

    #[test]
    fn test_stale_revision_dropped() {
        let handle = handle_with(Arc::new(MockExecutor::resizable(2, 4)));

        let newer = DeclaredConfig::with_revision(ThreadPoolConfig::new(ID, 5, 10), 7);
        let older = DeclaredConfig::with_revision(ThreadPoolConfig::new(ID, 3, 6), 5);

        assert!(handle.apply_declared(&newer).unwrap().is_change());
        assert_eq!(
            handle.apply_declared(&older).unwrap(),
            ApplyOutcome::Stale {
                incoming: 5,
                applied: 7
            }
        );
        assert_eq!(handle.snapshot_config().core_pool_size, 5);
        assert_eq!(handle.applied_revision(), Some(7));
    }

    #[test]
    fn test_unrevisioned_config_is_last_writer_wins() {
        let handle = handle_with(Arc::new(MockExecutor::resizable(2, 4)));
        handle
            .apply_declared(&DeclaredConfig::with_revision(ThreadPoolConfig::new(ID, 5, 10), 7))
            .unwrap();
        assert!(handle
            .apply_config(ThreadPoolConfig::new(ID, 1, 2))
            .unwrap()
            .is_change());
        assert_eq!(handle.snapshot_config().core_pool_size, 1);
    }

    #[test]
    fn test_concurrent_reader_never_sees_core_above_max() {
        let executor = Arc::new(MockExecutor::resizable(1, 2));
        let handle = Arc::new(PoolHandle::new(ThreadPoolConfig::new(ID, 1, 2), executor.clone()).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let handle = Arc::clone(&handle);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observations = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    assert!(handle.snapshot_sizes().is_consistent());
                    let config = handle.snapshot_config();
                    assert!(config.maximum_pool_size >= config.core_pool_size);
                    observations += 1;
                }
                observations
            })
        };

        let steps = [(10, 20), (2, 3), (15, 15), (0, 1), (7, 30), (1, 1)];
        for _ in 0..200 {
            for (core, max) in steps {
                handle.apply_config(ThreadPoolConfig::new(ID, core, max)).unwrap();
            }
        }

        stop.store(true, Ordering::SeqCst);
        let observations = reader.join().expect("reader saw an inconsistent pair");
        assert!(observations > 0);
    }

    #[test]
    fn test_concurrent_applies_are_serialized() {
        let executor = Arc::new(MockExecutor::resizable(1, 2));
        let handle = Arc::new(PoolHandle::new(ThreadPoolConfig::new(ID, 1, 2), executor.clone()).unwrap());

        let candidates: Vec<ThreadPoolConfig> = (1..=16)
            .map(|i| {
                ThreadPoolConfig::new(ID, i, i * 2)
                    .with_keep_alive_seconds(i as u64)
                    .with_queue(QueueType::ResizableLinked, QueueCapacity::Bounded(i * 10))
            })
            .collect();

        let threads: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|config| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.apply_config(config).unwrap())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let final_config = handle.snapshot_config();
        assert!(candidates.contains(&final_config), "torn config: {:?}", final_config);

        // Executor agrees with the snapshot field by field
        let sizes = executor.pool_sizes();
        assert_eq!(sizes.core, final_config.core_pool_size);
        assert_eq!(sizes.max, final_config.maximum_pool_size);
        assert_eq!(executor.keep_alive().as_secs(), final_config.keep_alive_seconds);
        assert_eq!(executor.queue_capacity(), final_config.queue_capacity);
    }

    #[test]
    fn test_report_modes() {
        let handle = handle_with(Arc::new(MockExecutor::resizable(2, 4)));
        assert!(handle.report(ReportMode::ConfigOnly).metrics.is_none());
        assert!(handle.report(ReportMode::WithMetrics).metrics.is_some());
    }
}
