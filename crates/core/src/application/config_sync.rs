//! ConfigSyncEngine - reconciles local pools with registry-declared configs
//!
//! Two inputs feed one apply path:
//! - poll: every tick, fetch the declared config of each locally registered
//!   pool (the store is the only enumeration source)
//! - push: configs delivered through a `ConfigPushSender`, applied one at a
//!   time per pool in arrival order
//!
//! Per pool: Idle -> Fetching -> Diffing -> Applying -> Idle. Fetch and
//! report I/O happen outside the pool's critical section; only the
//! already-fetched config is applied inside it. A failure on one pool is
//! logged and counted, never propagated to the loop or to other pools.

use crate::application::constants::{DEFAULT_PUSH_CHANNEL_CAPACITY, DEFAULT_SYNC_INTERVAL, SHUTDOWN_DRAIN_TIMEOUT};
use crate::application::pool_handle::{ApplyOutcome, PoolHandle};
use crate::application::pool_store::PoolRegistryStore;
use crate::application::reporter::RegistryReporter;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{ConfigDiff, DeclaredConfig, PoolIdentifier};
use crate::error::AppError;
use crate::port::{RegistryClient, RegistryError};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where a pool currently is in the sync state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Diffing,
    Applying,
}

impl SyncPhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SyncPhase::Idle => 0,
            SyncPhase::Fetching => 1,
            SyncPhase::Diffing => 2,
            SyncPhase::Applying => 3,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Self {
        match tag {
            1 => SyncPhase::Fetching,
            2 => SyncPhase::Diffing,
            3 => SyncPhase::Applying,
            _ => SyncPhase::Idle,
        }
    }
}

/// A config delivered by the registry's push path
#[derive(Debug, Clone)]
pub struct PushedConfig {
    pub identifier: PoolIdentifier,
    pub declared: DeclaredConfig,
}

/// Inbound side of the registry push callback
#[derive(Clone)]
pub struct ConfigPushSender {
    tx: mpsc::Sender<PushedConfig>,
}

impl ConfigPushSender {
    /// Hand a pushed config to the sync engine without blocking
    ///
    /// Returns false if the push was dropped (engine gone or channel full);
    /// the next poll reconciles the pool anyway.
    pub fn on_config_pushed(&self, identifier: PoolIdentifier, declared: DeclaredConfig) -> bool {
        match self.tx.try_send(PushedConfig {
            identifier,
            declared,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(push)) => {
                warn!(pool = %push.identifier, "Push channel full, dropping pushed config");
                false
            }
            Err(mpsc::error::TrySendError::Closed(push)) => {
                debug!(pool = %push.identifier, "Sync engine stopped, dropping pushed config");
                false
            }
        }
    }
}

/// Engine side of the push channel
pub struct ConfigPushReceiver {
    rx: mpsc::Receiver<PushedConfig>,
}

impl ConfigPushReceiver {
    pub async fn recv(&mut self) -> Option<PushedConfig> {
        self.rx.recv().await
    }
}

/// Create a push channel
pub fn push_channel(capacity: usize) -> (ConfigPushSender, ConfigPushReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConfigPushSender { tx }, ConfigPushReceiver { rx })
}

/// Push channel with the default capacity
pub fn default_push_channel() -> (ConfigPushSender, ConfigPushReceiver) {
    push_channel(DEFAULT_PUSH_CHANNEL_CAPACITY)
}

/// Per-pool FIFO of pushes waiting behind that pool's in-flight apply
#[derive(Debug, Default)]
struct PushLanes {
    lanes: HashMap<PoolIdentifier, VecDeque<PushedConfig>>,
}

impl PushLanes {
    /// Queue `push` behind its pool's in-flight apply, or hand it back to be
    /// started now when the pool has none
    fn admit(&mut self, push: PushedConfig) -> Option<PushedConfig> {
        match self.lanes.get_mut(&push.identifier) {
            Some(waiting) => {
                waiting.push_back(push);
                None
            }
            None => {
                self.lanes.insert(push.identifier.clone(), VecDeque::new());
                Some(push)
            }
        }
    }

    /// The in-flight apply for `identifier` finished; next push to start
    fn finish(&mut self, identifier: &PoolIdentifier) -> Option<PushedConfig> {
        let next = self.lanes.get_mut(identifier).and_then(VecDeque::pop_front);
        if next.is_none() {
            self.lanes.remove(identifier);
        }
        next
    }

    fn waiting(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }
}

/// What one sync attempt did to one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    Applied,
    Partial,
    Stale,
    /// Declared config failed validation; previous config kept
    Rejected,
    /// Executor refused the change; previous config kept
    ApplyFailed,
    /// Transport error; last-known-good kept until the next tick
    FetchFailed,
    /// Registry declares nothing for the pool
    NotDeclared,
    /// Push for an identifier this process does not manage
    UnknownPool,
}

/// Per-cycle tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub partial: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub rejected: usize,
    pub apply_failed: usize,
    pub fetch_failed: usize,
    pub not_declared: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Applied => self.applied += 1,
            SyncOutcome::Partial => self.partial += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Stale => self.stale += 1,
            SyncOutcome::Rejected => self.rejected += 1,
            SyncOutcome::ApplyFailed => self.apply_failed += 1,
            SyncOutcome::FetchFailed => self.fetch_failed += 1,
            SyncOutcome::NotDeclared | SyncOutcome::UnknownPool => self.not_declared += 1,
        }
    }

    /// Pools whose live config changed this cycle
    pub fn changed(&self) -> usize {
        self.applied + self.partial
    }

    pub fn failures(&self) -> usize {
        self.rejected + self.apply_failed + self.fetch_failed
    }
}

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Poll interval
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

pub struct ConfigSyncEngine {
    store: Arc<PoolRegistryStore>,
    registry: Arc<dyn RegistryClient>,
    reporter: Arc<RegistryReporter>,
    config: SyncConfig,
}

impl ConfigSyncEngine {
    pub fn new(
        store: Arc<PoolRegistryStore>,
        registry: Arc<dyn RegistryClient>,
        reporter: Arc<RegistryReporter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            registry,
            reporter,
            config,
        }
    }

    /// One poll cycle over every registered pool, pools in parallel
    pub async fn sync_once(&self) -> SyncReport {
        let pools = self.store.list_all();
        let outcomes = join_all(pools.iter().map(|handle| self.sync_pool(handle))).await;

        let mut report = SyncReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }

        if report.changed() > 0 || report.failures() > 0 {
            info!(
                pools = pools.len(),
                applied = report.applied,
                partial = report.partial,
                rejected = report.rejected,
                apply_failed = report.apply_failed,
                fetch_failed = report.fetch_failed,
                "Config sync cycle finished"
            );
        } else {
            debug!(pools = pools.len(), "Config sync cycle finished, no drift");
        }
        report
    }

    /// Fetch and reconcile one pool
    pub async fn sync_pool(&self, handle: &PoolHandle) -> SyncOutcome {
        handle.set_sync_phase(SyncPhase::Fetching);

        let declared = match self.registry.fetch_config(handle.identifier()).await {
            Ok(declared) => declared,
            Err(RegistryError::NotFound(_)) => {
                debug!(pool = %handle.identifier(), "No declared config in registry");
                handle.set_sync_phase(SyncPhase::Idle);
                return SyncOutcome::NotDeclared;
            }
            Err(e) => {
                warn!(
                    pool = %handle.identifier(),
                    error = %e,
                    "Config fetch failed, keeping last-known-good config"
                );
                handle.set_sync_phase(SyncPhase::Idle);
                return SyncOutcome::FetchFailed;
            }
        };

        self.reconcile(handle, declared).await
    }

    /// Feed one pushed config into the apply path
    pub async fn apply_pushed(&self, push: PushedConfig) -> SyncOutcome {
        let Some(handle) = self.store.get(&push.identifier) else {
            warn!(pool = %push.identifier, "Ignoring pushed config for unknown pool");
            return SyncOutcome::UnknownPool;
        };
        debug!(pool = %push.identifier, revision = ?push.declared.revision, "Config pushed");
        self.reconcile(&handle, push.declared).await
    }

    async fn reconcile(&self, handle: &PoolHandle, declared: DeclaredConfig) -> SyncOutcome {
        handle.set_sync_phase(SyncPhase::Diffing);
        let diff = ConfigDiff::between(&handle.declared_config(), &declared.config);
        if diff.is_empty() && declared.revision.is_none() {
            handle.set_sync_phase(SyncPhase::Idle);
            return SyncOutcome::Unchanged;
        }

        handle.set_sync_phase(SyncPhase::Applying);
        let result = handle.apply_declared(&declared);
        handle.set_sync_phase(SyncPhase::Idle);

        let (outcome, applied) = match result {
            Ok(ApplyOutcome::Unchanged) => return SyncOutcome::Unchanged,
            Ok(ApplyOutcome::Stale { .. }) => return SyncOutcome::Stale,
            Ok(ApplyOutcome::Applied { effective, .. }) => (SyncOutcome::Applied, effective),
            Ok(ApplyOutcome::Partial { effective, .. }) => (SyncOutcome::Partial, effective),
            Err(e @ AppError::Domain(_)) => {
                warn!(
                    pool = %handle.identifier(),
                    error = %e,
                    "Rejected declared config, previous config stays in effect"
                );
                return SyncOutcome::Rejected;
            }
            Err(e) => {
                error!(
                    pool = %handle.identifier(),
                    error = %e,
                    "Applying declared config failed, previous config stays in effect"
                );
                return SyncOutcome::ApplyFailed;
            }
        };

        // Failure is logged by the reporter and never rolls the change back
        let _ = self.reporter.report_changed(handle, applied).await;
        outcome
    }

    fn spawn_push(self: &Arc<Self>, in_flight: &mut JoinSet<PoolIdentifier>, push: PushedConfig) {
        let engine = Arc::clone(self);
        in_flight.spawn(async move {
            let identifier = push.identifier.clone();
            if AssertUnwindSafe(engine.apply_pushed(push)).catch_unwind().await.is_err() {
                error!(pool = %identifier, "Applying pushed config panicked");
            }
            identifier
        });
    }

    /// Sync loop: poll on every tick, apply pushes as they arrive
    ///
    /// Pushes for one pool are applied and reported one at a time, in the
    /// order they arrived; pushes for different pools run in parallel. On
    /// shutdown no new work is started, queued pushes are dropped (the next
    /// start polls anyway) and in-flight work gets `SHUTDOWN_DRAIN_TIMEOUT`.
    pub async fn run(self: Arc<Self>, mut pushes: ConfigPushReceiver, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Config sync engine started"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycle: Option<JoinHandle<SyncReport>> = None;
        let mut in_flight: JoinSet<PoolIdentifier> = JoinSet::new();
        let mut lanes = PushLanes::default();
        let mut pushes_open = true;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if cycle.as_ref().is_some_and(|c| !c.is_finished()) {
                        debug!("Previous sync cycle still running, skipping tick");
                        continue;
                    }
                    let engine = Arc::clone(&self);
                    cycle = Some(tokio::spawn(async move { engine.sync_once().await }));
                }
                push = pushes.recv(), if pushes_open => match push {
                    Some(push) => {
                        if let Some(push) = lanes.admit(push) {
                            self.spawn_push(&mut in_flight, push);
                        }
                    }
                    None => {
                        debug!("Push channel closed, continuing with polling only");
                        pushes_open = false;
                    }
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => match done {
                    Ok(identifier) => {
                        if let Some(next) = lanes.finish(&identifier) {
                            self.spawn_push(&mut in_flight, next);
                        }
                    }
                    Err(e) => error!(error = %e, "Push apply task failed"),
                },
                _ = shutdown.wait() => break,
            }
        }

        info!("Config sync engine stopping, draining in-flight work");
        let queued = lanes.waiting();
        if queued > 0 {
            info!(pushes = queued, "Dropping queued pushes at shutdown");
        }
        // Applies are synchronous inside their task, so an abort after the
        // timeout can only land between applies, never inside one.
        let drain = async {
            if let Some(cycle) = cycle {
                let _ = cycle.await;
            }
            while in_flight.join_next().await.is_some() {}
        };
        if timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("In-flight sync work did not finish before the drain timeout");
        }

        info!("Config sync engine stopped");
    }
}
