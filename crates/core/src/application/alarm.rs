//! AlarmEngine - samples pool metrics and tracks Normal/Warning per pool
//!
//! Only level changes produce events. A pool enters Warning on the first
//! sample where any rule condition fires and leaves it after
//! `clear_after_samples` consecutive clean samples.

use crate::application::constants::DEFAULT_ALARM_INTERVAL;
use crate::application::pool_store::PoolRegistryStore;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{AlarmLevel, AlarmRule, AlarmState, AlarmTransition, PoolIdentifier};
use crate::error::Result;
use crate::port::{AlarmNotifier, IdProvider, TimeProvider};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Alarm engine configuration
#[derive(Debug, Clone)]
pub struct AlarmConfig {
    /// Sampling interval
    pub interval: Duration,
    /// Rule for pools without an override
    pub default_rule: AlarmRule,
    /// Per-pool overrides
    pub rules: HashMap<PoolIdentifier, AlarmRule>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ALARM_INTERVAL,
            default_rule: AlarmRule::default(),
            rules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PoolAlarm {
    state: AlarmState,
    /// rejectedCount of the previous sample
    last_rejected: Option<u64>,
    clean_samples: u32,
}

pub struct AlarmEngine {
    store: Arc<PoolRegistryStore>,
    notifier: Arc<dyn AlarmNotifier>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    interval: Duration,
    default_rule: AlarmRule,
    rules: RwLock<HashMap<PoolIdentifier, AlarmRule>>,
    states: Mutex<HashMap<PoolIdentifier, PoolAlarm>>,
}

impl AlarmEngine {
    /// # Errors
    /// - InvalidAlarmRule if the default rule or any override is invalid
    pub fn new(
        store: Arc<PoolRegistryStore>,
        notifier: Arc<dyn AlarmNotifier>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: AlarmConfig,
    ) -> Result<Self> {
        config.default_rule.validate()?;
        for rule in config.rules.values() {
            rule.validate()?;
        }

        Ok(Self {
            store,
            notifier,
            time_provider,
            id_provider,
            interval: config.interval,
            default_rule: config.default_rule,
            rules: RwLock::new(config.rules),
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Override the rule of one pool (takes effect on the next sample)
    pub fn set_rule(&self, identifier: PoolIdentifier, rule: AlarmRule) -> Result<()> {
        rule.validate()?;
        self.rules.write().insert(identifier, rule);
        Ok(())
    }

    pub fn rule_for(&self, identifier: &PoolIdentifier) -> AlarmRule {
        self.rules
            .read()
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| self.default_rule.clone())
    }

    /// Current alarm state, `None` before the pool's first sample
    pub fn state(&self, identifier: &PoolIdentifier) -> Option<AlarmState> {
        self.states
            .lock()
            .get(identifier)
            .map(|alarm| alarm.state)
    }

    /// Sample every registered pool once and deliver the transitions
    ///
    /// Notifier failures are logged; the state change stands either way.
    pub async fn evaluate_once(&self) -> Vec<AlarmTransition> {
        let transitions = self.sample();

        for transition in &transitions {
            if let Err(e) = self.notifier.on_alarm_transition(transition.clone()).await {
                error!(
                    pool = %transition.identifier,
                    event_id = %transition.event_id,
                    error = %e,
                    "Alarm notification failed"
                );
            }
        }

        transitions
    }

    fn sample(&self) -> Vec<AlarmTransition> {
        let now = self.time_provider.now_millis();
        let pools = self.store.list_all();
        let mut transitions = Vec::new();

        let mut states = self.states.lock();
        // Forget pools that were unregistered
        states.retain(|id, _| pools.identifiers().any(|known| known == id));

        for handle in &pools {
            let identifier = handle.identifier();
            let metrics = handle.snapshot_metrics();
            let config = handle.snapshot_config();
            let rule = self.rule_for(identifier);

            let alarm = states.entry(identifier.clone()).or_insert_with(|| PoolAlarm {
                state: AlarmState {
                    level: AlarmLevel::Normal,
                    since: now,
                },
                last_rejected: None,
                clean_samples: 0,
            });

            let rejected_delta = alarm
                .last_rejected
                .map(|previous| metrics.rejected_count.saturating_sub(previous));
            alarm.last_rejected = Some(metrics.rejected_count);

            let reasons = rule.evaluate(&config, &metrics, rejected_delta);
            let previous = alarm.state.level;

            let next = match (previous, reasons.is_empty()) {
                (AlarmLevel::Normal, false) => Some(AlarmLevel::Warning),
                (AlarmLevel::Normal, true) => None,
                (AlarmLevel::Warning, false) => {
                    alarm.clean_samples = 0;
                    None
                }
                (AlarmLevel::Warning, true) => {
                    alarm.clean_samples += 1;
                    (alarm.clean_samples >= rule.clear_after_samples).then_some(AlarmLevel::Normal)
                }
            };

            let Some(current) = next else {
                continue;
            };

            alarm.state = AlarmState {
                level: current,
                since: now,
            };
            alarm.clean_samples = 0;

            match current {
                AlarmLevel::Warning => warn!(
                    pool = %identifier,
                    active = metrics.active_count,
                    queue_size = metrics.queue_size,
                    rejected = metrics.rejected_count,
                    reasons = ?reasons,
                    "Pool saturation alarm raised"
                ),
                AlarmLevel::Normal => info!(pool = %identifier, "Pool saturation alarm cleared"),
            }

            transitions.push(AlarmTransition {
                event_id: self.id_provider.generate_id(),
                identifier: identifier.clone(),
                previous,
                current,
                metrics,
                reasons,
                timestamp: now,
            });
        }

        transitions
    }

    /// Sampling loop (spawn in tokio::spawn)
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Alarm engine started");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let transitions = self.evaluate_once().await;
                    if !transitions.is_empty() {
                        debug!(count = transitions.len(), "Alarm transitions delivered");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Alarm engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PoolRuntimeMetrics, QueueCapacity, QueueType, ThreadPoolConfig};
    use crate::port::alarm_notifier::mocks::RecordingNotifier;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::managed_executor::mocks::MockExecutor;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    const ID: &str = "app:alarmed";

    struct Fixture {
        executor: Arc<MockExecutor>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualTimeProvider>,
        engine: AlarmEngine,
    }

    fn fixture(rule: AlarmRule) -> Fixture {
        let store = Arc::new(PoolRegistryStore::new());
        let executor = Arc::new(MockExecutor::resizable(2, 10));
        store
            .register(
                ThreadPoolConfig::new(ID, 2, 10).with_queue(QueueType::ResizableLinked, QueueCapacity::Bounded(100)),
                executor.clone(),
            )
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let engine = AlarmEngine::new(
            store,
            notifier.clone(),
            clock.clone(),
            Arc::new(SequentialIdProvider::default()),
            AlarmConfig {
                default_rule: rule,
                ..Default::default()
            },
        )
        .unwrap();

        Fixture {
            executor,
            notifier,
            clock,
            engine,
        }
    }

    fn queue_only_rule() -> AlarmRule {
        AlarmRule {
            queue_usage_warn_pct: 0.8,
            active_usage_warn_pct: 0.0,
            rejection_alarm_delta: 0,
            clear_after_samples: 1,
        }
    }

    fn queued(size: u64) -> PoolRuntimeMetrics {
        PoolRuntimeMetrics {
            queue_size: size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_queue_usage_sequence_emits_two_transitions() {
        let f = fixture(queue_only_rule());
        let mut per_tick = Vec::new();

        for size in [50, 85, 85, 50] {
            f.executor.set_metrics(queued(size));
            per_tick.push(f.engine.evaluate_once().await);
            f.clock.advance(5_000);
        }

        assert!(per_tick[0].is_empty());
        assert_eq!(per_tick[1].len(), 1);
        assert!(per_tick[2].is_empty());
        assert_eq!(per_tick[3].len(), 1);

        let events = f.notifier.events();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].previous, events[0].current), (AlarmLevel::Normal, AlarmLevel::Warning));
        assert_eq!(events[0].timestamp, 6_000);
        assert_eq!(events[0].metrics.queue_size, 85);
        assert_eq!((events[1].previous, events[1].current), (AlarmLevel::Warning, AlarmLevel::Normal));
        assert_eq!(events[1].timestamp, 16_000);
        assert!(events[1].reasons.is_empty());
        assert_eq!(events[0].event_id, "evt-1");
        assert_eq!(events[1].event_id, "evt-2");
    }

    #[tokio::test]
    async fn test_clear_debounce() {
        let f = fixture(AlarmRule {
            clear_after_samples: 3,
            ..queue_only_rule()
        });

        // Warning, then clean/dirty/clean/clean/clean
        for size in [90, 10, 90, 10, 10] {
            f.executor.set_metrics(queued(size));
            f.engine.evaluate_once().await;
        }
        assert_eq!(f.engine.state(&ID.into()).unwrap().level, AlarmLevel::Warning);

        f.executor.set_metrics(queued(10));
        let transitions = f.engine.evaluate_once().await;
        assert_eq!(transitions.len(), 1);
        assert_eq!(f.engine.state(&ID.into()).unwrap().level, AlarmLevel::Normal);
        assert_eq!(f.notifier.events().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_delta_between_samples() {
        let f = fixture(AlarmRule {
            queue_usage_warn_pct: 0.0,
            active_usage_warn_pct: 0.0,
            rejection_alarm_delta: 5,
            clear_after_samples: 1,
        });
        let rejected = |count| PoolRuntimeMetrics {
            rejected_count: count,
            ..Default::default()
        };

        // Large absolute count on the first sample is not a delta
        f.executor.set_metrics(rejected(100));
        assert!(f.engine.evaluate_once().await.is_empty());

        f.executor.set_metrics(rejected(103));
        assert!(f.engine.evaluate_once().await.is_empty());

        f.executor.set_metrics(rejected(108));
        let transitions = f.engine.evaluate_once().await;
        assert_eq!(transitions.len(), 1);
        assert!(matches!(
            transitions[0].reasons[..],
            [crate::domain::AlarmReason::Rejections { delta: 5, threshold: 5 }]
        ));

        // No new rejections: clears
        assert_eq!(f.engine.evaluate_once().await.len(), 1);
    }

    #[tokio::test]
    async fn test_active_usage_against_maximum_pool_size() {
        let f = fixture(AlarmRule::default());
        f.executor.set_metrics(PoolRuntimeMetrics {
            active_count: 9,
            pool_size: 9,
            ..Default::default()
        });
        let transitions = f.engine.evaluate_once().await;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].current, AlarmLevel::Warning);
    }

    #[tokio::test]
    async fn test_per_pool_rule_override() {
        let f = fixture(queue_only_rule());
        f.engine
            .set_rule(
                ID.into(),
                AlarmRule {
                    queue_usage_warn_pct: 0.95,
                    ..queue_only_rule()
                },
            )
            .unwrap();

        f.executor.set_metrics(queued(90));
        assert!(f.engine.evaluate_once().await.is_empty());
        f.executor.set_metrics(queued(96));
        assert_eq!(f.engine.evaluate_once().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected() {
        let f = fixture(queue_only_rule());
        let err = f
            .engine
            .set_rule(
                ID.into(),
                AlarmRule {
                    clear_after_samples: 0,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::AppError::Domain(_)));
    }

    #[tokio::test]
    async fn test_notifier_failure_keeps_state() {
        let f = fixture(queue_only_rule());
        f.notifier.set_failing(true);

        f.executor.set_metrics(queued(99));
        assert_eq!(f.engine.evaluate_once().await.len(), 1);
        assert_eq!(f.engine.state(&ID.into()).unwrap().level, AlarmLevel::Warning);

        // Still Warning: no duplicate event on the next saturated sample
        assert!(f.engine.evaluate_once().await.is_empty());
        assert_eq!(f.notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn test_state_unknown_before_first_sample() {
        let f = fixture(queue_only_rule());
        assert!(f.engine.state(&ID.into()).is_none());
        f.engine.evaluate_once().await;
        let state = f.engine.state(&ID.into()).unwrap();
        assert_eq!(state.level, AlarmLevel::Normal);
        assert_eq!(state.since, 1_000);
    }
}
