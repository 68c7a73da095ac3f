// Alarm Domain Model

use super::error::{DomainError, Result};
use super::identifier::PoolIdentifier;
use super::metrics::PoolRuntimeMetrics;
use super::pool_config::{QueueCapacity, ThreadPoolConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-pool saturation thresholds
///
/// A percentage `<= 0.0` or a zero delta disables that condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlarmRule {
    /// queueSize / queueCapacity at or above this raises a warning (0.0 - 1.0)
    pub queue_usage_warn_pct: f64,
    /// activeCount / maximumPoolSize at or above this raises a warning (0.0 - 1.0)
    pub active_usage_warn_pct: f64,
    /// Rejected-count increase between two samples that raises a warning
    pub rejection_alarm_delta: u64,
    /// Consecutive clean samples needed to clear a warning
    pub clear_after_samples: u32,
}

impl Default for AlarmRule {
    fn default() -> Self {
        Self {
            queue_usage_warn_pct: 0.8,
            active_usage_warn_pct: 0.9,
            rejection_alarm_delta: 1,
            clear_after_samples: 1,
        }
    }
}

impl AlarmRule {
    pub fn validate(&self) -> Result<()> {
        let pct_ok = |v: f64| v.is_finite() && v <= 1.0;
        if !pct_ok(self.queue_usage_warn_pct) || !pct_ok(self.active_usage_warn_pct) {
            return Err(DomainError::InvalidAlarmRule(format!(
                "usage thresholds must be finite and <= 1.0 (queue {}, active {})",
                self.queue_usage_warn_pct, self.active_usage_warn_pct
            )));
        }
        if self.clear_after_samples == 0 {
            return Err(DomainError::InvalidAlarmRule(
                "clearAfterSamples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Conditions that fire for one sample
    ///
    /// `rejected_delta` is the increase since the previous sample, `None` on
    /// the first sample of a pool.
    pub fn evaluate(
        &self,
        config: &ThreadPoolConfig,
        metrics: &PoolRuntimeMetrics,
        rejected_delta: Option<u64>,
    ) -> Vec<AlarmReason> {
        let mut reasons = Vec::new();

        if self.queue_usage_warn_pct > 0.0 {
            // Unbounded and zero-capacity queues have no usage ratio
            if let QueueCapacity::Bounded(capacity) = config.queue_capacity {
                if capacity > 0 {
                    let usage = metrics.queue_size as f64 / capacity as f64;
                    if usage >= self.queue_usage_warn_pct {
                        reasons.push(AlarmReason::QueueUsage {
                            usage,
                            threshold: self.queue_usage_warn_pct,
                        });
                    }
                }
            }
        }

        if self.active_usage_warn_pct > 0.0 && config.maximum_pool_size > 0 {
            let usage = metrics.active_count as f64 / config.maximum_pool_size as f64;
            if usage >= self.active_usage_warn_pct {
                reasons.push(AlarmReason::ActiveUsage {
                    usage,
                    threshold: self.active_usage_warn_pct,
                });
            }
        }

        if self.rejection_alarm_delta > 0 {
            if let Some(delta) = rejected_delta {
                if delta >= self.rejection_alarm_delta {
                    reasons.push(AlarmReason::Rejections {
                        delta,
                        threshold: self.rejection_alarm_delta,
                    });
                }
            }
        }

        reasons
    }
}

/// Alarm level of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmLevel {
    Normal,
    Warning,
}

impl fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmLevel::Normal => write!(f, "NORMAL"),
            AlarmLevel::Warning => write!(f, "WARNING"),
        }
    }
}

/// Current alarm state of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmState {
    pub level: AlarmLevel,
    /// Epoch ms of the last transition (or of the first sample)
    pub since: i64,
}

/// Why a sample counted as saturated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlarmReason {
    QueueUsage { usage: f64, threshold: f64 },
    ActiveUsage { usage: f64, threshold: f64 },
    Rejections { delta: u64, threshold: u64 },
}

impl fmt::Display for AlarmReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmReason::QueueUsage { usage, threshold } => {
                write!(f, "queue usage {:.2} >= {:.2}", usage, threshold)
            }
            AlarmReason::ActiveUsage { usage, threshold } => {
                write!(f, "active usage {:.2} >= {:.2}", usage, threshold)
            }
            AlarmReason::Rejections { delta, threshold } => {
                write!(f, "{} rejections since last sample (threshold {})", delta, threshold)
            }
        }
    }
}

/// Event delivered to the notification collaborator on every level change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmTransition {
    pub event_id: String,
    pub identifier: PoolIdentifier,
    pub previous: AlarmLevel,
    pub current: AlarmLevel,
    pub metrics: PoolRuntimeMetrics,
    /// Conditions that fired (empty when clearing)
    pub reasons: Vec<AlarmReason>,
    pub timestamp: i64,
}
