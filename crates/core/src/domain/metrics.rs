// Runtime metrics and report records

use super::pool_config::ThreadPoolConfig;
use serde::{Deserialize, Serialize};

/// Consistent (core, max) pair read from a live pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub core: u32,
    pub max: u32,
}

impl PoolSizes {
    pub fn new(core: u32, max: u32) -> Self {
        Self { core, max }
    }

    pub fn is_consistent(&self) -> bool {
        self.max >= self.core
    }

    /// Pack into one word so both halves can be swapped atomically
    pub fn pack(self) -> u64 {
        ((self.core as u64) << 32) | self.max as u64
    }

    pub fn unpack(word: u64) -> Self {
        Self {
            core: (word >> 32) as u32,
            max: word as u32,
        }
    }
}

/// Read-only snapshot of a pool's runtime counters (never persisted)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRuntimeMetrics {
    pub active_count: u64,
    pub pool_size: u64,
    pub largest_pool_size: u64,
    pub queue_size: u64,
    /// `None` for unbounded queues
    pub queue_remaining_capacity: Option<u64>,
    pub completed_task_count: u64,
    /// Monotonic since pool creation
    pub rejected_count: u64,
}

/// Whether reports carry runtime metrics next to the config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    ConfigOnly,
    #[default]
    WithMetrics,
}

/// Record submitted to the registry for one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPoolReport {
    #[serde(flatten)]
    pub config: ThreadPoolConfig,
    #[serde(flatten)]
    pub metrics: Option<PoolRuntimeMetrics>,
}

impl ThreadPoolReport {
    pub fn config_only(config: ThreadPoolConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(config: ThreadPoolConfig, metrics: PoolRuntimeMetrics) -> Self {
        Self {
            config,
            metrics: Some(metrics),
        }
    }
}
