// Thread Pool Configuration Domain Model

use super::error::{DomainError, Result};
use super::identifier::PoolIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a pool does with a task once its queue and workers are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionPolicy {
    /// Fail the submission
    Abort,
    /// Run the task on the submitting thread
    CallerRuns,
    /// Drop the task silently
    Discard,
    /// Drop the oldest queued task and enqueue the new one
    DiscardOldest,
}

impl RejectionPolicy {
    pub const ALL: [RejectionPolicy; 4] = [
        RejectionPolicy::Abort,
        RejectionPolicy::CallerRuns,
        RejectionPolicy::Discard,
        RejectionPolicy::DiscardOldest,
    ];

    /// Stable numeric tag (for atomic storage in executors)
    pub fn as_u8(self) -> u8 {
        match self {
            RejectionPolicy::Abort => 0,
            RejectionPolicy::CallerRuns => 1,
            RejectionPolicy::Discard => 2,
            RejectionPolicy::DiscardOldest => 3,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RejectionPolicy::Abort),
            1 => Some(RejectionPolicy::CallerRuns),
            2 => Some(RejectionPolicy::Discard),
            3 => Some(RejectionPolicy::DiscardOldest),
            _ => None,
        }
    }
}

impl fmt::Display for RejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionPolicy::Abort => write!(f, "ABORT"),
            RejectionPolicy::CallerRuns => write!(f, "CALLER_RUNS"),
            RejectionPolicy::Discard => write!(f, "DISCARD"),
            RejectionPolicy::DiscardOldest => write!(f, "DISCARD_OLDEST"),
        }
    }
}

/// Queue implementation backing a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueType {
    /// Fixed-capacity ring buffer
    Array,
    /// Linked queue, capacity fixed at construction (may be unbounded)
    Linked,
    /// Linked queue whose capacity can be changed while running
    ResizableLinked,
    /// Direct hand-off to an idle worker, no buffering
    Synchronous,
}

impl QueueType {
    /// Whether capacity can be changed on a live pool
    pub fn supports_resize(self) -> bool {
        match self {
            QueueType::ResizableLinked => true,
            QueueType::Array | QueueType::Linked | QueueType::Synchronous => false,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueType::Array => write!(f, "ARRAY"),
            QueueType::Linked => write!(f, "LINKED"),
            QueueType::ResizableLinked => write!(f, "RESIZABLE_LINKED"),
            QueueType::Synchronous => write!(f, "SYNCHRONOUS"),
        }
    }
}

/// Queue capacity; serialized as a number, `null` meaning unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum QueueCapacity {
    Bounded(u32),
    Unbounded,
}

impl QueueCapacity {
    pub fn bound(self) -> Option<u32> {
        match self {
            QueueCapacity::Bounded(n) => Some(n),
            QueueCapacity::Unbounded => None,
        }
    }

    /// Whether `len` queued items leave room for one more
    pub fn has_room(self, len: usize) -> bool {
        match self {
            QueueCapacity::Bounded(n) => len < n as usize,
            QueueCapacity::Unbounded => true,
        }
    }

    pub fn remaining(self, len: usize) -> Option<u64> {
        self.bound()
            .map(|n| (n as u64).saturating_sub(len as u64))
    }
}

impl From<Option<u32>> for QueueCapacity {
    fn from(value: Option<u32>) -> Self {
        value.map_or(QueueCapacity::Unbounded, QueueCapacity::Bounded)
    }
}

impl From<QueueCapacity> for Option<u32> {
    fn from(value: QueueCapacity) -> Self {
        value.bound()
    }
}

impl fmt::Display for QueueCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueCapacity::Bounded(n) => write!(f, "{}", n),
            QueueCapacity::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Live-tunable parameters of one managed pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPoolConfig {
    pub identifier: PoolIdentifier,
    pub core_pool_size: u32,
    pub maximum_pool_size: u32,
    pub queue_capacity: QueueCapacity,
    pub keep_alive_seconds: u64,
    pub rejection_policy: RejectionPolicy,
    pub queue_type: QueueType,
}

impl ThreadPoolConfig {
    /// Create a config with defaults for everything but the sizes
    ///
    /// Defaults: resizable linked queue of 1024, 60s keep-alive, abort policy
    pub fn new(identifier: impl Into<PoolIdentifier>, core_pool_size: u32, maximum_pool_size: u32) -> Self {
        Self {
            identifier: identifier.into(),
            core_pool_size,
            maximum_pool_size,
            queue_capacity: QueueCapacity::Bounded(1024),
            keep_alive_seconds: 60,
            rejection_policy: RejectionPolicy::Abort,
            queue_type: QueueType::ResizableLinked,
        }
    }

    pub fn with_queue(mut self, queue_type: QueueType, capacity: QueueCapacity) -> Self {
        self.queue_type = queue_type;
        self.queue_capacity = capacity;
        self
    }

    pub fn with_rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    pub fn with_keep_alive_seconds(mut self, seconds: u64) -> Self {
        self.keep_alive_seconds = seconds;
        self
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }

    /// Check every invariant a config must hold before it touches a live pool
    pub fn validate(&self) -> Result<()> {
        if self.identifier.as_str().is_empty() {
            return Err(DomainError::InvalidConfig(
                "identifier must not be empty".to_string(),
            ));
        }
        if self.maximum_pool_size == 0 {
            return Err(DomainError::InvalidConfig(format!(
                "{}: maximumPoolSize must be at least 1",
                self.identifier
            )));
        }
        if self.maximum_pool_size < self.core_pool_size {
            return Err(DomainError::InvalidConfig(format!(
                "{}: maximumPoolSize {} < corePoolSize {}",
                self.identifier, self.maximum_pool_size, self.core_pool_size
            )));
        }
        match (self.queue_type, self.queue_capacity) {
            (QueueType::Synchronous, QueueCapacity::Bounded(0)) => {}
            (QueueType::Synchronous, other) => {
                return Err(DomainError::InvalidConfig(format!(
                    "{}: synchronous queue cannot buffer (capacity {})",
                    self.identifier, other
                )));
            }
            (QueueType::Array, QueueCapacity::Unbounded) => {
                return Err(DomainError::InvalidConfig(format!(
                    "{}: array queue requires a bounded capacity",
                    self.identifier
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

/// A config as declared by the registry, with its revision when the registry has one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredConfig {
    #[serde(flatten)]
    pub config: ThreadPoolConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl DeclaredConfig {
    pub fn new(config: ThreadPoolConfig) -> Self {
        Self {
            config,
            revision: None,
        }
    }

    pub fn with_revision(config: ThreadPoolConfig, revision: u64) -> Self {
        Self {
            config,
            revision: Some(revision),
        }
    }
}
