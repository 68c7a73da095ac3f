// Domain Layer - Pool configuration, metrics and alarm models

pub mod alarm;
pub mod diff;
pub mod error;
pub mod identifier;
pub mod metrics;
pub mod pool_config;

// Re-exports
pub use alarm::{AlarmLevel, AlarmReason, AlarmRule, AlarmState, AlarmTransition};
pub use diff::{ConfigDiff, ConfigField};
pub use error::DomainError;
pub use identifier::PoolIdentifier;
pub use metrics::{PoolRuntimeMetrics, PoolSizes, ReportMode, ThreadPoolReport};
pub use pool_config::{DeclaredConfig, QueueCapacity, QueueType, RejectionPolicy, ThreadPoolConfig};
