// Field-level config diff

use super::pool_config::ThreadPoolConfig;
use serde::Serialize;
use std::fmt;

/// One tunable field of a pool config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigField {
    CorePoolSize,
    MaximumPoolSize,
    QueueCapacity,
    KeepAliveSeconds,
    RejectionPolicy,
    QueueType,
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigField::CorePoolSize => "corePoolSize",
            ConfigField::MaximumPoolSize => "maximumPoolSize",
            ConfigField::QueueCapacity => "queueCapacity",
            ConfigField::KeepAliveSeconds => "keepAliveSeconds",
            ConfigField::RejectionPolicy => "rejectionPolicy",
            ConfigField::QueueType => "queueType",
        };
        f.write_str(name)
    }
}

/// Fields that differ between two configs of the same pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDiff {
    fields: Vec<ConfigField>,
}

impl ConfigDiff {
    pub fn between(current: &ThreadPoolConfig, target: &ThreadPoolConfig) -> Self {
        let mut fields = Vec::new();
        if current.core_pool_size != target.core_pool_size {
            fields.push(ConfigField::CorePoolSize);
        }
        if current.maximum_pool_size != target.maximum_pool_size {
            fields.push(ConfigField::MaximumPoolSize);
        }
        if current.queue_capacity != target.queue_capacity {
            fields.push(ConfigField::QueueCapacity);
        }
        if current.keep_alive_seconds != target.keep_alive_seconds {
            fields.push(ConfigField::KeepAliveSeconds);
        }
        if current.rejection_policy != target.rejection_policy {
            fields.push(ConfigField::RejectionPolicy);
        }
        if current.queue_type != target.queue_type {
            fields.push(ConfigField::QueueType);
        }
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: ConfigField) -> bool {
        self.fields.contains(&field)
    }

    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }

    /// Whether applying this diff touches worker sizing
    pub fn touches_sizes(&self) -> bool {
        self.contains(ConfigField::CorePoolSize) || self.contains(ConfigField::MaximumPoolSize)
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.fields.iter().map(|field| field.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueCapacity, QueueType, RejectionPolicy};

    #[test]
    fn test_identical_configs_have_empty_diff() {
        let a = ThreadPoolConfig::new("p", 2, 4);
        let diff = ConfigDiff::between(&a, &a.clone());
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "[]");
    }

    #[test]
    fn test_diff_lists_changed_fields_in_order() {
        let a = ThreadPoolConfig::new("p", 2, 4);
        let b = ThreadPoolConfig::new("p", 3, 4)
            .with_rejection_policy(RejectionPolicy::CallerRuns)
            .with_queue(QueueType::ResizableLinked, QueueCapacity::Bounded(10));

        let diff = ConfigDiff::between(&a, &b);
        assert_eq!(
            diff.fields(),
            &[
                ConfigField::CorePoolSize,
                ConfigField::QueueCapacity,
                ConfigField::RejectionPolicy
            ]
        );
        assert!(diff.touches_sizes());
        assert_eq!(diff.to_string(), "[corePoolSize, queueCapacity, rejectionPolicy]");
    }

    #[test]
    fn test_keep_alive_only_does_not_touch_sizes() {
        let a = ThreadPoolConfig::new("p", 2, 4);
        let b = a.clone().with_keep_alive_seconds(5);
        let diff = ConfigDiff::between(&a, &b);
        assert_eq!(diff.fields(), &[ConfigField::KeepAliveSeconds]);
        assert!(!diff.touches_sizes());
    }
}
