//! Daemon configuration
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. TOML file at `$DYNPOOL_CONFIG` (default `~/.dynpool/daemon.toml`), optional
//! 3. `DYNPOOL__*` environment variables, `__` separating nested keys
//!    (e.g. `DYNPOOL__SYNC_INTERVAL_MS=2000`, `DYNPOOL__REGISTRY__KIND=memory`)

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use dynpool_core::application::{AlarmConfig, ReporterConfig, SyncConfig};
use dynpool_core::domain::{
    AlarmRule, PoolIdentifier, QueueCapacity, QueueType, RejectionPolicy, ReportMode, ThreadPoolConfig,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "~/.dynpool/daemon.toml";
const DEFAULT_REGISTRY_PATH: &str = "~/.dynpool/pools.json";
const DEFAULT_REPORT_PATH: &str = "~/.dynpool/report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// JSON file re-read on every sync tick
    #[default]
    File,
    /// In-process registry seeded with the configured pools
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub kind: RegistryKind,
    pub config_path: String,
    pub report_path: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            kind: RegistryKind::File,
            config_path: DEFAULT_REGISTRY_PATH.to_string(),
            report_path: DEFAULT_REPORT_PATH.to_string(),
        }
    }
}

/// Alarm thresholds as written in the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlarmSettings {
    pub queue_usage_warn_pct: f64,
    pub active_usage_warn_pct: f64,
    pub rejection_alarm_delta: u64,
    pub clear_after_samples: u32,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        let rule = AlarmRule::default();
        Self {
            queue_usage_warn_pct: rule.queue_usage_warn_pct,
            active_usage_warn_pct: rule.active_usage_warn_pct,
            rejection_alarm_delta: rule.rejection_alarm_delta,
            clear_after_samples: rule.clear_after_samples,
        }
    }
}

impl AlarmSettings {
    pub fn rule(&self) -> AlarmRule {
        AlarmRule {
            queue_usage_warn_pct: self.queue_usage_warn_pct,
            active_usage_warn_pct: self.active_usage_warn_pct,
            rejection_alarm_delta: self.rejection_alarm_delta,
            clear_after_samples: self.clear_after_samples,
        }
    }
}

fn default_queue_capacity() -> u32 {
    1024
}

fn default_keep_alive_seconds() -> u64 {
    60
}

fn default_rejection_policy() -> RejectionPolicy {
    RejectionPolicy::Abort
}

fn default_queue_type() -> QueueType {
    QueueType::ResizableLinked
}

/// One pool hosted by the daemon, with its initial config
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    /// Prefix of the identifier (`app:name`)
    #[serde(default)]
    pub app: Option<String>,
    pub name: String,
    pub core_pool_size: u32,
    pub maximum_pool_size: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: u32,
    /// Ignore `queue_capacity` and never bound the queue
    #[serde(default)]
    pub unbounded_queue: bool,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_rejection_policy")]
    pub rejection_policy: RejectionPolicy,
    #[serde(default = "default_queue_type")]
    pub queue_type: QueueType,
    /// Overrides the daemon-wide alarm thresholds for this pool
    #[serde(default)]
    pub alarm: Option<AlarmSettings>,
}

impl PoolSettings {
    pub fn identifier(&self) -> PoolIdentifier {
        match &self.app {
            Some(app) => PoolIdentifier::for_app(app, &self.name),
            None => PoolIdentifier::new(self.name.as_str()),
        }
    }

    pub fn to_config(&self) -> ThreadPoolConfig {
        let capacity = if self.unbounded_queue {
            QueueCapacity::Unbounded
        } else {
            QueueCapacity::Bounded(self.queue_capacity)
        };
        ThreadPoolConfig::new(self.identifier(), self.core_pool_size, self.maximum_pool_size)
            .with_queue(self.queue_type, capacity)
            .with_keep_alive_seconds(self.keep_alive_seconds)
            .with_rejection_policy(self.rejection_policy)
    }
}

/// Upper bound for `load.tasks_per_second`; keeps the submit tick above zero
pub const MAX_LOAD_TASKS_PER_SECOND: u32 = 10_000;

/// Synthetic workload fed into every hosted pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadSettings {
    pub enabled: bool,
    pub tasks_per_second: u32,
    pub task_millis: u64,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            tasks_per_second: 20,
            task_millis: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log_format: LogFormat,
    /// Daily rolling JSON log files go here when set
    pub log_dir: Option<String>,
    pub sync_interval_ms: u64,
    pub report_interval_ms: u64,
    pub alarm_interval_ms: u64,
    pub report_mode: ReportMode,
    pub push_channel_capacity: usize,
    /// How long pools get to drain on shutdown
    pub shutdown_timeout_ms: u64,
    pub registry: RegistrySettings,
    pub alarm: AlarmSettings,
    pub pools: Vec<PoolSettings>,
    pub load: LoadSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        let report = ReporterConfig::default();
        let alarm = AlarmConfig::default();
        Self {
            log_format: LogFormat::Pretty,
            log_dir: None,
            sync_interval_ms: sync.interval.as_millis() as u64,
            report_interval_ms: report.interval.as_millis() as u64,
            alarm_interval_ms: alarm.interval.as_millis() as u64,
            report_mode: report.mode,
            push_channel_capacity: dynpool_core::application::constants::DEFAULT_PUSH_CHANNEL_CAPACITY,
            shutdown_timeout_ms: 10_000,
            registry: RegistrySettings::default(),
            alarm: AlarmSettings::default(),
            pools: Vec::new(),
            load: LoadSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `$DYNPOOL_CONFIG` (or the default path) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("DYNPOOL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&expand(&path))
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config: DaemonConfig = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("DYNPOOL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read daemon config from {}", path))?
            .try_deserialize()
            .context("Invalid daemon config")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, ms) in [
            ("sync_interval_ms", self.sync_interval_ms),
            ("report_interval_ms", self.report_interval_ms),
            ("alarm_interval_ms", self.alarm_interval_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        if !(1..=MAX_LOAD_TASKS_PER_SECOND).contains(&self.load.tasks_per_second) {
            anyhow::bail!(
                "load.tasks_per_second must be between 1 and {}, got {}",
                MAX_LOAD_TASKS_PER_SECOND,
                self.load.tasks_per_second
            );
        }
        self.alarm
            .rule()
            .validate()
            .context("Invalid default alarm thresholds")?;
        for pool in &self.pools {
            pool.to_config()
                .validate()
                .with_context(|| format!("Invalid initial config for pool {}", pool.identifier()))?;
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_millis(self.sync_interval_ms),
        }
    }

    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            interval: Duration::from_millis(self.report_interval_ms),
            mode: self.report_mode,
        }
    }

    pub fn alarm_config(&self) -> AlarmConfig {
        let rules: HashMap<PoolIdentifier, AlarmRule> = self
            .pools
            .iter()
            .filter_map(|pool| pool.alarm.as_ref().map(|alarm| (pool.identifier(), alarm.rule())))
            .collect();
        AlarmConfig {
            interval: Duration::from_millis(self.alarm_interval_ms),
            default_rule: self.alarm.rule(),
            rules,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Expand `~` and `$VAR` in a configured path
pub fn expand(path: &str) -> String {
    shellexpand::full(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
log_format = "json"
sync_interval_ms = 2000
report_mode = "config_only"

[registry]
kind = "memory"

[alarm]
queue_usage_warn_pct = 0.75
clear_after_samples = 2

[[pools]]
app = "orders"
name = "io"
core_pool_size = 4
maximum_pool_size = 16
queue_capacity = 256
rejection_policy = "CALLER_RUNS"

[[pools]]
name = "batch"
core_pool_size = 1
maximum_pool_size = 2
queue_type = "LINKED"
unbounded_queue = true

[pools.alarm]
active_usage_warn_pct = 0.5
"#;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = DaemonConfig::load_from(dir.path().join("absent.toml").to_str().unwrap()).unwrap();

        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.sync_config().interval, Duration::from_secs(10));
        assert_eq!(config.reporter_config().interval, Duration::from_secs(20));
        assert_eq!(config.registry.kind, RegistryKind::File);
        assert!(config.pools.is_empty());
    }

    #[test]
    fn test_load_sample_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = DaemonConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.sync_config().interval, Duration::from_millis(2000));
        assert_eq!(config.reporter_config().mode, ReportMode::ConfigOnly);
        assert_eq!(config.registry.kind, RegistryKind::Memory);

        let io = config.pools[0].to_config();
        assert_eq!(io.identifier.as_str(), "orders:io");
        assert_eq!(io.queue_capacity, QueueCapacity::Bounded(256));
        assert_eq!(io.rejection_policy, RejectionPolicy::CallerRuns);

        let batch = config.pools[1].to_config();
        assert_eq!(batch.identifier.as_str(), "batch");
        assert_eq!(batch.queue_capacity, QueueCapacity::Unbounded);

        let alarms = config.alarm_config();
        assert_eq!(alarms.default_rule.queue_usage_warn_pct, 0.75);
        assert_eq!(alarms.default_rule.clear_after_samples, 2);
        assert_eq!(alarms.rules[&PoolIdentifier::new("batch")].active_usage_warn_pct, 0.5);
        assert!(!alarms.rules.contains_key(&PoolIdentifier::new("orders:io")));
    }

    #[test]
    fn test_invalid_pool_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(
            &path,
            "[[pools]]\nname = \"bad\"\ncore_pool_size = 8\nmaximum_pool_size = 2\n",
        )
        .unwrap();

        assert!(DaemonConfig::load_from(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_rate_out_of_range_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.toml");

        for rate in ["0", "2000000000"] {
            std::fs::write(&path, format!("[load]\nenabled = true\ntasks_per_second = {}\n", rate)).unwrap();
            let err = DaemonConfig::load_from(path.to_str().unwrap()).unwrap_err();
            assert!(err.to_string().contains("tasks_per_second"), "{}", err);
        }

        std::fs::write(&path, "[load]\nenabled = true\ntasks_per_second = 10000\n").unwrap();
        let config = DaemonConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.load.tasks_per_second, MAX_LOAD_TASKS_PER_SECOND);
    }
}
