// Application Layer - Pool management use cases and background loops

pub mod alarm;
pub mod config_sync;
pub mod constants;
pub mod pool_handle;
pub mod pool_store;
pub mod reporter;
pub mod shutdown;

// Re-exports
pub use alarm::{AlarmConfig, AlarmEngine};
pub use config_sync::{
    default_push_channel, push_channel, ConfigPushReceiver, ConfigPushSender, ConfigSyncEngine, PushedConfig,
    SyncConfig, SyncOutcome, SyncPhase, SyncReport,
};
pub use pool_handle::{ApplyOutcome, PartialApply, PoolHandle};
pub use pool_store::{PoolRegistryStore, PoolSet};
pub use reporter::{RegistryReporter, ReporterConfig};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
