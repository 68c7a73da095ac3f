// Scheduler constants (no magic values)
use std::time::Duration;

/// Default config-sync poll interval (10s)
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Default bulk report interval (20s)
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(20);

/// Default alarm sampling interval (5s)
pub const DEFAULT_ALARM_INTERVAL: Duration = Duration::from_secs(5);

/// Pushed configs buffered before new pushes are dropped
/// (a dropped push is picked up by the next poll)
pub const DEFAULT_PUSH_CHANNEL_CAPACITY: usize = 256;

/// How long a stopping sync loop waits for in-flight cycles and pushes
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
