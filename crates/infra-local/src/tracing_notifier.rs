// Alarm notifier that writes transitions to the log

use async_trait::async_trait;
use dynpool_core::domain::{AlarmLevel, AlarmTransition};
use dynpool_core::port::{AlarmNotifier, NotifyError};
use tracing::{info, warn};

/// Logs every alarm transition; never fails
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlarmNotifier;

#[async_trait]
impl AlarmNotifier for TracingAlarmNotifier {
    async fn on_alarm_transition(&self, event: AlarmTransition) -> Result<(), NotifyError> {
        let reasons: Vec<String> = event.reasons.iter().map(ToString::to_string).collect();

        match event.current {
            AlarmLevel::Warning => warn!(
                target: "dynpool::alarm",
                event_id = %event.event_id,
                pool = %event.identifier,
                previous = %event.previous,
                current = %event.current,
                active = event.metrics.active_count,
                pool_size = event.metrics.pool_size,
                queue_size = event.metrics.queue_size,
                rejected = event.metrics.rejected_count,
                reasons = ?reasons,
                timestamp = event.timestamp,
                "Pool alarm"
            ),
            AlarmLevel::Normal => info!(
                target: "dynpool::alarm",
                event_id = %event.event_id,
                pool = %event.identifier,
                previous = %event.previous,
                current = %event.current,
                active = event.metrics.active_count,
                queue_size = event.metrics.queue_size,
                timestamp = event.timestamp,
                "Pool alarm cleared"
            ),
        }
        Ok(())
    }
}
