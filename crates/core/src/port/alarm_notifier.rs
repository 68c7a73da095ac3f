// Alarm Notifier Port
// Receives alarm transitions (IM/webhook/email delivery lives behind it)

use crate::domain::AlarmTransition;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait AlarmNotifier: Send + Sync {
    /// Deliver one Normal <-> Warning transition
    async fn on_alarm_transition(&self, event: AlarmTransition) -> Result<(), NotifyError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Notifier that keeps every event it receives
    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<AlarmTransition>>,
        fail: AtomicBool,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn events(&self) -> Vec<AlarmTransition> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl AlarmNotifier for RecordingNotifier {
        async fn on_alarm_transition(&self, event: AlarmTransition) -> Result<(), NotifyError> {
            self.events.lock().push(event);
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotifyError("webhook unreachable".to_string()));
            }
            Ok(())
        }
    }
}
