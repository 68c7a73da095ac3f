// Panic isolation for pool workers
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Result of a panic-guarded task
#[derive(Debug, PartialEq, Eq)]
pub enum PanicGuardResult {
    Completed,
    Panicked(String),
}

/// Run one task, catching a panic so the worker thread survives it
///
/// Tasks are opaque closures; a panicking task leaves nothing behind that
/// the pool itself reads, hence the `AssertUnwindSafe`.
pub fn run_guarded<F>(pool: &str, task: F) -> PanicGuardResult
where
    F: FnOnce(),
{
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => PanicGuardResult::Completed,
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            error!(pool = %pool, panic_msg = %panic_msg, "Pool task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}
