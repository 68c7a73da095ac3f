// Synthetic workload for hosted pools
// Lets a standalone daemon show live metrics, alarms and resizes.

use crate::settings::{LoadSettings, MAX_LOAD_TASKS_PER_SECOND};
use dynpool_core::application::ShutdownToken;
use dynpool_core::port::ExecutorError;
use dynpool_infra_executor::ThreadPoolExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub fn spawn(
    executors: Vec<Arc<ThreadPoolExecutor>>,
    settings: LoadSettings,
    mut shutdown: ShutdownToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let rate = settings.tasks_per_second.clamp(1, MAX_LOAD_TASKS_PER_SECOND);
        let task_time = Duration::from_millis(settings.task_millis);
        info!(tasks_per_second = rate, task_millis = settings.task_millis, "Synthetic load started");

        let mut tick = interval(Duration::from_secs(1) / rate);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // CallerRuns may run the task right here
                    tokio::task::block_in_place(|| submit_round(&executors, task_time));
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Synthetic load stopped");
    })
}

fn submit_round(executors: &[Arc<ThreadPoolExecutor>], task_time: Duration) {
    for executor in executors {
        match executor.execute(move || std::thread::sleep(task_time)) {
            Ok(()) => {}
            Err(ExecutorError::Rejected { pool }) => debug!(pool = %pool, "Synthetic task rejected"),
            Err(ExecutorError::Shutdown) => {}
            Err(e) => warn!(pool = %executor.name(), error = %e, "Synthetic task submission failed"),
        }
    }
}
