//! ThreadPoolExecutor - OS-thread worker pool with live-tunable parameters
//!
//! Admission for a submitted task:
//! 1. fewer workers than core: start a worker with the task
//! 2. otherwise offer it to the queue
//! 3. queue refused and fewer workers than max: start a worker with it
//! 4. otherwise apply the rejection policy
//!
//! Core and max live in one packed `AtomicU64`, so readers always get a
//! consistent pair and setters can refuse `core > max` with a single CAS.
//! Queue and worker bookkeeping sit behind one mutex; tasks always run
//! outside it.

use crate::panic_guard::run_guarded;
use crate::queue::TaskQueue;
use dynpool_core::domain::{
    PoolRuntimeMetrics, PoolSizes, QueueCapacity, QueueType, RejectionPolicy, ThreadPoolConfig,
};
use dynpool_core::port::{ExecutorError, ManagedExecutor};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Unit of work accepted by the pool
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: TaskQueue,
    /// Live worker threads
    workers: usize,
    /// Workers blocked waiting for a task
    idle: usize,
    shutdown: bool,
    next_worker_id: u64,
}

struct Shared {
    name: String,
    queue_type: QueueType,
    sizes: AtomicU64,
    keep_alive_ms: AtomicU64,
    policy: AtomicU8,
    state: Mutex<State>,
    task_available: Condvar,
    terminated: Condvar,
    active: AtomicU64,
    largest: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    #[cfg(test)]
    fail_spawns: std::sync::atomic::AtomicBool,
}

impl Shared {
    fn sizes(&self) -> PoolSizes {
        PoolSizes::unpack(self.sizes.load(Ordering::Acquire))
    }

    fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms.load(Ordering::Acquire))
    }

    fn policy(&self) -> RejectionPolicy {
        RejectionPolicy::from_u8(self.policy.load(Ordering::Acquire)).unwrap_or(RejectionPolicy::Abort)
    }

    /// CAS both sizes at once; `update` sees the current pair and either
    /// returns the next one or refuses
    fn update_sizes<F>(&self, update: F) -> Result<PoolSizes, ExecutorError>
    where
        F: Fn(PoolSizes) -> Result<PoolSizes, ExecutorError>,
    {
        let mut current = self.sizes.load(Ordering::Acquire);
        loop {
            let previous = PoolSizes::unpack(current);
            let next = update(previous)?;
            match self
                .sizes
                .compare_exchange_weak(current, next.pack(), Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(previous),
                Err(actual) => current = actual,
            }
        }
    }

    fn run(&self, task: Task) {
        self.active.fetch_add(1, Ordering::Relaxed);
        run_guarded(&self.name, task);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Block until there is a task for this worker, or decide it exits
    fn next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            let sizes = self.sizes();
            // Above max: leave, unless this is the last worker and work is queued
            if state.workers > sizes.max as usize && (state.workers > 1 || state.queue.is_empty()) {
                return self.retire(state);
            }
            if let Some(task) = state.queue.poll() {
                return Some(task);
            }
            if state.shutdown {
                return self.retire(state);
            }

            state.idle += 1;
            if state.workers > sizes.core as usize {
                let wait = self.task_available.wait_for(&mut state, self.keep_alive());
                state.idle -= 1;
                if wait.timed_out()
                    && state.queue.is_empty()
                    && !state.shutdown
                    && state.workers > self.sizes().core as usize
                {
                    debug!(pool = %self.name, "Idle worker above core exiting after keep-alive");
                    return self.retire(state);
                }
            } else {
                self.task_available.wait(&mut state);
                state.idle -= 1;
            }
        }
    }

    fn retire(&self, mut state: MutexGuard<'_, State>) -> Option<Task> {
        state.workers -= 1;
        if state.workers == 0 {
            self.terminated.notify_all();
        }
        None
    }
}

fn worker_loop(shared: Arc<Shared>, first: Option<Task>) {
    let mut next = first;
    while let Some(task) = next.take().or_else(|| shared.next_task()) {
        shared.run(task);
    }
}

/// Start one worker; the caller holds the state lock
fn spawn_worker(shared: &Arc<Shared>, state: &mut State, first: Option<Task>) -> Result<(), ExecutorError> {
    state.next_worker_id += 1;
    let worker_name = format!("{}-worker-{}", shared.name, state.next_worker_id);
    let worker_shared = Arc::clone(shared);

    #[cfg(test)]
    {
        if shared.fail_spawns.load(Ordering::SeqCst) {
            return Err(ExecutorError::Spawn("spawn disabled".to_string()));
        }
    }

    match thread::Builder::new()
        .name(worker_name)
        .spawn(move || worker_loop(worker_shared, first))
    {
        Ok(_) => {
            state.workers += 1;
            shared.largest.fetch_max(state.workers as u64, Ordering::Relaxed);
            Ok(())
        }
        Err(e) => {
            error!(pool = %shared.name, error = %e, "Failed to start pool worker");
            Err(ExecutorError::Spawn(e.to_string()))
        }
    }
}

/// Bounded-queue thread pool whose sizes, keep-alive, rejection policy and
/// (for resizable queues) capacity can change while tasks are in flight
pub struct ThreadPoolExecutor {
    shared: Arc<Shared>,
}

impl ThreadPoolExecutor {
    /// Build an idle pool from its initial config; workers start on demand
    ///
    /// # Errors
    /// - ExecutorError::InvalidSizes if `max == 0` or `core > max`
    pub fn new(config: &ThreadPoolConfig) -> Result<Self, ExecutorError> {
        let sizes = PoolSizes::new(config.core_pool_size, config.maximum_pool_size);
        if sizes.max == 0 || !sizes.is_consistent() {
            return Err(ExecutorError::InvalidSizes {
                core: sizes.core,
                max: sizes.max,
            });
        }

        let shared = Arc::new(Shared {
            name: config.identifier.to_string(),
            queue_type: config.queue_type,
            sizes: AtomicU64::new(sizes.pack()),
            keep_alive_ms: AtomicU64::new(config.keep_alive().as_millis() as u64),
            policy: AtomicU8::new(config.rejection_policy.as_u8()),
            state: Mutex::new(State {
                queue: TaskQueue::new(config.queue_type, config.queue_capacity),
                workers: 0,
                idle: 0,
                shutdown: false,
                next_worker_id: 0,
            }),
            task_available: Condvar::new(),
            terminated: Condvar::new(),
            active: AtomicU64::new(0),
            largest: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            #[cfg(test)]
            fail_spawns: std::sync::atomic::AtomicBool::new(false),
        });

        info!(
            pool = %shared.name,
            core = sizes.core,
            max = sizes.max,
            queue_type = %config.queue_type,
            queue_capacity = %config.queue_capacity,
            "Thread pool created"
        );

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a task
    ///
    /// # Errors
    /// - ExecutorError::Rejected when saturated under the Abort policy
    /// - ExecutorError::Shutdown when shut down under the Abort policy
    /// - ExecutorError::Spawn if a needed worker thread could not start; the
    ///   task is not kept
    pub fn execute<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(task))
    }

    fn submit(&self, task: Task) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return self.reject(task, state);
        }
        let sizes = self.shared.sizes();

        if state.workers < sizes.core as usize {
            return spawn_worker(&self.shared, &mut state, Some(task));
        }

        let idle = state.idle;
        let task = match state.queue.offer(task, idle) {
            Ok(()) => {
                if state.workers == 0 {
                    // core == 0: someone has to drain the queue
                    if let Err(e) = spawn_worker(&self.shared, &mut state, None) {
                        // Nothing would ever run it; hand the failure back instead
                        drop(state.queue.take_newest());
                        return Err(e);
                    }
                } else {
                    self.shared.task_available.notify_one();
                }
                return Ok(());
            }
            Err(task) => task,
        };

        if state.workers < sizes.max as usize {
            return spawn_worker(&self.shared, &mut state, Some(task));
        }

        self.reject(task, state)
    }

    fn reject(&self, task: Task, mut state: MutexGuard<'_, State>) -> Result<(), ExecutorError> {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        let policy = self.shared.policy();
        debug!(pool = %self.shared.name, policy = %policy, shutdown = state.shutdown, "Task rejected");

        match policy {
            RejectionPolicy::Abort => {
                if state.shutdown {
                    Err(ExecutorError::Shutdown)
                } else {
                    Err(ExecutorError::Rejected {
                        pool: self.shared.name.clone(),
                    })
                }
            }
            RejectionPolicy::CallerRuns => {
                let shutdown = state.shutdown;
                drop(state);
                if !shutdown {
                    task();
                }
                Ok(())
            }
            RejectionPolicy::Discard => Ok(()),
            RejectionPolicy::DiscardOldest => {
                if !state.shutdown {
                    let idle = state.idle;
                    let _evicted = state.queue.poll();
                    if state.queue.offer(task, idle).is_ok() {
                        self.shared.task_available.notify_one();
                    }
                }
                Ok(())
            }
        }
    }

    /// Stop accepting tasks; queued tasks still run
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        self.shared.task_available.notify_all();
        if state.workers == 0 {
            self.shared.terminated.notify_all();
        }
        info!(
            pool = %self.shared.name,
            workers = state.workers,
            queued = state.queue.len(),
            "Thread pool shutting down"
        );
    }

    /// Stop accepting tasks and hand back the ones that never started
    pub fn shutdown_now(&self) -> Vec<Task> {
        self.shutdown();
        let drained = self.shared.state.lock().queue.drain();
        if !drained.is_empty() {
            warn!(pool = %self.shared.name, dropped = drained.len(), "Discarding queued tasks on shutdown");
        }
        drained
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Shut down and every worker has exited
    pub fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        state.shutdown && state.workers == 0
    }

    /// Wait until terminated; false if `timeout` elapsed first
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !(state.shutdown && state.workers == 0) {
            if Instant::now() >= deadline {
                return false;
            }
            self.shared.terminated.wait_until(&mut state, deadline);
        }
        true
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        // Idle workers would otherwise wait forever
        self.shutdown();
    }
}

impl ManagedExecutor for ThreadPoolExecutor {
    fn pool_sizes(&self) -> PoolSizes {
        self.shared.sizes()
    }

    fn set_core_pool_size(&self, core: u32) -> Result<(), ExecutorError> {
        let previous = self.shared.update_sizes(|current| {
            if core > current.max {
                return Err(ExecutorError::InvalidSizes { core, max: current.max });
            }
            Ok(PoolSizes::new(core, current.max))
        })?;

        let mut state = self.shared.state.lock();
        if core < previous.core {
            // Idle workers now above core switch to a timed wait
            self.shared.task_available.notify_all();
        } else if core > previous.core && !state.shutdown {
            let wanted = (core as usize)
                .saturating_sub(state.workers)
                .min(state.queue.len());
            for _ in 0..wanted {
                if spawn_worker(&self.shared, &mut state, None).is_err() {
                    // The size change stands; queued work waits for the next worker
                    break;
                }
            }
        }

        debug!(pool = %self.shared.name, from = previous.core, to = core, "Core pool size updated");
        Ok(())
    }

    fn set_maximum_pool_size(&self, max: u32) -> Result<(), ExecutorError> {
        let previous = self.shared.update_sizes(|current| {
            if max == 0 || max < current.core {
                return Err(ExecutorError::InvalidSizes {
                    core: current.core,
                    max,
                });
            }
            Ok(PoolSizes::new(current.core, max))
        })?;

        if max < previous.max {
            // Excess workers exit at their next poll
            let _state = self.shared.state.lock();
            self.shared.task_available.notify_all();
        }

        debug!(pool = %self.shared.name, from = previous.max, to = max, "Maximum pool size updated");
        Ok(())
    }

    fn keep_alive(&self) -> Duration {
        self.shared.keep_alive()
    }

    fn set_keep_alive(&self, keep_alive: Duration) {
        let previous = self
            .shared
            .keep_alive_ms
            .swap(keep_alive.as_millis() as u64, Ordering::AcqRel);
        if (keep_alive.as_millis() as u64) < previous {
            let _state = self.shared.state.lock();
            self.shared.task_available.notify_all();
        }
    }

    fn rejection_policy(&self) -> RejectionPolicy {
        self.shared.policy()
    }

    fn set_rejection_policy(&self, policy: RejectionPolicy) {
        self.shared.policy.store(policy.as_u8(), Ordering::Release);
    }

    fn queue_type(&self) -> QueueType {
        self.shared.queue_type
    }

    fn queue_capacity(&self) -> QueueCapacity {
        self.shared.state.lock().queue.capacity()
    }

    fn set_queue_capacity(&self, capacity: QueueCapacity) -> Result<(), ExecutorError> {
        self.shared.state.lock().queue.set_capacity(capacity)
    }

    fn metrics(&self) -> PoolRuntimeMetrics {
        let state = self.shared.state.lock();
        PoolRuntimeMetrics {
            active_count: self.shared.active.load(Ordering::Relaxed),
            pool_size: state.workers as u64,
            largest_pool_size: self.shared.largest.load(Ordering::Relaxed),
            queue_size: state.queue.len() as u64,
            queue_remaining_capacity: state.queue.remaining(),
            completed_task_count: self.shared.completed.load(Ordering::Relaxed),
            rejected_count: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}
