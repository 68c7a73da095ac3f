// Dynpool Infrastructure - Live Worker Pool
// Implements: ManagedExecutor

pub mod panic_guard;
pub mod queue;
pub mod thread_pool;

pub use thread_pool::{Task, ThreadPoolExecutor};
