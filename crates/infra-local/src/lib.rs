// Dynpool Infrastructure - Local Adapters
// Implements: RegistryClient (in-memory, file), AlarmNotifier (tracing)

mod file_registry;
mod memory_registry;
mod tracing_notifier;

pub use file_registry::FileRegistry;
pub use memory_registry::InMemoryRegistry;
pub use tracing_notifier::TracingAlarmNotifier;
