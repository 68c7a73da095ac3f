// Port Layer - Interfaces for external collaborators

pub mod alarm_notifier;
pub mod id_provider; // For deterministic testing
pub mod managed_executor;
pub mod registry_client;
pub mod time_provider;

// Re-exports
pub use alarm_notifier::{AlarmNotifier, NotifyError};
pub use id_provider::IdProvider;
pub use managed_executor::{ExecutorError, ManagedExecutor};
pub use registry_client::{RegistryClient, RegistryError};
pub use time_provider::TimeProvider;
