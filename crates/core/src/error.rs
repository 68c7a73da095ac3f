// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Duplicate pool identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::port::RegistryError),

    #[error("Executor error: {0}")]
    Executor(#[from] crate::port::ExecutorError),

    /// A size update failed and restoring the previous sizes failed too;
    /// the pool runs with whatever sizes the executor reports
    #[error("Pool {pool} left half-resized: {cause}; rollback failed: {rollback}")]
    RollbackFailed {
        pool: String,
        cause: crate::port::ExecutorError,
        rollback: crate::port::ExecutorError,
    },
}

impl AppError {
    /// True for local validation failures (the `InvalidConfig` class)
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, AppError::Domain(crate::domain::DomainError::InvalidConfig(_)))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
