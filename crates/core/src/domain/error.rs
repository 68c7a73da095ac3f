// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("Identifier mismatch: handle {expected}, config {actual}")]
    IdentifierMismatch { expected: String, actual: String },

    #[error("Invalid alarm rule: {0}")]
    InvalidAlarmRule(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
