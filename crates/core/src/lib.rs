// Dynpool Core - Domain Logic, Ports & Reconfiguration Services
// NO infrastructure dependencies (Hexagonal Architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};
