// Pool Identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key naming one managed pool across the registry and this process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolIdentifier(String);

impl PoolIdentifier {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Canonical `app:pool` key
    pub fn for_app(app_name: &str, pool_name: &str) -> Self {
        Self(format!("{}:{}", app_name, pool_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Application part of an `app:pool` key, if the key has one
    pub fn app_name(&self) -> Option<&str> {
        self.0.split_once(':').map(|(app, _)| app)
    }

    /// Pool part of an `app:pool` key (the whole key otherwise)
    pub fn pool_name(&self) -> &str {
        self.0.split_once(':').map(|(_, pool)| pool).unwrap_or(&self.0)
    }
}

impl fmt::Display for PoolIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoolIdentifier {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
