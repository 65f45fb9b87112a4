use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmberError>;

#[derive(Debug, Error)]
pub enum EmberError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency '{dependency}' timed out after {after:?}")]
    DependencyTimeout { dependency: String, after: Duration },

    #[error("Dependency '{0}' is unavailable")]
    DependencyUnavailable(String),

    #[error("Dependency '{dependency}' failed: {message}")]
    Dependency { dependency: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EmberError {
    /// Non-timeout failure reported by a dependency client.
    pub fn dependency(dependency: impl Into<String>, message: impl ToString) -> Self {
        Self::Dependency {
            dependency: dependency.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(dependency: impl Into<String>, after: Duration) -> Self {
        Self::DependencyTimeout {
            dependency: dependency.into(),
            after,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DependencyTimeout { .. })
    }
}
