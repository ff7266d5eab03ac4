//! Error types shared across vmscale crates.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a [`ComputeProvider`](crate::ComputeProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The asynchronous operation finished with an error.
    #[error("operation {operation} failed: {message}")]
    Operation { operation: String, message: String },

    /// The named resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider could not serve the request (network, auth, rate limit).
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider call exceeded its budget.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid duration {input:?}: {reason}")]
    Duration { input: String, reason: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;
