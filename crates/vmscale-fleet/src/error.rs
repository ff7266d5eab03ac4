//! Fleet error types.

use std::time::Duration;

use thiserror::Error;

use vmscale_capacity::CapacityError;
use vmscale_core::ProviderError;

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("zone selection failed: {0}")]
    Capacity(#[from] CapacityError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("{operation} of {target} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        target: String,
        after: Duration,
    },

    #[error("runner already tracked: {0}")]
    DuplicateRunner(String),
}

pub type FleetResult<T> = Result<T, FleetError>;
