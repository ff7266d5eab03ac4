//! Reclaim error types. These never leave a pass; they are logged.

use std::time::Duration;

use thiserror::Error;

use vmscale_fleet::FleetError;

#[derive(Debug, Error)]
pub enum ReclaimError {
    #[error("{operation} of {target} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        target: String,
        after: Duration,
    },

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("provider call failed: {0}")]
    Provider(#[source] FleetError),
}

impl From<FleetError> for ReclaimError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::Timeout {
                operation,
                target,
                after,
            } => ReclaimError::Timeout {
                operation,
                target,
                after,
            },
            other => ReclaimError::Provider(other),
        }
    }
}
