//! Capacity oracle error types.

use thiserror::Error;

/// Errors returned by zone selection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapacityError {
    /// Every region exposing the metric is at or over its limit.
    #[error("capacity exhausted: no region has {metric} headroom for {resource_class}")]
    CapacityExhausted {
        resource_class: String,
        metric: String,
    },

    /// No candidate region reported the metric at all.
    #[error("quota metric {metric} not found in any candidate region")]
    NotFound { metric: String },
}
