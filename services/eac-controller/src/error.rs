//! Engine error types.

use eac_reconcile::{ReconcileError, Retryable};
use thiserror::Error;
use tracing::error;

use crate::api::RuntimeRef;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the worker reconciler, endpoint publisher and quota gateway.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Status/config store failure (conflict, not found, transport).
    #[error(transparent)]
    Store(#[from] ReconcileError),

    /// The quota service answered without the expected nesting.
    #[error("malformed quota response: {0}")]
    MalformedResponse(String),

    /// The quota service could not be reached or rejected the call.
    #[error("quota service error: {0}")]
    Quota(String),

    #[error("invalid mount point {mount_point:?}: {reason}")]
    InvalidMountPoint { mount_point: String, reason: String },

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    /// The enabled-worker-set helper failed.
    #[error("worker helper error: {0}")]
    Helper(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

impl Retryable for EngineError {
    fn is_conflict(&self) -> bool {
        EngineError::is_conflict(self)
    }
}

/// Log `err` with the runtime's coordinates unless it is a write conflict,
/// then hand it back.
pub fn log_error_except_conflict(err: EngineError, message: &str, target: &RuntimeRef) -> EngineError {
    if !err.is_conflict() {
        error!(
            namespace = %target.namespace,
            name = %target.name,
            error = %err,
            "{message}"
        );
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_seen_through_wrapper() {
        let err = EngineError::from(ReconcileError::Conflict("stale".into()));
        assert!(err.is_conflict());
        assert!(Retryable::is_conflict(&err));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_non_store_errors_are_not_conflicts() {
        assert!(!EngineError::MalformedResponse("empty".into()).is_conflict());
        assert!(!EngineError::Quota("down".into()).is_conflict());
    }
}
