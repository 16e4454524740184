//! Error types for the migration engine.
//!
//! Each layer carries its own enum so callers can match on what actually
//! failed. `StoreError::RowNotFound` is deliberately a distinct variant:
//! "no more rows" is the signal that drives sweep termination and must never
//! be conflated with a transient backend failure.

use std::time::Duration;

/// Failure talking to one of the two datastores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The query matched no row. For the validator this is data, not a fault.
    #[error("row not found")]
    RowNotFound,

    /// The backend rejected or failed the call.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A row came back but could not be decoded into the entity type.
    #[error("row decode failed: {0}")]
    Decode(String),

    /// The operation is not available on this pool. Raised by the dual-write
    /// pool for driver-level prepared statements, which would silently bind
    /// to a single store.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A store call exceeded its per-call budget.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure on the inconsistency-event channel.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event channel closed")]
    Closed,

    #[error("publish failed: {0}")]
    Publish(String),
}

/// An operator command the control plane cannot act on.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown routing pattern {0:?}")]
    UnknownPattern(String),

    #[error("incremental interval must be a positive number of milliseconds")]
    NonPositiveInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_is_not_a_backend_error() {
        let not_found = StoreError::RowNotFound;
        let backend = StoreError::Backend("connection refused".into());
        assert!(matches!(not_found, StoreError::RowNotFound));
        assert!(!matches!(backend, StoreError::RowNotFound));
        assert!(backend.to_string().contains("connection refused"));
    }
}
