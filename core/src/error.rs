//! Error taxonomy shared by every SipSync component.
//!
//! [`SyncError`] covers the failures a store, directory or mutation can
//! report. Callers classify them with [`SyncError::is_transport`] and
//! friends rather than matching on message text.
//!
//! # Example
//!
//! ```rust
//! use sipsync_core::error::SyncError;
//!
//! let err = SyncError::unavailable("connection refused");
//! assert!(err.is_transport());
//! assert_eq!(err.to_string(), "transport unavailable: connection refused");
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::types::SlotId;

/// Errors raised by store, directory and mutation operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The referenced record or profile does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller may not act on the referenced record.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backing service could not be reached.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The call did not complete within its deadline.
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// No user is signed in.
    #[error("not signed in")]
    Unauthenticated,

    /// A consumed amount outside `0..=500` ml.
    #[error("consumed amount {0} ml is outside 0..=500")]
    InvalidAmount(i32),

    /// A slot id that is not part of the daily schedule.
    #[error("unknown slot id {0}")]
    InvalidSlot(SlotId),
}

impl SyncError {
    /// Creates a [`SyncError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a [`SyncError::PermissionDenied`].
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    /// Creates a [`SyncError::TransportUnavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable(reason.into())
    }

    /// Returns `true` for failures of the underlying transport, including timeouts.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_) | Self::Timeout(_))
    }

    /// Returns `true` for failures caused by the caller's input.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidAmount(_) | Self::InvalidSlot(_))
    }
}

/// Result type for store and mutation operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            SyncError::not_found("task t1").to_string(),
            "not found: task t1"
        );
        assert_eq!(
            SyncError::permission_denied("record owned by user-b").to_string(),
            "permission denied: record owned by user-b"
        );
        assert_eq!(
            SyncError::Timeout(Duration::from_secs(5)).to_string(),
            "operation timed out after 5000ms"
        );
        assert_eq!(SyncError::Unauthenticated.to_string(), "not signed in");
        assert_eq!(
            SyncError::InvalidAmount(600).to_string(),
            "consumed amount 600 ml is outside 0..=500"
        );
        assert_eq!(SyncError::InvalidSlot(7).to_string(), "unknown slot id 7");
    }

    #[test]
    fn classification() {
        assert!(SyncError::unavailable("down").is_transport());
        assert!(SyncError::Timeout(Duration::from_millis(1)).is_transport());
        assert!(!SyncError::not_found("x").is_transport());

        assert!(SyncError::InvalidAmount(-1).is_validation());
        assert!(SyncError::InvalidSlot(0).is_validation());
        assert!(!SyncError::Unauthenticated.is_validation());
    }

    #[test]
    fn implements_std_error() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<SyncError>();
    }
}
