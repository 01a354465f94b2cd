//! Error types for the SipSync client.
//!
//! This module defines the error types used throughout the client crate,
//! providing structured error handling with clear, human-readable messages.

use sipsync_core::error::SyncError;
use thiserror::Error;

/// Errors that can occur during client operations.
///
/// Store-level failures keep their [`SyncError`] classification so callers
/// can still tell a transport outage from a validation failure.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Store, directory or mutation failure.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Errors raised while acquiring a platform push token.
///
/// All of them degrade to "no remote push" for the session; local
/// notifications are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The user declined notification permission.
    #[error("notification permission denied")]
    PermissionDenied,

    /// The platform has no push support.
    #[error("push messaging is not supported on this platform")]
    Unsupported,

    /// The push runtime failed to issue a token.
    #[error("token acquisition failed: {0}")]
    Failed(String),
}

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
