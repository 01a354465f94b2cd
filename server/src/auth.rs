//! Trigger authentication.
//!
//! The document store calls the trigger endpoint with a shared secret in the
//! `X-Trigger-Secret` header. The secret is compared in constant time.
//!
//! # Example
//!
//! ```rust
//! use sipsync_server::auth::{verify_trigger_secret, AuthError};
//!
//! assert!(verify_trigger_secret(Some("s3cret"), "s3cret").is_ok());
//! assert_eq!(
//!     verify_trigger_secret(Some("guess"), "s3cret"),
//!     Err(AuthError::InvalidSecret)
//! );
//! assert_eq!(verify_trigger_secret(None, "s3cret"), Err(AuthError::MissingSecret));
//! ```

use subtle::ConstantTimeEq;
use thiserror::Error;

/// Header carrying the shared trigger secret.
pub const HEADER_TRIGGER_SECRET: &str = "X-Trigger-Secret";

/// Errors that can occur while authenticating a trigger call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request carried no secret.
    #[error("missing trigger secret")]
    MissingSecret,

    /// The secret did not match the configured one.
    #[error("invalid trigger secret")]
    InvalidSecret,
}

impl AuthError {
    /// Stable machine-readable code for error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSecret => "missing_secret",
            Self::InvalidSecret => "invalid_secret",
        }
    }
}

/// Checks a presented secret against the configured one.
///
/// An empty presented secret counts as missing.
///
/// # Errors
///
/// [`AuthError::MissingSecret`] or [`AuthError::InvalidSecret`].
pub fn verify_trigger_secret(presented: Option<&str>, expected: &str) -> Result<(), AuthError> {
    let presented = match presented {
        Some(secret) if !secret.is_empty() => secret,
        _ => return Err(AuthError::MissingSecret),
    };

    // Slices of different lengths compare unequal.
    if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(AuthError::InvalidSecret)
    }
}
