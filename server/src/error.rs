//! Error types for the SipSync server.
//!
//! # Error Types
//!
//! - [`ConfigError`] - Configuration-related errors (missing values, parse failures)
//! - [`ServerError`] - Rejected trigger requests, rendered as JSON `{error, code}` bodies
//!
//! Fan-out failures (directory or push unreachable) are not server errors:
//! they are recorded in the fan-out report and the trigger still succeeds.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::auth::AuthError;

/// Errors that occur during configuration loading and validation.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required configuration value is missing.
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// A configuration value failed to parse or is invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// The configuration key that has an invalid value.
        key: String,
        /// Description of why the value is invalid.
        reason: String,
    },
}

/// Request errors, rendered as JSON `{error, code}` bodies.
#[derive(ThisError, Debug)]
pub enum ServerError {
    /// The trigger secret is missing or wrong.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The request body is not a valid task write notification.
    #[error("validation error: {0}")]
    Validation(String),
}

impl ServerError {
    /// Creates a new authentication error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sipsync_server::auth::AuthError;
    /// use sipsync_server::error::ServerError;
    ///
    /// let err = ServerError::auth(AuthError::MissingSecret);
    /// assert_eq!(err.code(), "missing_secret");
    /// ```
    pub fn auth(err: AuthError) -> Self {
        Self::Auth(err)
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::Validation(_) => "invalid_format",
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse::new(self.to_string()).with_code(self.code())),
        )
            .into_response()
    }
}

impl ConfigError {
    /// Creates a new missing configuration error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sipsync_server::error::ConfigError;
    ///
    /// let err = ConfigError::missing("SIPSYNC_PUSH_URL");
    /// assert!(matches!(err, ConfigError::Missing(_)));
    /// ```
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing(key.into())
    }

    /// Creates a new invalid configuration error.
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
