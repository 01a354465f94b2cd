//! Server configuration module.
//!
//! Parses configuration from environment variables for the SipSync server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SIPSYNC_TRIGGER_SECRET` | Yes* | - | Shared secret expected in `X-Trigger-Secret` |
//! | `SIPSYNC_DIRECTORY_URL` | Yes | - | Base URL of the profile directory REST API |
//! | `SIPSYNC_DIRECTORY_API_KEY` | Yes | - | API key for the directory |
//! | `SIPSYNC_PUSH_URL` | Yes | - | Base URL of the push-delivery service |
//! | `SIPSYNC_PUSH_API_KEY` | Yes | - | Bearer key for the push service |
//! | `SIPSYNC_REQUEST_TIMEOUT_MS` | No | 5000 | Per-call timeout |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `SIPSYNC_UNSAFE_NO_AUTH` | No | false | Skip the trigger secret check (dev only) |
//!
//! *Not required if `SIPSYNC_UNSAFE_NO_AUTH=true`

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default per-call timeout for directory and push requests.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Shared secret the document-store trigger sends with each write.
    pub trigger_secret: Option<String>,

    /// Base URL of the profile directory (e.g., `https://directory.internal`).
    pub directory_url: String,

    /// API key sent to the directory in the `apikey` header.
    pub directory_api_key: String,

    /// Base URL of the push-delivery service.
    pub push_url: String,

    /// Bearer key for the push-delivery service.
    pub push_api_key: String,

    /// Deadline for every outbound call.
    pub request_timeout: Duration,

    /// HTTP server port.
    pub port: u16,

    /// When true, the trigger secret is not checked (development only).
    pub unsafe_no_auth: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("trigger_secret", &self.trigger_secret.as_ref().map(|_| "<redacted>"))
            .field("directory_url", &self.directory_url)
            .field("directory_api_key", &"<redacted>")
            .field("push_url", &self.push_url)
            .field("push_api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("port", &self.port)
            .field("unsafe_no_auth", &self.unsafe_no_auth)
            .finish()
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A required variable is missing (the trigger secret only when
    ///   `SIPSYNC_UNSAFE_NO_AUTH` is not true)
    /// - `PORT` or `SIPSYNC_REQUEST_TIMEOUT_MS` is not a valid number
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sipsync_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let unsafe_no_auth = parse_bool_env("SIPSYNC_UNSAFE_NO_AUTH");
        let port = parse_port()?;
        let request_timeout = parse_timeout()?;

        let config = Self {
            trigger_secret: non_empty_env("SIPSYNC_TRIGGER_SECRET"),
            directory_url: required_env("SIPSYNC_DIRECTORY_URL")?,
            directory_api_key: required_env("SIPSYNC_DIRECTORY_API_KEY")?,
            push_url: required_env("SIPSYNC_PUSH_URL")?,
            push_api_key: required_env("SIPSYNC_PUSH_API_KEY")?,
            request_timeout,
            port,
            unsafe_no_auth,
        };

        config.validate()?;

        if config.unsafe_no_auth {
            warn!(
                "SIPSYNC_UNSAFE_NO_AUTH is enabled - the trigger secret is not checked. \
                 Do not use in production!"
            );
        }

        Ok(config)
    }

    /// Ensures a trigger secret is configured unless auth is disabled.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.unsafe_no_auth {
            return Ok(());
        }

        if self.trigger_secret.is_none() {
            return Err(ConfigError::missing("SIPSYNC_TRIGGER_SECRET"));
        }

        Ok(())
    }
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    non_empty_env(name).ok_or_else(|| ConfigError::missing(name))
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => port_str
            .parse()
            .map_err(|e| ConfigError::invalid("PORT", format!("{e}"))),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => {
            Err(ConfigError::invalid("PORT", "contains invalid unicode"))
        }
    }
}

fn parse_timeout() -> Result<Duration, ConfigError> {
    const KEY: &str = "SIPSYNC_REQUEST_TIMEOUT_MS";
    match env::var(KEY) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => Err(ConfigError::invalid(KEY, "must be greater than zero")),
            Ok(ms) => Ok(Duration::from_millis(ms)),
            Err(e) => Err(ConfigError::invalid(KEY, format!("{e}"))),
        },
        Err(_) => Ok(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)),
    }
}
