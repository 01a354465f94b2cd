//! Configuration module for the SipSync client.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SIPSYNC_UTC_OFFSET` | No | `+00:00` | Canonical day-boundary offset (`±HH:MM`) |
//! | `SIPSYNC_NOTIFICATION_DISMISS_SECS` | No | 5 | Local notification auto-dismiss |
//! | `SIPSYNC_EMAIL_CACHE_SIZE` | No | 256 | Email cache capacity |
//! | `SIPSYNC_STORE_TIMEOUT_MS` | No | 5000 | Store call timeout |
//! | `SIPSYNC_INTENT_CHANNEL_CAPACITY` | No | 64 | Notification intent broadcast capacity |
//!
//! # Example
//!
//! ```no_run
//! use sipsync_client::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Day boundary offset: {}", config.day_policy.offset());
//! ```

use std::env;
use std::time::Duration;

use sipsync_core::day::{parse_utc_offset, DayPolicy};
use thiserror::Error;

/// Default local notification auto-dismiss, in seconds.
const DEFAULT_DISMISS_SECS: u64 = 5;

/// Default email cache capacity.
const DEFAULT_EMAIL_CACHE_SIZE: usize = 256;

/// Default store call timeout, in milliseconds.
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Default notification intent channel capacity.
const DEFAULT_INTENT_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the SipSync client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maps instants to calendar days.
    pub day_policy: DayPolicy,

    /// How long a local notification stays on screen.
    pub notification_dismiss: Duration,

    /// Capacity of the `userId -> email` cache.
    pub email_cache_size: usize,

    /// Deadline for every store call.
    pub store_timeout: Duration,

    /// Capacity of the notification intent broadcast channel.
    pub intent_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            day_policy: DayPolicy::utc(),
            notification_dismiss: Duration::from_secs(DEFAULT_DISMISS_SECS),
            email_cache_size: DEFAULT_EMAIL_CACHE_SIZE,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            intent_channel_capacity: DEFAULT_INTENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// Every variable is optional; unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a variable is set but malformed, or if a
    /// numeric value is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let day_policy = match env::var("SIPSYNC_UTC_OFFSET") {
            Ok(val) => {
                let offset = parse_utc_offset(&val).ok_or_else(|| ConfigError::InvalidValue {
                    key: "SIPSYNC_UTC_OFFSET".to_string(),
                    message: format!("expected ±HH:MM, got '{val}'"),
                })?;
                DayPolicy::new(offset)
            }
            Err(_) => DayPolicy::utc(),
        };

        let dismiss_secs = parse_positive::<u64>(
            "SIPSYNC_NOTIFICATION_DISMISS_SECS",
            DEFAULT_DISMISS_SECS,
        )?;
        let email_cache_size =
            parse_positive::<usize>("SIPSYNC_EMAIL_CACHE_SIZE", DEFAULT_EMAIL_CACHE_SIZE)?;
        let store_timeout_ms =
            parse_positive::<u64>("SIPSYNC_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;
        let intent_channel_capacity = parse_positive::<usize>(
            "SIPSYNC_INTENT_CHANNEL_CAPACITY",
            DEFAULT_INTENT_CHANNEL_CAPACITY,
        )?;

        Ok(Self {
            day_policy,
            notification_dismiss: Duration::from_secs(dismiss_secs),
            email_cache_size,
            store_timeout: Duration::from_millis(store_timeout_ms),
            intent_channel_capacity,
        })
    }
}

/// Parses an optional positive integer variable, falling back to `default`.
fn parse_positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match env::var(key) {
        Ok(val) => {
            let parsed = val.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected positive integer, got '{val}'"),
            })?;
            if parsed == T::default() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "value must be greater than 0".to_string(),
                });
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Clears all SIPSYNC_* vars for the duration of `f` and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("SIPSYNC_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("SIPSYNC_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn test_defaults() {
        with_clean_env(|| {
            let config = Config::from_env().expect("should parse empty environment");

            assert_eq!(config.day_policy, DayPolicy::utc());
            assert_eq!(config.notification_dismiss, Duration::from_secs(5));
            assert_eq!(config.email_cache_size, DEFAULT_EMAIL_CACHE_SIZE);
            assert_eq!(config.store_timeout, Duration::from_millis(5000));
            assert_eq!(config.intent_channel_capacity, DEFAULT_INTENT_CHANNEL_CAPACITY);
        });
    }

    #[test]
    #[serial]
    fn test_full_config() {
        with_clean_env(|| {
            env::set_var("SIPSYNC_UTC_OFFSET", "+02:00");
            env::set_var("SIPSYNC_NOTIFICATION_DISMISS_SECS", "8");
            env::set_var("SIPSYNC_EMAIL_CACHE_SIZE", "16");
            env::set_var("SIPSYNC_STORE_TIMEOUT_MS", "250");
            env::set_var("SIPSYNC_INTENT_CHANNEL_CAPACITY", "4");

            let config = Config::from_env().expect("should parse full config");

            assert_eq!(config.day_policy.offset().local_minus_utc(), 7200);
            assert_eq!(config.notification_dismiss, Duration::from_secs(8));
            assert_eq!(config.email_cache_size, 16);
            assert_eq!(config.store_timeout, Duration::from_millis(250));
            assert_eq!(config.intent_channel_capacity, 4);
        });
    }

    #[test]
    #[serial]
    fn test_invalid_offset() {
        with_clean_env(|| {
            env::set_var("SIPSYNC_UTC_OFFSET", "Europe/Berlin");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "SIPSYNC_UTC_OFFSET"
            ));
        });
    }

    #[test]
    #[serial]
    fn test_zero_cache_size_rejected() {
        with_clean_env(|| {
            env::set_var("SIPSYNC_EMAIL_CACHE_SIZE", "0");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, ref message }
                    if key == "SIPSYNC_EMAIL_CACHE_SIZE" && message.contains("greater than 0")
            ));
        });
    }

    #[test]
    #[serial]
    fn test_non_numeric_timeout_rejected() {
        with_clean_env(|| {
            env::set_var("SIPSYNC_STORE_TIMEOUT_MS", "soon");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "SIPSYNC_STORE_TIMEOUT_MS"
            ));
        });
    }
}
