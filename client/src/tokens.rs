//! Device push token lifecycle.
//!
//! On sign-in the session asks the push runtime for a device token and adds
//! it to the user's profile; on sign-out it removes that token again. Every
//! failure here degrades to "no remote push for this session" and is logged,
//! never propagated: local notifications do not depend on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sipsync_core::day::Clock;
use sipsync_core::store::{bounded, ProfileStore};
use tracing::{debug, info, warn};

use crate::error::RegistrationError;

/// Random bytes in a locally minted token.
const TOKEN_BYTES: usize = 32;

/// Characters of a token shown in logs.
const TOKEN_LOG_PREFIX: usize = 8;

/// Platform push runtime that issues device tokens.
#[async_trait]
pub trait PushRegistration: Send + Sync {
    async fn acquire_token(&self) -> Result<String, RegistrationError>;
}

/// Push runtime stand-in that issues one random token per device.
#[derive(Debug, Clone)]
pub struct LocalPushRegistration {
    token: Result<String, RegistrationError>,
}

impl Default for LocalPushRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPushRegistration {
    /// A device with a freshly minted token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: Ok(generate_device_token()),
        }
    }

    /// A device whose runtime always fails with `error`.
    #[must_use]
    pub fn failing(error: RegistrationError) -> Self {
        Self { token: Err(error) }
    }
}

#[async_trait]
impl PushRegistration for LocalPushRegistration {
    async fn acquire_token(&self) -> Result<String, RegistrationError> {
        self.token.clone()
    }
}

/// Generates a 43-character base64-url device token.
fn generate_device_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Shortens a token for logging.
#[must_use]
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_LOG_PREFIX).collect();
    format!("{prefix}…")
}

/// Registers and deregisters the session's device token.
pub struct TokenLifecycle {
    profiles: Arc<dyn ProfileStore>,
    registration: Arc<dyn PushRegistration>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl std::fmt::Debug for TokenLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TokenLifecycle {
    #[must_use]
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        registration: Arc<dyn PushRegistration>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            profiles,
            registration,
            clock,
            timeout,
        }
    }

    /// Acquires a token and adds it to `user_id`'s profile.
    ///
    /// Returns the registered token, or `None` if remote push is unavailable
    /// for this session.
    pub async fn register(&self, user_id: &str) -> Option<String> {
        let token = match tokio::time::timeout(self.timeout, self.registration.acquire_token())
            .await
        {
            Ok(Ok(token)) => token,
            Ok(Err(err)) => {
                warn!(user_id, error = %err, "Push token unavailable; remote push disabled");
                return None;
            }
            Err(_) => {
                warn!(user_id, "Push token request timed out; remote push disabled");
                return None;
            }
        };

        let now = self.clock.now();
        match bounded(
            self.timeout,
            self.profiles.add_device_token(user_id, &token, now),
        )
        .await
        {
            Ok(added) => {
                info!(user_id, token = %redact(&token), added, "Registered device token");
                Some(token)
            }
            Err(err) => {
                warn!(user_id, error = %err, "Failed to store device token");
                None
            }
        }
    }

    /// Removes `token` from `user_id`'s profile. Returns `true` if it was removed.
    pub async fn unregister(&self, user_id: &str, token: &str) -> bool {
        match bounded(self.timeout, self.profiles.remove_device_token(user_id, token)).await {
            Ok(removed) => {
                debug!(user_id, token = %redact(token), removed, "Deregistered device token");
                removed
            }
            Err(err) => {
                warn!(user_id, error = %err, "Failed to remove device token");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sipsync_core::day::FixedClock;
    use sipsync_core::store::ProfileDirectory;
    use sipsync_core::MemoryStore;

    fn lifecycle(store: &MemoryStore, registration: LocalPushRegistration) -> TokenLifecycle {
        TokenLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(registration),
            Arc::new(FixedClock::new(Utc::now())),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn device_tokens_are_url_safe_and_unique() {
        let a = generate_device_token();
        let b = generate_device_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn redact_keeps_short_prefix() {
        assert_eq!(redact("abcdefghijklmnop"), "abcdefgh…");
        assert_eq!(redact("abc"), "abc…");
    }

    #[tokio::test]
    async fn register_then_unregister_round_trip() {
        let store = MemoryStore::new();
        let tokens = lifecycle(&store, LocalPushRegistration::new());

        let token = tokens.register("user-a").await.expect("token registered");
        let profile = store.get_profile("user-a").await.unwrap().unwrap();
        assert!(profile.device_tokens.contains(&token));
        assert!(profile.last_token_update.is_some());

        // Registering the same device again is a no-op on the set.
        assert_eq!(tokens.register("user-a").await.as_deref(), Some(token.as_str()));
        let profile = store.get_profile("user-a").await.unwrap().unwrap();
        assert_eq!(profile.device_tokens.len(), 1);

        assert!(tokens.unregister("user-a", &token).await);
        assert!(!tokens.unregister("user-a", &token).await);
        let profile = store.get_profile("user-a").await.unwrap().unwrap();
        assert!(profile.device_tokens.is_empty());
    }

    #[tokio::test]
    async fn acquisition_failure_degrades_to_none() {
        let store = MemoryStore::new();
        let tokens = lifecycle(
            &store,
            LocalPushRegistration::failing(RegistrationError::PermissionDenied),
        );

        assert!(tokens.register("user-a").await.is_none());
        assert!(store.get_profile("user-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_outage_degrades_to_none() {
        let store = MemoryStore::new();
        let tokens = lifecycle(&store, LocalPushRegistration::new());

        store.set_offline(true);
        assert!(tokens.register("user-a").await.is_none());
        assert!(!tokens.unregister("user-a", "tok").await);
    }
}
