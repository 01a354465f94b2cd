//! Read-through `userId -> email` cache.
//!
//! Notification intents name the completing user by email, which lives in the
//! profile directory. Lookups go through an LRU of per-user cells so that
//! concurrent lookups for the same user share one directory read.
//!
//! A user without a profile (or without an email) resolves to
//! [`UNKNOWN_USER_LABEL`] and that answer is cached. A failed lookup also
//! resolves to the sentinel but is *not* cached, so the next lookup retries.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use sipsync_core::store::{bounded, ProfileDirectory};
use sipsync_core::types::UNKNOWN_USER_LABEL;
use sipsync_core::SyncError;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

type Cell = Arc<OnceCell<String>>;

/// Coalescing LRU cache of user emails.
pub struct EmailCache {
    directory: Arc<dyn ProfileDirectory>,
    entries: Mutex<LruCache<String, Cell>>,
    timeout: Duration,
}

impl std::fmt::Debug for EmailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailCache")
            .field("len", &self.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EmailCache {
    /// Creates a cache holding at most `capacity` users (minimum 1).
    #[must_use]
    pub fn new(directory: Arc<dyn ProfileDirectory>, capacity: usize, timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            directory,
            entries: Mutex::new(LruCache::new(capacity)),
            timeout,
        }
    }

    /// Resolves `user_id` to an email, or to the sentinel label.
    pub async fn resolve(&self, user_id: &str) -> String {
        let cell = self.cell(user_id);
        let lookup = cell
            .get_or_try_init(|| async {
                let profile = bounded(self.timeout, self.directory.get_profile(user_id)).await?;
                let email = match profile {
                    Some(profile) => profile.display_email().to_string(),
                    None => {
                        debug!(user_id, "No profile for user");
                        UNKNOWN_USER_LABEL.to_string()
                    }
                };
                Ok::<_, SyncError>(email)
            })
            .await;

        match lookup {
            Ok(email) => email.clone(),
            Err(err) => {
                warn!(user_id, error = %err, "Email lookup failed");
                UNKNOWN_USER_LABEL.to_string()
            }
        }
    }

    /// Seeds a known email, e.g. the signed-in user's own.
    pub fn prime(&self, user_id: &str, email: &str) {
        let cell = OnceCell::new_with(Some(email.to_string()));
        self.lock().put(user_id.to_string(), Arc::new(cell));
    }

    /// Returns the cached email without a directory read.
    #[must_use]
    pub fn peek(&self, user_id: &str) -> Option<String> {
        self.lock()
            .peek(user_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of users with a cache entry (resolved or in flight).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, user_id: &str) -> Cell {
        let mut entries = self.lock();
        if let Some(cell) = entries.get(user_id) {
            return Arc::clone(cell);
        }
        let cell: Cell = Arc::new(OnceCell::new());
        entries.put(user_id.to_string(), Arc::clone(&cell));
        cell
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Cell>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sipsync_core::error::Result;
    use sipsync_core::types::UserProfile;
    use sipsync_core::MemoryStore;

    /// Directory that counts reads and can be made to fail.
    struct CountingDirectory {
        inner: MemoryStore,
        reads: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ProfileDirectory for CountingDirectory {
        async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.get_profile(user_id).await
        }

        async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
            self.inner.list_profiles().await
        }
    }

    async fn directory_with(users: &[(&str, Option<&str>)], delay: Duration) -> Arc<CountingDirectory> {
        let inner = MemoryStore::new();
        for (user_id, email) in users {
            let mut profile = UserProfile::new(*user_id);
            profile.email = email.map(str::to_string);
            inner.put_profile(profile).await;
        }
        Arc::new(CountingDirectory {
            inner,
            reads: AtomicUsize::new(0),
            delay,
        })
    }

    #[tokio::test]
    async fn resolves_and_caches_email() {
        let directory = directory_with(&[("user-a", Some("a@example.com"))], Duration::ZERO).await;
        let cache = EmailCache::new(directory.clone(), 8, Duration::from_secs(1));

        assert_eq!(cache.resolve("user-a").await, "a@example.com");
        assert_eq!(cache.resolve("user-a").await, "a@example.com");
        assert_eq!(directory.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek("user-a").as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn missing_profile_resolves_to_sentinel() {
        let directory = directory_with(&[("no-email", None)], Duration::ZERO).await;
        let cache = EmailCache::new(directory.clone(), 8, Duration::from_secs(1));

        assert_eq!(cache.resolve("ghost").await, UNKNOWN_USER_LABEL);
        assert_eq!(cache.resolve("no-email").await, UNKNOWN_USER_LABEL);
        assert_eq!(cache.resolve("ghost").await, UNKNOWN_USER_LABEL);
        assert_eq!(directory.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_lookup_is_retried() {
        let directory = directory_with(&[("user-a", Some("a@example.com"))], Duration::ZERO).await;
        let cache = EmailCache::new(directory.clone(), 8, Duration::from_secs(1));

        directory.inner.set_offline(true);
        assert_eq!(cache.resolve("user-a").await, UNKNOWN_USER_LABEL);
        assert!(cache.peek("user-a").is_none());

        directory.inner.set_offline(false);
        assert_eq!(cache.resolve("user-a").await, "a@example.com");
        assert_eq!(directory.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_lookups_are_coalesced() {
        let directory =
            directory_with(&[("user-a", Some("a@example.com"))], Duration::from_millis(50)).await;
        let cache = Arc::new(EmailCache::new(directory.clone(), 8, Duration::from_secs(1)));

        let lookups = (0..5).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve("user-a").await })
        });
        for handle in futures::future::join_all(lookups).await {
            assert_eq!(handle.unwrap(), "a@example.com");
        }
        assert_eq!(directory.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_directory_times_out_to_sentinel() {
        let directory =
            directory_with(&[("user-a", Some("a@example.com"))], Duration::from_secs(5)).await;
        let cache = EmailCache::new(directory, 8, Duration::from_millis(20));

        assert_eq!(cache.resolve("user-a").await, UNKNOWN_USER_LABEL);
        assert!(cache.peek("user-a").is_none());
    }

    #[tokio::test]
    async fn primed_entries_skip_the_directory() {
        let directory = directory_with(&[], Duration::ZERO).await;
        let cache = EmailCache::new(directory.clone(), 1, Duration::from_secs(1));

        cache.prime("me", "me@example.com");
        assert_eq!(cache.resolve("me").await, "me@example.com");
        assert_eq!(directory.reads.load(Ordering::SeqCst), 0);

        // Capacity 1: resolving another user evicts the primed entry.
        let _ = cache.resolve("other").await;
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("me").is_none());
    }
}
