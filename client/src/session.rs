//! Session orchestration.
//!
//! Ties the client components to the auth state:
//!
//! - **sign-in**: upsert the profile email, start the today view and the
//!   cross-user watcher, then register the device token
//! - **sign-out**: deregister the token, tear both subscriptions down, then
//!   finalize sign-out with the identity provider
//!
//! Failures of the profile upsert or token registration are logged and do not
//! block the session; failing to open the live subscriptions does.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use sipsync_core::day::{Clock, Day};
use sipsync_core::memory::MemoryStore;
use sipsync_core::store::{bounded, ProfileDirectory, ProfileStore, TaskQuery, TaskStore};
use sipsync_core::types::{Identity, NotificationIntent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatcher::{LocalDispatcher, Notifier};
use crate::email_cache::EmailCache;
use crate::error::Result;
use crate::identity::IdentityProvider;
use crate::mutator::CompletionMutator;
use crate::reconciler::TodayView;
use crate::stats::HydrationStats;
use crate::team::{team_progress, TeamSummary};
use crate::tokens::{PushRegistration, TokenLifecycle};
use crate::watcher::{WatcherConfig, WatcherSession};

/// Handles the client is built from.
#[derive(Clone)]
pub struct ClientDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub directory: Arc<dyn ProfileDirectory>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub registration: Arc<dyn PushRegistration>,
    pub clock: Arc<dyn Clock>,
}

impl ClientDeps {
    /// Wires every store seam to one [`MemoryStore`].
    #[must_use]
    pub fn in_memory(
        store: &MemoryStore,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        registration: Arc<dyn PushRegistration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks: Arc::new(store.clone()),
            profiles: Arc::new(store.clone()),
            directory: Arc::new(store.clone()),
            identity,
            notifier,
            registration,
            clock,
        }
    }
}

/// State held while a user is signed in.
#[derive(Debug)]
pub struct ActiveSession {
    identity: Identity,
    day: Day,
    device_token: Option<String>,
    today: TodayView,
    watcher: WatcherSession,
}

impl ActiveSession {
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn day(&self) -> Day {
        self.day
    }

    /// The device token registered for push, if any.
    #[must_use]
    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }

    #[must_use]
    pub fn today(&self) -> &TodayView {
        &self.today
    }

    #[must_use]
    pub fn watcher(&self) -> &WatcherSession {
        &self.watcher
    }
}

/// A client bound to one identity provider.
pub struct ClientSession {
    deps: ClientDeps,
    config: Config,
    dispatcher: Arc<LocalDispatcher>,
    emails: Arc<EmailCache>,
    tokens: TokenLifecycle,
    mutator: CompletionMutator,
    active: Option<ActiveSession>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("config", &self.config)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    #[must_use]
    pub fn new(deps: ClientDeps, config: Config) -> Self {
        let dispatcher = Arc::new(LocalDispatcher::new(
            Arc::clone(&deps.notifier),
            config.notification_dismiss,
        ));
        let emails = Arc::new(EmailCache::new(
            Arc::clone(&deps.directory),
            config.email_cache_size,
            config.store_timeout,
        ));
        let tokens = TokenLifecycle::new(
            Arc::clone(&deps.profiles),
            Arc::clone(&deps.registration),
            Arc::clone(&deps.clock),
            config.store_timeout,
        );
        let mutator = CompletionMutator::new(
            Arc::clone(&deps.tasks),
            Arc::clone(&deps.identity),
            Arc::clone(&deps.clock),
            config.day_policy,
            config.store_timeout,
        )
        .with_local_notifications(Arc::clone(&dispatcher));

        Self {
            deps,
            config,
            dispatcher,
            emails,
            tokens,
            mutator,
            active: None,
        }
    }

    /// Completion, un-completion and amount writes for the signed-in user.
    #[must_use]
    pub fn mutator(&self) -> &CompletionMutator {
        &self.mutator
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<LocalDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn emails(&self) -> &Arc<EmailCache> {
        &self.emails
    }

    /// The signed-in session, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    /// Subscribes to the watcher's notification intents.
    #[must_use]
    pub fn intents(&self) -> Option<broadcast::Receiver<NotificationIntent>> {
        self.active.as_ref().map(|active| active.watcher.intents())
    }

    /// Brings the session in line with the identity provider's current state.
    ///
    /// # Errors
    ///
    /// Fails if a sign-in cannot open its live subscriptions.
    pub async fn sync(&mut self) -> Result<()> {
        let current = self.deps.identity.current();
        let active_uid = self.active.as_ref().map(|a| a.identity.uid.clone());
        match (current, active_uid) {
            (Some(identity), Some(uid)) if uid == identity.uid => Ok(()),
            (Some(identity), _) => {
                self.teardown().await;
                self.start(identity).await
            }
            (None, Some(_)) => {
                self.teardown().await;
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    /// Follows auth-state changes until `shutdown` resolves or the provider goes away.
    ///
    /// # Errors
    ///
    /// Fails if a sign-in cannot open its live subscriptions.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut auth = self.deps.identity.subscribe();
        auth.mark_changed();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                changed = auth.changed() => {
                    if changed.is_err() {
                        debug!("Identity provider closed");
                        break;
                    }
                    if let Err(err) = self.sync().await {
                        self.teardown().await;
                        return Err(err);
                    }
                }
            }
        }
        self.teardown().await;
        Ok(())
    }

    /// Deregisters the token, stops the subscriptions, then signs out with the provider.
    pub async fn sign_out(&mut self) {
        self.teardown().await;
        self.deps.identity.sign_out();
    }

    /// Team progress for the active day.
    ///
    /// # Errors
    ///
    /// Fails if nobody is signed in or the store cannot be read.
    pub async fn team_summary(&self) -> Result<TeamSummary> {
        let day = self.current_day()?;
        let records = bounded(
            self.config.store_timeout,
            self.deps.tasks.query_tasks(&TaskQuery::new().on_day(day)),
        )
        .await?;

        let mut emails = BTreeMap::new();
        for record in &records {
            if !emails.contains_key(&record.user_id) {
                let email = self.emails.resolve(&record.user_id).await;
                emails.insert(record.user_id.clone(), email);
            }
        }
        Ok(team_progress(&records, &emails))
    }

    /// Hydration statistics for the signed-in user.
    ///
    /// # Errors
    ///
    /// Fails if nobody is signed in or the store cannot be read.
    pub async fn statistics(&self) -> Result<HydrationStats> {
        let Some(active) = &self.active else {
            return Err(sipsync_core::SyncError::Unauthenticated.into());
        };
        let query = TaskQuery::new()
            .with_user(active.identity.uid.clone())
            .with_completed(true);
        let records = bounded(self.config.store_timeout, self.deps.tasks.query_tasks(&query))
            .await?;
        let today = self.config.day_policy.today(self.deps.clock.as_ref());
        Ok(HydrationStats::compute(&records, today))
    }

    fn current_day(&self) -> Result<Day> {
        match &self.active {
            Some(active) => Ok(active.day),
            None => Err(sipsync_core::SyncError::Unauthenticated.into()),
        }
    }

    async fn start(&mut self, identity: Identity) -> Result<()> {
        let now = self.deps.clock.now();
        let day = self.config.day_policy.day_of(now);
        info!(user_id = %identity.uid, day = %day, "Starting session");

        if let Some(email) = identity.email.as_deref().filter(|e| !e.is_empty()) {
            match bounded(
                self.config.store_timeout,
                self.deps.profiles.upsert_email(&identity.uid, email, now),
            )
            .await
            {
                Ok(_) => self.emails.prime(&identity.uid, email),
                Err(err) => warn!(user_id = %identity.uid, error = %err, "Profile upsert failed"),
            }
        }

        let today = TodayView::start(
            Arc::clone(&self.deps.tasks),
            identity.uid.clone(),
            day,
            self.config.store_timeout,
        )
        .await?;
        let watcher = match WatcherSession::start(
            Arc::clone(&self.deps.tasks),
            Arc::clone(&self.emails),
            Some(Arc::clone(&self.dispatcher)),
            WatcherConfig {
                local_user: identity.uid.clone(),
                day,
                intent_capacity: self.config.intent_channel_capacity,
                timeout: self.config.store_timeout,
            },
        )
        .await
        {
            Ok(watcher) => watcher,
            Err(err) => {
                today.stop();
                return Err(err.into());
            }
        };

        // A failed start must not leave a token in the profile.
        let device_token = self.tokens.register(&identity.uid).await;

        self.active = Some(ActiveSession {
            identity,
            day,
            device_token,
            today,
            watcher,
        });
        Ok(())
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if let Some(token) = &active.device_token {
            self.tokens.unregister(&active.identity.uid, token).await;
        }
        active.watcher.stop();
        active.today.stop();
        info!(user_id = %active.identity.uid, "Session ended");
    }
}
