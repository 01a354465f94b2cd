//! Cross-user completion watcher.
//!
//! This module watches *all* users' task records for the current day and
//! emits a notification intent for every completion by someone other than the
//! local user that this session has not seen before.
//!
//! # Architecture
//!
//! The dedup logic lives in [`CompletionTracker`], a plain state machine with
//! no runtime dependency:
//!
//! - **Priming**: the first snapshot records every completed `(user, slot)`
//!   pair without emitting anything, so opening the app does not replay the
//!   day's completions.
//! - **Active**: each later snapshot emits the completed pairs that are not
//!   yet known and belong to another user. Pairs that are no longer completed
//!   are forgotten, so an un-complete followed by a re-complete notifies again.
//!
//! [`WatcherSession`] drives a tracker from a live store subscription. New
//! pairs are resolved to emails through the [`EmailCache`] concurrently; each
//! resolution checks the session liveness flag before it emits, so nothing is
//! published after [`WatcherSession::stop`]. Resolved intents go out on a
//! broadcast stream and to the local dispatcher.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sipsync_client::email_cache::EmailCache;
//! use sipsync_client::watcher::{WatcherConfig, WatcherSession};
//! use sipsync_core::{DayPolicy, MemoryStore, SystemClock};
//!
//! # async fn run() -> sipsync_core::Result<()> {
//! let store = MemoryStore::new();
//! let emails = Arc::new(EmailCache::new(Arc::new(store.clone()), 256, Duration::from_secs(5)));
//! let config = WatcherConfig {
//!     local_user: "user-a".to_string(),
//!     day: DayPolicy::utc().today(&SystemClock),
//!     intent_capacity: 64,
//!     timeout: Duration::from_secs(5),
//! };
//!
//! let session = WatcherSession::start(Arc::new(store), emails, None, config).await?;
//! let mut intents = session.intents();
//! while let Ok(intent) = intents.recv().await {
//!     println!("{}", intent.body());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sipsync_core::day::Day;
use sipsync_core::error::Result;
use sipsync_core::store::{bounded, TaskFeed, TaskQuery, TaskStore};
use sipsync_core::types::{NotificationIntent, NotifiedKey, Slot, TaskRecord};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::LocalDispatcher;
use crate::email_cache::EmailCache;

/// Dedup state machine for one watcher session.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    local_user: String,
    notified: HashSet<NotifiedKey>,
    primed: bool,
}

impl CompletionTracker {
    #[must_use]
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            notified: HashSet::new(),
            primed: false,
        }
    }

    /// Applies one full snapshot and returns the pairs to notify about,
    /// ordered by user then slot.
    ///
    /// The first call only primes the tracker and always returns nothing.
    pub fn observe(&mut self, records: &[TaskRecord]) -> Vec<NotifiedKey> {
        let completed: HashSet<NotifiedKey> = records
            .iter()
            .filter(|record| record.completed)
            .filter(|record| {
                let valid = Slot::is_valid_id(record.slot_id);
                if !valid {
                    warn!(
                        task_id = %record.id,
                        slot_id = record.slot_id,
                        "Dropping completed record with unknown slot"
                    );
                }
                valid
            })
            .map(NotifiedKey::from)
            .collect();

        if !self.primed {
            debug!(known = completed.len(), "Watcher primed");
            self.notified = completed;
            self.primed = true;
            return Vec::new();
        }

        let fresh: BTreeSet<NotifiedKey> = completed
            .iter()
            .filter(|key| key.user_id != self.local_user && !self.notified.contains(key))
            .cloned()
            .collect();

        // Adds every completed pair (local ones included) and forgets the rest.
        self.notified = completed;
        fresh.into_iter().collect()
    }

    #[must_use]
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    #[must_use]
    pub fn notified(&self) -> &HashSet<NotifiedKey> {
        &self.notified
    }

    #[must_use]
    pub fn local_user(&self) -> &str {
        &self.local_user
    }
}

/// Settings for a [`WatcherSession`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// The signed-in user; their own completions never produce intents.
    pub local_user: String,
    /// The day being watched.
    pub day: Day,
    /// Capacity of the intent broadcast channel.
    pub intent_capacity: usize,
    /// Deadline for opening the subscription and for the first snapshot.
    pub timeout: Duration,
}

/// A live watcher over all users' tasks for one day.
#[derive(Debug)]
pub struct WatcherSession {
    intents: broadcast::Sender<NotificationIntent>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WatcherSession {
    /// Opens the subscription and primes on the first snapshot before returning.
    ///
    /// If the first snapshot fails, priming happens on the first successful one.
    ///
    /// # Errors
    ///
    /// Fails if the subscription cannot be opened within the configured timeout.
    pub async fn start(
        store: Arc<dyn TaskStore>,
        emails: Arc<EmailCache>,
        dispatcher: Option<Arc<LocalDispatcher>>,
        config: WatcherConfig,
    ) -> Result<Self> {
        let query = TaskQuery::new().on_day(config.day);
        let mut feed = bounded(config.timeout, store.subscribe_tasks(query)).await?;
        let mut tracker = CompletionTracker::new(config.local_user.clone());

        match tokio::time::timeout(config.timeout, feed.next()).await {
            Ok(Some(Ok(records))) => {
                tracker.observe(&records);
            }
            Ok(Some(Err(err))) => {
                warn!(error = %err, "Initial watcher snapshot failed; priming later");
            }
            Ok(None) | Err(_) => {
                warn!("No initial watcher snapshot; priming later");
            }
        }

        let (intents, _) = broadcast::channel(config.intent_capacity.max(1));
        let alive = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_watcher(
            feed,
            tracker,
            Emitter {
                intents: intents.clone(),
                alive: Arc::clone(&alive),
                emails,
                dispatcher,
            },
        ));

        info!(local_user = %config.local_user, day = %config.day, "Watcher session started");
        Ok(Self {
            intents,
            alive,
            task,
        })
    }

    /// Subscribes to resolved notification intents.
    #[must_use]
    pub fn intents(&self) -> broadcast::Receiver<NotificationIntent> {
        self.intents.subscribe()
    }

    /// Ends the session: no further intents are emitted, including pending lookups.
    pub fn stop(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!("Watcher session stopped");
        }
        self.task.abort();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

impl Drop for WatcherSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything a resolution task needs to publish an intent.
#[derive(Clone)]
struct Emitter {
    intents: broadcast::Sender<NotificationIntent>,
    alive: Arc<AtomicBool>,
    emails: Arc<EmailCache>,
    dispatcher: Option<Arc<LocalDispatcher>>,
}

impl Emitter {
    async fn emit(self, key: NotifiedKey) {
        let user_email = self.emails.resolve(&key.user_id).await;
        if !self.alive.load(Ordering::SeqCst) {
            trace!(user_id = %key.user_id, slot_id = key.slot_id, "Session ended; dropping intent");
            return;
        }

        let intent = NotificationIntent {
            user_id: key.user_id,
            user_email,
            slot_id: key.slot_id,
            slot_label: Slot::label_for(key.slot_id).to_string(),
        };
        debug!(
            user_id = %intent.user_id,
            slot_id = intent.slot_id,
            "Emitting completion intent"
        );
        // No receivers is fine; the dispatcher below still runs.
        let _ = self.intents.send(intent.clone());
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&intent).await;
        }
    }
}

async fn run_watcher(mut feed: TaskFeed, mut tracker: CompletionTracker, emitter: Emitter) {
    while let Some(snapshot) = feed.next().await {
        if !emitter.alive.load(Ordering::SeqCst) {
            break;
        }
        match snapshot {
            Ok(records) => {
                for key in tracker.observe(&records) {
                    tokio::spawn(emitter.clone().emit(key));
                }
            }
            Err(err) => {
                warn!(error = %err, "Watcher snapshot failed; skipping");
            }
        }
    }
    debug!("Watcher feed ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sipsync_core::day::DayPolicy;
    use sipsync_core::types::SlotId;

    fn record(user: &str, slot: SlotId, completed: bool) -> TaskRecord {
        let day = DayPolicy::utc().day_of(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap());
        TaskRecord {
            id: format!("{user}-{slot}"),
            user_id: user.to_string(),
            slot_id: slot,
            date: day.start(),
            completed,
            completed_at: completed.then(Utc::now),
            consumed_amount_ml: 0,
            updated_at: None,
        }
    }

    #[test]
    fn priming_emits_nothing_and_records_completed_pairs() {
        let mut tracker = CompletionTracker::new("me");
        let fresh = tracker.observe(&[record("a", 1, true), record("b", 1, false)]);

        assert!(fresh.is_empty());
        assert!(tracker.is_primed());
        let expected: HashSet<_> = [NotifiedKey::new("a", 1)].into_iter().collect();
        assert_eq!(tracker.notified(), &expected);
    }

    #[test]
    fn new_foreign_completion_emits_once() {
        let mut tracker = CompletionTracker::new("me");
        tracker.observe(&[record("a", 1, true), record("b", 1, false)]);

        let snapshot = [record("a", 1, true), record("b", 2, true)];
        assert_eq!(tracker.observe(&snapshot), vec![NotifiedKey::new("b", 2)]);
        assert!(tracker.observe(&snapshot).is_empty());
    }

    #[test]
    fn uncomplete_then_recomplete_emits_again() {
        let mut tracker = CompletionTracker::new("me");
        tracker.observe(&[]);

        assert_eq!(
            tracker.observe(&[record("b", 2, true)]),
            vec![NotifiedKey::new("b", 2)]
        );
        assert!(tracker.observe(&[record("b", 2, false)]).is_empty());
        assert!(!tracker.notified().contains(&NotifiedKey::new("b", 2)));
        assert_eq!(
            tracker.observe(&[record("b", 2, true)]),
            vec![NotifiedKey::new("b", 2)]
        );
    }

    #[test]
    fn local_completions_are_tracked_but_never_emitted() {
        let mut tracker = CompletionTracker::new("me");
        tracker.observe(&[]);

        assert!(tracker.observe(&[record("me", 3, true)]).is_empty());
        assert!(tracker.notified().contains(&NotifiedKey::new("me", 3)));
    }

    #[test]
    fn several_new_completions_are_ordered() {
        let mut tracker = CompletionTracker::new("me");
        tracker.observe(&[]);

        let fresh = tracker.observe(&[
            record("c", 1, true),
            record("b", 4, true),
            record("b", 2, true),
        ]);
        assert_eq!(
            fresh,
            vec![
                NotifiedKey::new("b", 2),
                NotifiedKey::new("b", 4),
                NotifiedKey::new("c", 1)
            ]
        );
    }

    #[test]
    fn unknown_slots_are_dropped() {
        let mut tracker = CompletionTracker::new("me");
        tracker.observe(&[]);

        assert!(tracker.observe(&[record("b", 9, true)]).is_empty());
        assert!(tracker.notified().is_empty());
    }

    #[test]
    fn empty_first_snapshot_still_primes() {
        let mut tracker = CompletionTracker::new("me");
        assert!(!tracker.is_primed());
        tracker.observe(&[]);
        assert!(tracker.is_primed());
        assert_eq!(tracker.local_user(), "me");
    }
}
