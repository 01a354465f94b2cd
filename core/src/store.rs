//! Document store seams.
//!
//! The task collection and the user profile collection live in an external
//! document store. This module defines what SipSync needs from it:
//!
//! - [`TaskQuery`] - equality/range filter over task records
//! - [`TaskStore`] - task reads, writes and live subscriptions
//! - [`ProfileDirectory`] / [`ProfileStore`] - profile reads and writes
//! - [`TaskFeed`] / [`Subscription`] - live snapshot feed and its cancel handle
//!
//! A live subscription delivers the *full* result set on every change, never
//! a diff. Consumers re-derive their state from each snapshot.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::day::Day;
use crate::error::{Result, SyncError};
use crate::types::{NewTaskRecord, SlotId, TaskPatch, TaskRecord, UserProfile};

/// Default deadline applied to every store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Filter over task records. Unset fields match everything; set fields AND together.
///
/// ```rust
/// use sipsync_core::store::TaskQuery;
///
/// let query = TaskQuery::new().with_user("user-a").with_slot(2);
/// assert_eq!(query.user_id.as_deref(), Some("user-a"));
/// assert!(!query.is_empty());
/// assert!(TaskQuery::new().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub user_id: Option<String>,
    pub slot_id: Option<SlotId>,
    /// Inclusive lower bound on `date`.
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `date`.
    pub date_until: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
}

impl TaskQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_slot(mut self, slot_id: SlotId) -> Self {
        self.slot_id = Some(slot_id);
        self
    }

    /// Restricts `date` to `[day.start, day.end)`.
    #[must_use]
    pub fn on_day(mut self, day: Day) -> Self {
        self.date_from = Some(day.start());
        self.date_until = Some(day.end());
        self
    }

    /// Restricts `date` to `[from, until)`.
    #[must_use]
    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_until = Some(until);
        self
    }

    #[must_use]
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Returns `true` if `record` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(ref user_id) = self.user_id {
            if &record.user_id != user_id {
                return false;
            }
        }
        if let Some(slot_id) = self.slot_id {
            if record.slot_id != slot_id {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if record.date < from {
                return false;
            }
        }
        if let Some(until) = self.date_until {
            if record.date >= until {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            if record.completed != completed {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.slot_id.is_none()
            && self.date_from.is_none()
            && self.date_until.is_none()
            && self.completed.is_none()
    }
}

/// One delivery of a live feed: the full result set, or the error that replaced it.
pub type Snapshot = Result<Vec<TaskRecord>>;

/// Cancel handle for a live subscription. Dropping it cancels the feed.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps the task that feeds a subscription.
    #[must_use]
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A handle with nothing behind it.
    #[must_use]
    pub fn detached() -> Self {
        Self { task: None }
    }

    /// Stops the feed. Calling it again is a no-op.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Returns `true` until the feed is cancelled or finishes on its own.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Receiving end of a live task subscription.
#[derive(Debug)]
pub struct TaskFeed {
    snapshots: mpsc::Receiver<Snapshot>,
    subscription: Subscription,
}

impl TaskFeed {
    #[must_use]
    pub fn new(snapshots: mpsc::Receiver<Snapshot>, subscription: Subscription) -> Self {
        Self {
            snapshots,
            subscription,
        }
    }

    /// Waits for the next snapshot. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }

    /// Cancels the feed; snapshots already queued can still be drained.
    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }
}

/// The task collection.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Every record matching `query`, ordered by id.
    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// Creates a record; the store assigns its id.
    async fn create_task(&self, record: NewTaskRecord) -> Result<TaskRecord>;

    /// Applies `patch` to an existing record.
    ///
    /// Fails with [`SyncError::NotFound`] if `id` is unknown.
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord>;

    /// Opens a live feed. The first snapshot is the current result set.
    async fn subscribe_tasks(&self, query: TaskQuery) -> Result<TaskFeed>;
}

/// Read access to user profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    async fn list_profiles(&self) -> Result<Vec<UserProfile>>;
}

/// Read/write access to user profiles.
#[async_trait]
pub trait ProfileStore: ProfileDirectory {
    /// Creates the profile if missing and sets its email when absent or different.
    async fn upsert_email(
        &self,
        user_id: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<UserProfile>;

    /// Adds a device token, creating the profile if missing.
    ///
    /// Returns `true` if the token was not registered before.
    async fn add_device_token(&self, user_id: &str, token: &str, now: DateTime<Utc>)
        -> Result<bool>;

    /// Removes a device token. Returns `true` if it was registered.
    async fn remove_device_token(&self, user_id: &str, token: &str) -> Result<bool>;
}

/// Runs `fut` under `limit`, mapping an elapsed deadline to [`SyncError::Timeout`].
///
/// ```rust
/// # tokio_test::block_on(async {
/// use std::time::Duration;
/// use sipsync_core::store::bounded;
///
/// let value = bounded(Duration::from_secs(1), async { Ok(7) }).await;
/// assert_eq!(value, Ok(7));
/// # });
/// ```
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::day::DayPolicy;

    fn record(user: &str, slot: SlotId, date: DateTime<Utc>, completed: bool) -> TaskRecord {
        TaskRecord {
            id: format!("{user}-{slot}"),
            user_id: user.to_string(),
            slot_id: slot,
            date,
            completed,
            completed_at: None,
            consumed_amount_ml: 0,
            updated_at: None,
        }
    }

    fn today() -> Day {
        DayPolicy::utc().day_of(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap())
    }

    // ========================================================================
    // TaskQuery
    // ========================================================================

    #[test]
    fn empty_query_matches_everything() {
        let query = TaskQuery::new();
        assert!(query.is_empty());
        assert!(query.matches(&record("a", 1, today().start(), false)));
        assert!(query.matches(&record("b", 4, today().offset(-30).start(), true)));
    }

    #[test]
    fn day_range_is_half_open() {
        let day = today();
        let query = TaskQuery::new().on_day(day);
        assert!(query.matches(&record("a", 1, day.start(), false)));
        assert!(!query.matches(&record("a", 1, day.end(), false)));
        assert!(!query.matches(&record("a", 1, day.offset(-1).start(), false)));
    }

    #[test]
    fn criteria_combine_with_and() {
        let day = today();
        let query = TaskQuery::new()
            .with_user("a")
            .with_slot(2)
            .on_day(day)
            .with_completed(true);

        assert!(query.matches(&record("a", 2, day.start(), true)));
        assert!(!query.matches(&record("b", 2, day.start(), true)));
        assert!(!query.matches(&record("a", 3, day.start(), true)));
        assert!(!query.matches(&record("a", 2, day.start(), false)));
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    #[tokio::test]
    async fn cancel_aborts_feed_task() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let mut subscription = Subscription::new(task);
        assert!(subscription.is_active());
        subscription.cancel();
        assert!(!subscription.is_active());
        subscription.cancel();
    }

    #[tokio::test]
    async fn feed_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let mut feed = TaskFeed::new(rx, Subscription::detached());
        tx.send(Ok(Vec::new())).await.unwrap();
        drop(tx);

        assert_eq!(feed.next().await, Some(Ok(Vec::new())));
        assert_eq!(feed.next().await, None);
        assert!(!feed.is_active());
    }

    #[tokio::test]
    async fn bounded_maps_elapsed_deadline() {
        let limit = Duration::from_millis(10);
        let result: Result<()> = bounded(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(SyncError::Timeout(limit)));
    }
}
