//! Daily task reconciler.
//!
//! Merges a user's raw task records for one day against the fixed slot
//! schedule. The result always has exactly one [`ViewTask`] per slot, in
//! slot-id order, whether or not a record exists for it yet.
//!
//! [`reconcile`] is the pure merge. [`TodayView`] keeps it live by re-running
//! it on every snapshot of the user's task subscription and publishing the
//! latest view over a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use sipsync_core::day::Day;
use sipsync_core::error::Result;
use sipsync_core::store::{bounded, TaskFeed, TaskQuery, TaskStore};
use sipsync_core::types::{Slot, TaskRecord, ViewTask, SLOTS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Builds the per-slot view of `user_id`'s tasks on `day`.
///
/// Records of other users, of other days, or with a slot id outside the
/// schedule are ignored. When several records exist for one slot the most
/// recent one wins (see [`latest_record`]).
#[must_use]
pub fn reconcile(user_id: &str, day: Day, records: &[TaskRecord]) -> Vec<ViewTask> {
    for record in records {
        if !Slot::is_valid_id(record.slot_id) {
            debug!(task_id = %record.id, slot_id = record.slot_id, "Ignoring record with unknown slot");
        } else if record.user_id != user_id || !day.contains(record.date) {
            debug!(task_id = %record.id, "Ignoring record outside the user's day");
        }
    }

    SLOTS
        .iter()
        .map(|slot| {
            let candidates = records.iter().filter(|r| {
                r.slot_id == slot.id && r.user_id == user_id && day.contains(r.date)
            });
            match latest_record(candidates) {
                Some(record) => ViewTask::from_record(*slot, record),
                None => ViewTask::empty(*slot),
            }
        })
        .collect()
}

/// Picks the winning record among duplicates for one slot.
///
/// Latest `completedAt` wins, then latest `updatedAt`, then the greatest id,
/// so the choice is stable across snapshots.
pub fn latest_record<'a, I>(candidates: I) -> Option<&'a TaskRecord>
where
    I: IntoIterator<Item = &'a TaskRecord>,
{
    candidates
        .into_iter()
        .max_by(|a, b| {
            (a.completed_at, a.updated_at, &a.id).cmp(&(b.completed_at, b.updated_at, &b.id))
        })
}

/// Number of completed slots in a view.
#[must_use]
pub fn completed_count(view: &[ViewTask]) -> usize {
    view.iter().filter(|task| task.completed).count()
}

/// Live per-slot view of the signed-in user's tasks for one day.
#[derive(Debug)]
pub struct TodayView {
    view: watch::Receiver<Vec<ViewTask>>,
    task: JoinHandle<()>,
}

impl TodayView {
    /// Subscribes to `user_id`'s records for `day` and publishes the merged view.
    ///
    /// Returns once the first snapshot has been applied. If that snapshot is
    /// an error, the view starts from the all-default state and catches up on
    /// the next successful snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the subscription cannot be opened within `timeout`.
    pub async fn start(
        store: Arc<dyn TaskStore>,
        user_id: String,
        day: Day,
        timeout: Duration,
    ) -> Result<Self> {
        let query = TaskQuery::new().with_user(user_id.clone()).on_day(day);
        let mut feed = bounded(timeout, store.subscribe_tasks(query)).await?;

        let initial = match tokio::time::timeout(timeout, feed.next()).await {
            Ok(Some(Ok(records))) => reconcile(&user_id, day, &records),
            Ok(Some(Err(err))) => {
                warn!(user_id = %user_id, error = %err, "Initial task snapshot failed");
                reconcile(&user_id, day, &[])
            }
            Ok(None) | Err(_) => {
                warn!(user_id = %user_id, "No initial task snapshot");
                reconcile(&user_id, day, &[])
            }
        };

        let (tx, view) = watch::channel(initial);
        let task = tokio::spawn(run_view(feed, tx, user_id, day));
        Ok(Self { view, task })
    }

    /// The latest view.
    #[must_use]
    pub fn tasks(&self) -> Vec<ViewTask> {
        self.view.borrow().clone()
    }

    /// A receiver notified on every view change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<ViewTask>> {
        self.view.clone()
    }

    /// Number of slots completed today.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        completed_count(&self.view.borrow())
    }

    /// Stops following the store.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TodayView {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_view(
    mut feed: TaskFeed,
    tx: watch::Sender<Vec<ViewTask>>,
    user_id: String,
    day: Day,
) {
    while let Some(snapshot) = feed.next().await {
        match snapshot {
            Ok(records) => {
                let view = reconcile(&user_id, day, &records);
                tx.send_if_modified(|current| {
                    if *current == view {
                        false
                    } else {
                        *current = view;
                        true
                    }
                });
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Task snapshot failed; keeping last view");
            }
        }
    }
    debug!(user_id = %user_id, "Today view feed ended");
}
