//! In-process document store.
//!
//! [`MemoryStore`] implements [`TaskStore`] and [`ProfileStore`] on top of
//! in-memory maps. Every committed write pings a broadcast change channel;
//! each live subscription owns a task that re-runs its query on every ping
//! and pushes the full result set to its feed. Task writes are also published
//! as [`TaskWrite`] triggers, the way a hosted document store invokes a
//! server-side function on every write.
//!
//! The store can be switched offline to exercise transport failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::store::{
    ProfileDirectory, ProfileStore, Snapshot, Subscription, TaskFeed, TaskQuery, TaskStore,
};
use crate::types::{NewTaskRecord, TaskPatch, TaskRecord, TaskWrite, UserProfile};

/// Capacity of the change and trigger channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Snapshots buffered per subscription before the feed task waits.
const FEED_BUFFER: usize = 16;

#[derive(Debug)]
struct Inner {
    tasks: RwLock<BTreeMap<String, TaskRecord>>,
    profiles: RwLock<BTreeMap<String, UserProfile>>,
    changes: broadcast::Sender<()>,
    writes: broadcast::Sender<TaskWrite>,
    offline: AtomicBool,
}

/// Shared in-memory task and profile store. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let (writes, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(BTreeMap::new()),
                profiles: RwLock::new(BTreeMap::new()),
                changes,
                writes,
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to the write trigger stream.
    ///
    /// Only writes committed after this call are delivered.
    #[must_use]
    pub fn task_writes(&self) -> broadcast::Receiver<TaskWrite> {
        self.inner.writes.subscribe()
    }

    /// Number of live task subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    /// While offline, every operation fails with [`SyncError::TransportUnavailable`]
    /// and live feeds deliver that error instead of a snapshot.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        self.notify_change();
    }

    /// Inserts or replaces a record verbatim, bypassing id assignment.
    pub async fn put_task(&self, record: TaskRecord) {
        let before = {
            let mut tasks = self.inner.tasks.write().await;
            tasks.insert(record.id.clone(), record.clone())
        };
        self.publish_write(before, record);
    }

    /// Inserts or replaces a profile verbatim.
    pub async fn put_profile(&self, profile: UserProfile) {
        self.inner
            .profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(SyncError::unavailable("store is offline"))
        } else {
            Ok(())
        }
    }

    fn notify_change(&self) {
        // No receivers simply means nobody is subscribed.
        let _ = self.inner.changes.send(());
    }

    fn publish_write(&self, before: Option<TaskRecord>, after: TaskRecord) {
        let write = TaskWrite {
            task_id: after.id.clone(),
            before,
            after,
        };
        trace!(task_id = %write.task_id, "Publishing task write");
        let _ = self.inner.writes.send(write);
        self.notify_change();
    }

    async fn snapshot(inner: &Inner, query: &TaskQuery) -> Snapshot {
        if inner.offline.load(Ordering::SeqCst) {
            return Err(SyncError::unavailable("store is offline"));
        }
        let tasks = inner.tasks.read().await;
        Ok(tasks.values().filter(|r| query.matches(r)).cloned().collect())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>> {
        self.ensure_online()?;
        Self::snapshot(&self.inner, query).await
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.ensure_online()?;
        Ok(self.inner.tasks.read().await.get(id).cloned())
    }

    async fn create_task(&self, record: NewTaskRecord) -> Result<TaskRecord> {
        self.ensure_online()?;
        let record = record.into_record(Uuid::new_v4().to_string());
        self.inner
            .tasks
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        debug!(
            task_id = %record.id,
            user_id = %record.user_id,
            slot_id = record.slot_id,
            "Created task record"
        );
        self.publish_write(None, record.clone());
        Ok(record)
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord> {
        self.ensure_online()?;
        let (before, after) = {
            let mut tasks = self.inner.tasks.write().await;
            let record = tasks
                .get_mut(id)
                .ok_or_else(|| SyncError::not_found(format!("task {id}")))?;
            let before = record.clone();
            patch.apply(record);
            (before, record.clone())
        };
        debug!(task_id = %id, completed = after.completed, "Updated task record");
        self.publish_write(Some(before), after.clone());
        Ok(after)
    }

    async fn subscribe_tasks(&self, query: TaskQuery) -> Result<TaskFeed> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let mut changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            if tx.send(Self::snapshot(&inner, &query).await).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(()) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Change feed lagged; resending full snapshot");
                    }
                    Err(RecvError::Closed) => break,
                }
                if tx.send(Self::snapshot(&inner, &query).await).await.is_err() {
                    break;
                }
            }
            debug!("Task subscription ended");
        });

        debug!(subscribers = self.subscriber_count(), "Opened task subscription");
        Ok(TaskFeed::new(rx, Subscription::new(task)))
    }
}

#[async_trait]
impl ProfileDirectory for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.ensure_online()?;
        Ok(self.inner.profiles.read().await.get(user_id).cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        self.ensure_online()?;
        Ok(self.inner.profiles.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn upsert_email(
        &self,
        user_id: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<UserProfile> {
        self.ensure_online()?;
        let mut profiles = self.inner.profiles.write().await;
        let profile = profiles.entry(user_id.to_string()).or_insert_with(|| {
            debug!(user_id, "Creating user profile");
            let mut profile = UserProfile::new(user_id);
            profile.created_at = Some(now);
            profile
        });
        if profile.email.as_deref() != Some(email) {
            profile.email = Some(email.to_string());
            profile.updated_at = Some(now);
        }
        Ok(profile.clone())
    }

    async fn add_device_token(
        &self,
        user_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.ensure_online()?;
        let mut profiles = self.inner.profiles.write().await;
        let profile = profiles.entry(user_id.to_string()).or_insert_with(|| {
            let mut profile = UserProfile::new(user_id);
            profile.created_at = Some(now);
            profile
        });
        Ok(profile.add_token(token, now))
    }

    async fn remove_device_token(&self, user_id: &str, token: &str) -> Result<bool> {
        self.ensure_online()?;
        let mut profiles = self.inner.profiles.write().await;
        match profiles.get_mut(user_id) {
            Some(profile) => Ok(profile.remove_token(token)),
            None => {
                warn!(user_id, "Token removal for unknown profile");
                Ok(false)
            }
        }
    }
}
