//! Shared data types for SipSync.
//!
//! This module defines the hydration task model shared by the client and the
//! server: the fixed daily slot schedule, persisted task records, the derived
//! per-slot view, user profiles and notification payloads.
//!
//! Wire forms use `camelCase` field names to match the document store schema.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a daily slot (dense, `1..=4`).
pub type SlotId = u8;

/// Number of slots in every day.
pub const SLOT_COUNT: usize = 4;

/// Upper bound for `consumed_amount_ml`; one slot is half a litre.
pub const MAX_CONSUMED_ML: u16 = 500;

/// Water credited for one completed task, in millilitres.
pub const ML_PER_TASK: u32 = 500;

/// Label used when a user's email cannot be resolved.
pub const UNKNOWN_USER_LABEL: &str = "Unknown user";

/// Label used in notifications when a slot id is not part of the schedule.
pub const FALLBACK_SLOT_LABEL: &str = "Task";

/// Title of every "task completed" notification, local or pushed.
pub const COMPLETION_TITLE: &str = "💧 New task completed!";

/// Value of the `type` field in the push data payload.
pub const TASK_COMPLETED_KIND: &str = "task_completed";

/// One of the fixed daily time windows a task can be completed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub start: &'static str,
    pub end: &'static str,
    pub label: &'static str,
}

/// The daily schedule, ordered by slot id.
pub const SLOTS: [Slot; SLOT_COUNT] = [
    Slot {
        id: 1,
        start: "09:00",
        end: "11:00",
        label: "09:00 - 11:00",
    },
    Slot {
        id: 2,
        start: "11:00",
        end: "14:00",
        label: "11:00 - 14:00",
    },
    Slot {
        id: 3,
        start: "14:00",
        end: "16:00",
        label: "14:00 - 16:00",
    },
    Slot {
        id: 4,
        start: "16:00",
        end: "18:00",
        label: "16:00 - 18:00",
    },
];

impl Slot {
    /// Looks up a slot by id.
    ///
    /// ```rust
    /// use sipsync_core::types::Slot;
    ///
    /// assert_eq!(Slot::by_id(2).map(|s| s.label), Some("11:00 - 14:00"));
    /// assert!(Slot::by_id(9).is_none());
    /// ```
    #[must_use]
    pub fn by_id(id: SlotId) -> Option<&'static Slot> {
        SLOTS.iter().find(|slot| slot.id == id)
    }

    /// Returns `true` if `id` names a slot of the schedule.
    #[must_use]
    pub fn is_valid_id(id: SlotId) -> bool {
        Self::by_id(id).is_some()
    }

    /// Returns the slot label, or [`FALLBACK_SLOT_LABEL`] for unknown ids.
    #[must_use]
    pub fn label_for(id: SlotId) -> &'static str {
        Self::by_id(id).map_or(FALLBACK_SLOT_LABEL, |slot| slot.label)
    }
}

/// Persisted completion/consumption state for one user, one slot, one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub user_id: String,
    pub slot_id: SlotId,
    /// UTC instant of the local midnight that starts the record's day.
    pub date: DateTime<Utc>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consumed_amount_ml: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields of a record about to be created; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskRecord {
    pub user_id: String,
    pub slot_id: SlotId,
    pub date: DateTime<Utc>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewTaskRecord {
    /// A record created by a first completion action.
    #[must_use]
    pub fn completed(
        user_id: impl Into<String>,
        slot_id: SlotId,
        date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            slot_id,
            date,
            completed: true,
            completed_at: Some(now),
        }
    }

    /// Materializes the record under the given id.
    #[must_use]
    pub fn into_record(self, id: String) -> TaskRecord {
        TaskRecord {
            id,
            user_id: self.user_id,
            slot_id: self.slot_id,
            date: self.date,
            completed: self.completed,
            completed_at: self.completed_at,
            consumed_amount_ml: 0,
            updated_at: None,
        }
    }
}

/// Partial update of a task record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub completed: Option<bool>,
    /// `Some(None)` clears the timestamp.
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub consumed_amount_ml: Option<u16>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    /// Marks the record completed at `now`.
    #[must_use]
    pub fn complete(now: DateTime<Utc>) -> Self {
        Self {
            completed: Some(true),
            completed_at: Some(Some(now)),
            ..Self::default()
        }
    }

    /// Marks the record not completed and clears `completed_at`.
    #[must_use]
    pub fn uncomplete() -> Self {
        Self {
            completed: Some(false),
            completed_at: Some(None),
            ..Self::default()
        }
    }

    /// Sets the consumed amount and stamps `updated_at`.
    #[must_use]
    pub fn consumed(amount_ml: u16, now: DateTime<Utc>) -> Self {
        Self {
            consumed_amount_ml: Some(amount_ml),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Applies the patch in place.
    pub fn apply(&self, record: &mut TaskRecord) {
        if let Some(completed) = self.completed {
            record.completed = completed;
        }
        if let Some(completed_at) = self.completed_at {
            record.completed_at = completed_at;
        }
        if let Some(amount) = self.consumed_amount_ml {
            record.consumed_amount_ml = amount;
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = Some(updated_at);
        }
    }
}

/// Presentation-ready merge of a [`Slot`] and its (possibly absent) record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewTask {
    pub slot: Slot,
    /// Id of the backing record; `None` until the slot is first completed.
    pub record_id: Option<String>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub consumed_amount_ml: u16,
}

impl ViewTask {
    /// The default view of a slot with no record yet.
    #[must_use]
    pub fn empty(slot: Slot) -> Self {
        Self {
            slot,
            record_id: None,
            completed: false,
            completed_at: None,
            consumed_amount_ml: 0,
        }
    }

    /// Merges a slot with its record.
    #[must_use]
    pub fn from_record(slot: Slot, record: &TaskRecord) -> Self {
        Self {
            slot,
            record_id: Some(record.id.clone()),
            completed: record.completed,
            completed_at: record.completed_at,
            consumed_amount_ml: record.consumed_amount_ml,
        }
    }
}

/// Marks a `(user, slot)` completion as already seen by a watcher session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotifiedKey {
    pub user_id: String,
    pub slot_id: SlotId,
}

impl NotifiedKey {
    #[must_use]
    pub fn new(user_id: impl Into<String>, slot_id: SlotId) -> Self {
        Self {
            user_id: user_id.into(),
            slot_id,
        }
    }
}

impl From<&TaskRecord> for NotifiedKey {
    fn from(record: &TaskRecord) -> Self {
        Self::new(record.user_id.clone(), record.slot_id)
    }
}

/// A signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(uid: impl Into<String>, email: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            email,
        }
    }
}

/// Persisted per-user profile holding push registration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub device_tokens: BTreeSet<String>,
    #[serde(default)]
    pub last_token_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// An empty profile for `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            device_tokens: BTreeSet::new(),
            last_token_update: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Adds a device token and stamps `last_token_update`.
    ///
    /// Returns `true` if the token was not registered before.
    pub fn add_token(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        self.last_token_update = Some(now);
        self.device_tokens.insert(token.to_string())
    }

    /// Removes a device token. Returns `true` if it was registered.
    pub fn remove_token(&mut self, token: &str) -> bool {
        self.device_tokens.remove(token)
    }

    /// The email, or [`UNKNOWN_USER_LABEL`] when absent or empty.
    #[must_use]
    pub fn display_email(&self) -> &str {
        match self.email.as_deref() {
            Some(email) if !email.is_empty() => email,
            _ => UNKNOWN_USER_LABEL,
        }
    }
}

/// A resolved "someone completed a task" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub user_id: String,
    pub user_email: String,
    pub slot_id: SlotId,
    pub slot_label: String,
}

impl NotificationIntent {
    /// Notification body for this intent.
    #[must_use]
    pub fn body(&self) -> String {
        completion_body(&self.user_email, &self.slot_label)
    }
}

/// Formats the body shared by local and pushed completion notifications.
///
/// ```rust
/// use sipsync_core::types::completion_body;
///
/// assert_eq!(
///     completion_body("ana@example.com", "09:00 - 11:00"),
///     "ana@example.com completed the 09:00 - 11:00 task!"
/// );
/// ```
#[must_use]
pub fn completion_body(user_email: &str, slot_label: &str) -> String {
    format!("{user_email} completed the {slot_label} task!")
}

/// A document-store write notification for the task collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWrite {
    pub task_id: String,
    /// State before the write; absent for a creation.
    #[serde(default)]
    pub before: Option<TaskRecord>,
    pub after: TaskRecord,
}

impl TaskWrite {
    /// Returns `true` if the write moved the record from not-completed to completed.
    ///
    /// A creation counts when the new record is already completed.
    #[must_use]
    pub fn is_completion_transition(&self) -> bool {
        let was_completed = self.before.as_ref().is_some_and(|before| before.completed);
        !was_completed && self.after.completed
    }
}
