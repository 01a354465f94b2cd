//! Completion mutator.
//!
//! Applies completion, un-completion and consumption writes for the signed-in
//! user with create-or-update semantics. Existence is always checked against
//! the store, never against a cached view.
//!
//! The coupling between the consumed amount and the completion flag is a
//! separate, explicit step ([`amount_policy`]); the primitive operations never
//! apply it on their own. [`CompletionMutator::commit_amount`] runs the write
//! and then the policy, which is what a slider release does.

use std::sync::Arc;
use std::time::Duration;

use sipsync_core::day::{Clock, Day, DayPolicy};
use sipsync_core::error::{Result, SyncError};
use sipsync_core::store::{bounded, TaskQuery, TaskStore};
use sipsync_core::types::{
    Identity, NewTaskRecord, NotificationIntent, Slot, SlotId, TaskPatch, TaskRecord,
    MAX_CONSUMED_ML, UNKNOWN_USER_LABEL,
};
use tracing::{debug, info};

use crate::dispatcher::LocalDispatcher;
use crate::identity::IdentityProvider;
use crate::reconciler::latest_record;

/// What a mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// A new completed record was created.
    Created { record_id: String },
    /// An existing, not-completed record was completed.
    Completed { record_id: String },
    /// An already-completed record had its timestamp refreshed.
    Refreshed { record_id: String },
    /// A completed record was un-completed.
    Uncompleted { record_id: String },
    /// The consumed amount was stored.
    AmountSet { record_id: String, amount_ml: u16 },
    /// Nothing to do.
    Unchanged,
    /// Nobody is signed in; nothing was written.
    Unauthenticated,
}

impl MutationOutcome {
    /// Returns `true` for a not-completed to completed transition.
    #[must_use]
    pub fn is_new_completion(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Completed { .. })
    }
}

/// Follow-up the amount policy asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Complete,
    Uncomplete,
}

/// Couples the consumed amount to the completion flag.
///
/// A full glass on a not-completed slot completes it; an empty glass on a
/// completed slot un-completes it. Anything in between leaves it alone.
///
/// ```rust
/// use sipsync_client::mutator::{amount_policy, PolicyAction};
///
/// assert_eq!(amount_policy(false, 500), Some(PolicyAction::Complete));
/// assert_eq!(amount_policy(true, 0), Some(PolicyAction::Uncomplete));
/// assert_eq!(amount_policy(true, 500), None);
/// assert_eq!(amount_policy(false, 250), None);
/// ```
#[must_use]
pub fn amount_policy(completed: bool, amount_ml: u16) -> Option<PolicyAction> {
    match (completed, amount_ml) {
        (false, MAX_CONSUMED_ML) => Some(PolicyAction::Complete),
        (true, 0) => Some(PolicyAction::Uncomplete),
        _ => None,
    }
}

/// Result of [`CompletionMutator::commit_amount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountCommit {
    pub recorded: MutationOutcome,
    pub follow_up: Option<MutationOutcome>,
}

/// Writes the signed-in user's task state.
pub struct CompletionMutator {
    store: Arc<dyn TaskStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    day_policy: DayPolicy,
    timeout: Duration,
    local: Option<Arc<LocalDispatcher>>,
}

impl std::fmt::Debug for CompletionMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionMutator")
            .field("day_policy", &self.day_policy)
            .field("timeout", &self.timeout)
            .field("local_notifications", &self.local.is_some())
            .finish_non_exhaustive()
    }
}

impl CompletionMutator {
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        day_policy: DayPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            clock,
            day_policy,
            timeout,
            local: None,
        }
    }

    /// Shows a local notification for each of the user's own new completions.
    #[must_use]
    pub fn with_local_notifications(mut self, dispatcher: Arc<LocalDispatcher>) -> Self {
        self.local = Some(dispatcher);
        self
    }

    /// Completes `slot_id` for today, creating the record on first completion.
    ///
    /// Signed out, this is a no-op whatever the input. Re-completing an already-completed slot refreshes `completedAt`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSlot`] for an id outside the schedule, or any store failure.
    pub async fn complete_slot(&self, slot_id: SlotId) -> Result<MutationOutcome> {
        let Some(identity) = self.identity.current() else {
            debug!(slot_id, "Complete ignored: not signed in");
            return Ok(MutationOutcome::Unauthenticated);
        };
        let Some(slot) = Slot::by_id(slot_id) else {
            return Err(SyncError::InvalidSlot(slot_id));
        };

        let now = self.clock.now();
        let day = self.day_policy.day_of(now);
        let existing = self.records_for_slot(&identity.uid, slot_id, day).await?;

        let outcome = match latest_record(&existing) {
            None => {
                let record = NewTaskRecord::completed(&identity.uid, slot_id, day.start(), now);
                let created = bounded(self.timeout, self.store.create_task(record)).await?;
                MutationOutcome::Created {
                    record_id: created.id,
                }
            }
            Some(record) => {
                let was_completed = record.completed;
                let updated = bounded(
                    self.timeout,
                    self.store.update_task(&record.id, TaskPatch::complete(now)),
                )
                .await?;
                if was_completed {
                    MutationOutcome::Refreshed {
                        record_id: updated.id,
                    }
                } else {
                    MutationOutcome::Completed {
                        record_id: updated.id,
                    }
                }
            }
        };

        info!(user_id = %identity.uid, slot_id, ?outcome, "Completed slot");
        if outcome.is_new_completion() {
            self.notify_own_completion(&identity, slot).await;
        }
        Ok(outcome)
    }

    /// Un-completes `slot_id` for today. No-op when no completed record exists.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSlot`] for an id outside the schedule, or any store failure.
    pub async fn uncomplete_slot(&self, slot_id: SlotId) -> Result<MutationOutcome> {
        let Some(identity) = self.identity.current() else {
            debug!(slot_id, "Uncomplete ignored: not signed in");
            return Ok(MutationOutcome::Unauthenticated);
        };
        if !Slot::is_valid_id(slot_id) {
            return Err(SyncError::InvalidSlot(slot_id));
        }

        let day = self.day_policy.day_of(self.clock.now());
        let existing = self.records_for_slot(&identity.uid, slot_id, day).await?;

        // Duplicates from a create race are all cleared so none resurfaces.
        let mut outcome = MutationOutcome::Unchanged;
        for record in existing.iter().filter(|r| r.completed) {
            let updated = bounded(
                self.timeout,
                self.store.update_task(&record.id, TaskPatch::uncomplete()),
            )
            .await?;
            outcome = MutationOutcome::Uncompleted {
                record_id: updated.id,
            };
        }

        info!(user_id = %identity.uid, slot_id, ?outcome, "Uncompleted slot");
        Ok(outcome)
    }

    /// Stores the consumed amount of an existing record.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidAmount`] if `amount_ml` is outside `0..=500`
    /// - [`SyncError::NotFound`] if `record_id` is unknown
    /// - [`SyncError::PermissionDenied`] if the record belongs to another user
    pub async fn set_consumed_amount(
        &self,
        record_id: &str,
        amount_ml: i32,
    ) -> Result<MutationOutcome> {
        match self.write_amount(record_id, amount_ml).await? {
            Some(record) => Ok(MutationOutcome::AmountSet {
                record_id: record.id,
                amount_ml: record.consumed_amount_ml,
            }),
            None => Ok(MutationOutcome::Unauthenticated),
        }
    }

    /// Stores the amount, then applies [`amount_policy`] to the stored record.
    ///
    /// # Errors
    ///
    /// Same as [`set_consumed_amount`](Self::set_consumed_amount), plus any
    /// failure of the follow-up completion write.
    pub async fn commit_amount(&self, record_id: &str, amount_ml: i32) -> Result<AmountCommit> {
        let Some(record) = self.write_amount(record_id, amount_ml).await? else {
            return Ok(AmountCommit {
                recorded: MutationOutcome::Unauthenticated,
                follow_up: None,
            });
        };

        let follow_up = match amount_policy(record.completed, record.consumed_amount_ml) {
            Some(PolicyAction::Complete) => Some(self.complete_slot(record.slot_id).await?),
            Some(PolicyAction::Uncomplete) => Some(self.uncomplete_slot(record.slot_id).await?),
            None => None,
        };

        Ok(AmountCommit {
            recorded: MutationOutcome::AmountSet {
                record_id: record.id,
                amount_ml: record.consumed_amount_ml,
            },
            follow_up,
        })
    }

    async fn write_amount(&self, record_id: &str, amount_ml: i32) -> Result<Option<TaskRecord>> {
        let Some(identity) = self.identity.current() else {
            debug!(record_id, "Amount ignored: not signed in");
            return Ok(None);
        };
        let amount = u16::try_from(amount_ml)
            .ok()
            .filter(|amount| *amount <= MAX_CONSUMED_ML)
            .ok_or(SyncError::InvalidAmount(amount_ml))?;

        let record = bounded(self.timeout, self.store.get_task(record_id))
            .await?
            .ok_or_else(|| SyncError::not_found(format!("task {record_id}")))?;
        if record.user_id != identity.uid {
            return Err(SyncError::permission_denied(format!(
                "task {record_id} belongs to another user"
            )));
        }

        let now = self.clock.now();
        let updated = bounded(
            self.timeout,
            self.store
                .update_task(record_id, TaskPatch::consumed(amount, now)),
        )
        .await?;
        debug!(record_id, amount_ml = amount, "Stored consumed amount");
        Ok(Some(updated))
    }

    async fn records_for_slot(
        &self,
        user_id: &str,
        slot_id: SlotId,
        day: Day,
    ) -> Result<Vec<TaskRecord>> {
        let query = TaskQuery::new()
            .with_user(user_id)
            .with_slot(slot_id)
            .on_day(day);
        bounded(self.timeout, self.store.query_tasks(&query)).await
    }

    async fn notify_own_completion(&self, identity: &Identity, slot: &Slot) {
        let Some(dispatcher) = &self.local else {
            return;
        };
        let intent = NotificationIntent {
            user_id: identity.uid.clone(),
            user_email: identity
                .email
                .clone()
                .filter(|email| !email.is_empty())
                .unwrap_or_else(|| UNKNOWN_USER_LABEL.to_string()),
            slot_id: slot.id,
            slot_label: slot.label.to_string(),
        };
        dispatcher.dispatch(&intent).await;
    }
}
