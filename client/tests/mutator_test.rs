//! Integration tests for the completion mutator.
//!
//! These tests run the mutator against the in-memory store and check the
//! create-or-update semantics, validation order and the amount policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sipsync_client::dispatcher::{LocalDispatcher, LogNotifier};
use sipsync_client::identity::{IdentityProvider, SessionIdentity};
use sipsync_client::mutator::{CompletionMutator, MutationOutcome};
use sipsync_core::day::{Clock, DayPolicy, FixedClock};
use sipsync_core::error::SyncError;
use sipsync_core::memory::MemoryStore;
use sipsync_core::store::{TaskQuery, TaskStore};
use sipsync_core::types::{Identity, NewTaskRecord, TaskRecord};
use tokio_test::{assert_err, assert_ok};

const TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Test Helpers
// =============================================================================

struct Fixture {
    store: MemoryStore,
    clock: Arc<FixedClock>,
    identity: SessionIdentity,
    notifier: Arc<LogNotifier>,
    mutator: CompletionMutator,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap(),
    ));
    let identity =
        SessionIdentity::signed_in(Identity::new("me", Some("me@example.com".to_string())));
    let notifier = Arc::new(LogNotifier::granted());
    let dispatcher = Arc::new(LocalDispatcher::new(
        notifier.clone(),
        Duration::from_secs(5),
    ));
    let mutator = CompletionMutator::new(
        Arc::new(store.clone()),
        Arc::new(identity.clone()),
        clock.clone(),
        DayPolicy::utc(),
        TIMEOUT,
    )
    .with_local_notifications(dispatcher);

    Fixture {
        store,
        clock,
        identity,
        notifier,
        mutator,
    }
}

async fn records_for(store: &MemoryStore, user: &str, slot: u8) -> Vec<TaskRecord> {
    store
        .query_tasks(&TaskQuery::new().with_user(user).with_slot(slot))
        .await
        .unwrap()
}

fn record_id(outcome: &MutationOutcome) -> String {
    match outcome {
        MutationOutcome::Created { record_id }
        | MutationOutcome::Completed { record_id }
        | MutationOutcome::Refreshed { record_id }
        | MutationOutcome::Uncompleted { record_id }
        | MutationOutcome::AmountSet { record_id, .. } => record_id.clone(),
        other => panic!("outcome has no record: {other:?}"),
    }
}

// =============================================================================
// Complete / Uncomplete
// =============================================================================

/// First completion creates a record dated at the start of today.
#[tokio::test]
async fn first_completion_creates_record() {
    let f = fixture();

    let outcome = f.mutator.complete_slot(2).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Created { .. }));

    let records = records_for(&f.store, "me", 2).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.completed);
    assert_eq!(record.completed_at, Some(f.clock.now()));
    assert_eq!(record.date, Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap());
    assert_eq!(record.consumed_amount_ml, 0);
}

/// Completing twice keeps one record and refreshes the timestamp.
#[tokio::test]
async fn recompletion_refreshes_timestamp() {
    let f = fixture();
    let created = f.mutator.complete_slot(1).await.unwrap();

    f.clock.advance(chrono::Duration::minutes(10));
    let refreshed = f.mutator.complete_slot(1).await.unwrap();
    assert!(matches!(refreshed, MutationOutcome::Refreshed { .. }));
    assert_eq!(record_id(&created), record_id(&refreshed));

    let records = records_for(&f.store, "me", 1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].completed_at, Some(f.clock.now()));
}

/// Un-completing clears the flag and the timestamp; repeating it is a no-op.
#[tokio::test]
async fn uncomplete_is_idempotent() {
    let f = fixture();
    assert_ok!(f.mutator.complete_slot(3).await);

    let outcome = f.mutator.uncomplete_slot(3).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Uncompleted { .. }));
    let records = records_for(&f.store, "me", 3).await;
    assert!(!records[0].completed);
    assert!(records[0].completed_at.is_none());

    assert_eq!(
        f.mutator.uncomplete_slot(3).await.unwrap(),
        MutationOutcome::Unchanged
    );
}

/// Un-completing a slot that was never completed writes nothing.
#[tokio::test]
async fn uncomplete_without_record_is_unchanged() {
    let f = fixture();
    assert_eq!(
        f.mutator.uncomplete_slot(4).await.unwrap(),
        MutationOutcome::Unchanged
    );
    assert!(records_for(&f.store, "me", 4).await.is_empty());
}

/// Completing after an un-complete reuses the same record.
#[tokio::test]
async fn recomplete_reuses_record() {
    let f = fixture();
    let created = f.mutator.complete_slot(1).await.unwrap();
    f.mutator.uncomplete_slot(1).await.unwrap();

    let outcome = f.mutator.complete_slot(1).await.unwrap();
    assert_eq!(
        outcome,
        MutationOutcome::Completed {
            record_id: record_id(&created)
        }
    );
    assert_eq!(records_for(&f.store, "me", 1).await.len(), 1);
}

/// Yesterday's record does not satisfy today's completion.
#[tokio::test]
async fn new_day_creates_new_record() {
    let f = fixture();
    f.mutator.complete_slot(1).await.unwrap();

    f.clock.advance(chrono::Duration::days(1));
    let outcome = f.mutator.complete_slot(1).await.unwrap();
    assert!(matches!(outcome, MutationOutcome::Created { .. }));
    assert_eq!(records_for(&f.store, "me", 1).await.len(), 2);
}

/// Duplicate records from a create race are all un-completed.
#[tokio::test]
async fn uncomplete_clears_duplicates() {
    let f = fixture();
    let now = f.clock.now();
    let day = DayPolicy::utc().day_of(now);
    for _ in 0..2 {
        f.store
            .create_task(NewTaskRecord::completed("me", 2, day.start(), now))
            .await
            .unwrap();
    }

    f.mutator.uncomplete_slot(2).await.unwrap();
    let records = records_for(&f.store, "me", 2).await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.completed));
}

/// Slot ids outside the schedule are rejected before anything is written.
#[tokio::test]
async fn invalid_slot_is_rejected() {
    let f = fixture();
    assert_eq!(
        f.mutator.complete_slot(0).await,
        Err(SyncError::InvalidSlot(0))
    );
    assert_eq!(
        f.mutator.uncomplete_slot(5).await,
        Err(SyncError::InvalidSlot(5))
    );
    assert!(f.store.query_tasks(&TaskQuery::new()).await.unwrap().is_empty());
}

/// Without a signed-in user nothing is written.
#[tokio::test]
async fn signed_out_user_writes_nothing() {
    let f = fixture();
    f.identity.sign_out();

    assert_eq!(
        f.mutator.complete_slot(1).await.unwrap(),
        MutationOutcome::Unauthenticated
    );
    assert_eq!(
        f.mutator.set_consumed_amount("any", 100).await.unwrap(),
        MutationOutcome::Unauthenticated
    );
    assert!(f.store.query_tasks(&TaskQuery::new()).await.unwrap().is_empty());
}

/// Signed out, invalid input is still a no-op rather than an error.
#[tokio::test]
async fn signed_out_user_skips_validation() {
    let f = fixture();
    f.identity.sign_out();

    assert_eq!(
        f.mutator.complete_slot(9).await,
        Ok(MutationOutcome::Unauthenticated)
    );
    assert_eq!(
        f.mutator.uncomplete_slot(9).await,
        Ok(MutationOutcome::Unauthenticated)
    );
    assert_eq!(
        f.mutator.set_consumed_amount("any", 600).await,
        Ok(MutationOutcome::Unauthenticated)
    );
    let commit = assert_ok!(f.mutator.commit_amount("any", -1).await);
    assert_eq!(commit.recorded, MutationOutcome::Unauthenticated);
    assert!(commit.follow_up.is_none());
    assert!(f.store.query_tasks(&TaskQuery::new()).await.unwrap().is_empty());
}

/// A store outage surfaces as a transport error.
#[tokio::test]
async fn offline_store_is_transport_error() {
    let f = fixture();
    f.store.set_offline(true);

    let err = assert_err!(f.mutator.complete_slot(1).await);
    assert!(err.is_transport());
}

// =============================================================================
// Local Notifications
// =============================================================================

/// Only a new completion shows the user's own notification.
#[tokio::test]
async fn own_new_completion_notifies_once() {
    let f = fixture();

    f.mutator.complete_slot(1).await.unwrap();
    f.mutator.complete_slot(1).await.unwrap();
    f.mutator.uncomplete_slot(1).await.unwrap();

    let shown = f.notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].body, "me@example.com completed the 09:00 - 11:00 task!");
}

// =============================================================================
// Consumed Amount
// =============================================================================

/// Amounts in range are stored without touching the completion flag.
#[tokio::test]
async fn amount_is_stored() {
    let f = fixture();
    let id = record_id(&f.mutator.complete_slot(1).await.unwrap());

    let outcome = f.mutator.set_consumed_amount(&id, 250).await.unwrap();
    assert_eq!(
        outcome,
        MutationOutcome::AmountSet {
            record_id: id.clone(),
            amount_ml: 250
        }
    );
    let record = f.store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(record.consumed_amount_ml, 250);
    assert!(record.completed);
    assert!(record.updated_at.is_some());
}

/// Out-of-range amounts are rejected and nothing changes.
#[tokio::test]
async fn amount_out_of_range_is_rejected() {
    let f = fixture();
    let id = record_id(&f.mutator.complete_slot(1).await.unwrap());

    assert_eq!(
        f.mutator.set_consumed_amount(&id, 501).await,
        Err(SyncError::InvalidAmount(501))
    );
    assert_eq!(
        f.mutator.set_consumed_amount(&id, -1).await,
        Err(SyncError::InvalidAmount(-1))
    );
    let record = f.store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(record.consumed_amount_ml, 0);
}

/// Unknown records are reported as not found.
#[tokio::test]
async fn amount_for_missing_record_is_not_found() {
    let f = fixture();
    let err = assert_err!(f.mutator.set_consumed_amount("missing", 100).await);
    assert!(matches!(err, SyncError::NotFound(_)));
}

/// Another user's record cannot be written.
#[tokio::test]
async fn amount_for_foreign_record_is_denied() {
    let f = fixture();
    let now = f.clock.now();
    let day = DayPolicy::utc().day_of(now);
    let foreign = f
        .store
        .create_task(NewTaskRecord::completed("someone-else", 1, day.start(), now))
        .await
        .unwrap();

    let err = f
        .mutator
        .set_consumed_amount(&foreign.id, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PermissionDenied(_)));
    let record = f.store.get_task(&foreign.id).await.unwrap().unwrap();
    assert_eq!(record.consumed_amount_ml, 0);
}

/// A full glass on an open slot completes it.
#[tokio::test]
async fn commit_full_amount_completes() {
    let f = fixture();
    let id = record_id(&f.mutator.complete_slot(2).await.unwrap());
    f.mutator.uncomplete_slot(2).await.unwrap();

    let commit = f.mutator.commit_amount(&id, 500).await.unwrap();
    assert_eq!(
        commit.follow_up,
        Some(MutationOutcome::Completed {
            record_id: id.clone()
        })
    );
    let record = f.store.get_task(&id).await.unwrap().unwrap();
    assert!(record.completed);
    assert_eq!(record.consumed_amount_ml, 500);
}

/// An empty glass on a completed slot un-completes it.
#[tokio::test]
async fn commit_zero_amount_uncompletes() {
    let f = fixture();
    let id = record_id(&f.mutator.complete_slot(2).await.unwrap());

    let commit = f.mutator.commit_amount(&id, 0).await.unwrap();
    assert_eq!(
        commit.follow_up,
        Some(MutationOutcome::Uncompleted {
            record_id: id.clone()
        })
    );
    assert!(!f.store.get_task(&id).await.unwrap().unwrap().completed);
}

/// Partial amounts leave the completion flag alone.
#[tokio::test]
async fn commit_partial_amount_has_no_follow_up() {
    let f = fixture();
    let id = record_id(&f.mutator.complete_slot(2).await.unwrap());

    let commit = f.mutator.commit_amount(&id, 300).await.unwrap();
    assert!(commit.follow_up.is_none());
    assert!(f.store.get_task(&id).await.unwrap().unwrap().completed);
}
