//! Completion push fan-out.
//!
//! Runs once per task write. When the write moves a task from not-completed
//! to completed, every *other* user's device tokens receive one multicast
//! push naming the owner and the slot.
//!
//! The handler never fails: directory or push outages and per-token delivery
//! failures are logged and recorded in the [`FanOutReport`], whose `sent`
//! field is what the trigger endpoint returns. It holds no state between
//! invocations, so concurrent writes are handled independently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sipsync_core::error::SyncError;
use sipsync_core::store::{bounded, ProfileDirectory};
use sipsync_core::types::{
    completion_body, Slot, TaskWrite, COMPLETION_TITLE, TASK_COMPLETED_KIND, UNKNOWN_USER_LABEL,
};
use tracing::{debug, info, warn};

use crate::push::{MulticastMessage, PushError, PushNotification, PushService};

/// What one fan-out did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    /// Whether the write was a completion transition.
    pub triggered: bool,
    /// Distinct tokens addressed.
    pub recipients: usize,
    /// Tokens the push service accepted.
    pub sent: usize,
    pub failed: usize,
    /// Tokens whose delivery failed; candidates for pruning.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_tokens: Vec<String>,
    /// Transport failure that stopped the fan-out, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FanOutReport {
    fn failed_with(recipients: usize, error: impl ToString) -> Self {
        Self {
            triggered: true,
            recipients,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Sends completion pushes for task writes.
pub struct FanOut {
    directory: Arc<dyn ProfileDirectory>,
    push: Arc<dyn PushService>,
    timeout: Duration,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FanOut {
    #[must_use]
    pub fn new(
        directory: Arc<dyn ProfileDirectory>,
        push: Arc<dyn PushService>,
        timeout: Duration,
    ) -> Self {
        Self {
            directory,
            push,
            timeout,
        }
    }

    /// Handles one task write.
    pub async fn handle(&self, write: &TaskWrite) -> FanOutReport {
        if !write.is_completion_transition() {
            debug!(task_id = %write.task_id, "Not a completion transition; no push");
            return FanOutReport::default();
        }

        let owner = write.after.user_id.as_str();
        let slot_id = write.after.slot_id;

        let owner_email = match bounded(self.timeout, self.directory.get_profile(owner)).await {
            Ok(Some(profile)) => profile.display_email().to_string(),
            Ok(None) => UNKNOWN_USER_LABEL.to_string(),
            Err(err) => return self.transport_failure(write, 0, &err),
        };

        let tokens = match self.recipient_tokens(owner).await {
            Ok(tokens) => tokens,
            Err(err) => return self.transport_failure(write, 0, &err),
        };

        if tokens.is_empty() {
            info!(task_id = %write.task_id, "No device tokens to notify");
            return FanOutReport {
                triggered: true,
                ..FanOutReport::default()
            };
        }

        let message = MulticastMessage {
            notification: PushNotification {
                title: COMPLETION_TITLE.to_string(),
                body: completion_body(&owner_email, Slot::label_for(slot_id)),
            },
            data: BTreeMap::from([
                ("type".to_string(), TASK_COMPLETED_KIND.to_string()),
                ("taskId".to_string(), write.task_id.clone()),
                ("userId".to_string(), owner.to_string()),
                ("slotId".to_string(), slot_id.to_string()),
            ]),
            tokens,
        };
        let recipients = message.tokens.len();

        let report = match tokio::time::timeout(self.timeout, self.push.send_multicast(&message))
            .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => return self.transport_failure(write, recipients, &err),
            Err(_) => {
                return self.transport_failure(write, recipients, &PushError::Timeout(self.timeout))
            }
        };

        let failed: Vec<String> = report
            .failed_tokens(&message.tokens)
            .into_iter()
            .map(|(token, reason)| {
                warn!(
                    task_id = %write.task_id,
                    token = %token_prefix(&token),
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Push delivery failed; token is a pruning candidate"
                );
                token
            })
            .collect();

        info!(
            task_id = %write.task_id,
            user_id = %owner,
            slot_id,
            sent = report.success_count,
            failed = report.failure_count,
            "Completion push fan-out finished"
        );

        FanOutReport {
            triggered: true,
            recipients,
            sent: report.success_count,
            failed: report.failure_count,
            failed_tokens: failed,
            error: None,
        }
    }

    /// Distinct device tokens of every user except `owner`.
    async fn recipient_tokens(&self, owner: &str) -> Result<Vec<String>, SyncError> {
        let profiles = bounded(self.timeout, self.directory.list_profiles()).await?;
        let tokens: BTreeSet<String> = profiles
            .into_iter()
            .filter(|profile| profile.user_id != owner)
            .flat_map(|profile| profile.device_tokens)
            .filter(|token| !token.is_empty())
            .collect();
        Ok(tokens.into_iter().collect())
    }

    fn transport_failure(
        &self,
        write: &TaskWrite,
        recipients: usize,
        err: &dyn std::fmt::Display,
    ) -> FanOutReport {
        warn!(task_id = %write.task_id, error = %err, "Completion push fan-out failed");
        FanOutReport::failed_with(recipients, err)
    }
}

fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use sipsync_core::memory::MemoryStore;
    use sipsync_core::types::{TaskRecord, UserProfile};

    use crate::push::{MulticastReport, TokenResult};

    /// Records messages and answers with a fixed per-token outcome.
    struct RecordingPush {
        sent: Mutex<Vec<MulticastMessage>>,
        reject: BTreeSet<String>,
        outage: Option<PushError>,
    }

    impl RecordingPush {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                reject: BTreeSet::new(),
                outage: None,
            }
        }

        fn rejecting(tokens: &[&str]) -> Self {
            Self {
                reject: tokens.iter().map(ToString::to_string).collect(),
                ..Self::new()
            }
        }

        fn down(err: PushError) -> Self {
            Self {
                outage: Some(err),
                ..Self::new()
            }
        }

        fn messages(&self) -> Vec<MulticastMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushService for RecordingPush {
        async fn send_multicast(
            &self,
            message: &MulticastMessage,
        ) -> Result<MulticastReport, PushError> {
            if let Some(err) = &self.outage {
                return Err(err.clone());
            }
            self.sent.lock().unwrap().push(message.clone());
            let responses: Vec<TokenResult> = message
                .tokens
                .iter()
                .map(|token| TokenResult {
                    success: !self.reject.contains(token),
                    error: self
                        .reject
                        .contains(token)
                        .then(|| "unregistered".to_string()),
                })
                .collect();
            let success_count = responses.iter().filter(|r| r.success).count();
            Ok(MulticastReport {
                success_count,
                failure_count: responses.len() - success_count,
                responses,
            })
        }
    }

    fn record(user: &str, slot: u8, completed: bool) -> TaskRecord {
        TaskRecord {
            id: "task-1".to_string(),
            user_id: user.to_string(),
            slot_id: slot,
            date: Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap(),
            completed,
            completed_at: None,
            consumed_amount_ml: 0,
            updated_at: None,
        }
    }

    fn update(user: &str, slot: u8, before: bool, after: bool) -> TaskWrite {
        TaskWrite {
            task_id: "task-1".to_string(),
            before: Some(record(user, slot, before)),
            after: record(user, slot, after),
        }
    }

    async fn profile(store: &MemoryStore, user: &str, email: Option<&str>, tokens: &[&str]) {
        let mut profile = UserProfile::new(user);
        profile.email = email.map(ToString::to_string);
        profile.device_tokens = tokens.iter().map(ToString::to_string).collect();
        store.put_profile(profile).await;
    }

    async fn team() -> MemoryStore {
        let store = MemoryStore::new();
        profile(&store, "owner", Some("owner@example.com"), &["owner-phone"]).await;
        profile(&store, "b", Some("b@example.com"), &["b-phone", "b-laptop"]).await;
        profile(&store, "c", None, &["c-phone"]).await;
        store
    }

    fn fanout(store: &MemoryStore, push: &Arc<RecordingPush>) -> FanOut {
        FanOut::new(
            Arc::new(store.clone()),
            push.clone(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn completion_pushes_to_other_users() {
        let store = team().await;
        let push = Arc::new(RecordingPush::new());

        let report = fanout(&store, &push).handle(&update("owner", 2, false, true)).await;

        assert!(report.triggered);
        assert_eq!(report.sent, 3);
        assert_eq!(report.recipients, 3);
        assert!(report.error.is_none());

        let messages = push.messages();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.tokens, vec!["b-laptop", "b-phone", "c-phone"]);
        assert_eq!(message.notification.title, COMPLETION_TITLE);
        assert_eq!(
            message.notification.body,
            "owner@example.com completed the 11:00 - 14:00 task!"
        );
        assert_eq!(message.data["type"], "task_completed");
        assert_eq!(message.data["taskId"], "task-1");
        assert_eq!(message.data["userId"], "owner");
        assert_eq!(message.data["slotId"], "2");
    }

    #[tokio::test]
    async fn completed_creation_triggers() {
        let store = team().await;
        let push = Arc::new(RecordingPush::new());
        let write = TaskWrite {
            task_id: "task-1".to_string(),
            before: None,
            after: record("owner", 1, true),
        };

        assert_eq!(fanout(&store, &push).handle(&write).await.sent, 3);
    }

    #[tokio::test]
    async fn non_transitions_do_nothing() {
        let store = team().await;
        let push = Arc::new(RecordingPush::new());
        let fan = fanout(&store, &push);

        for write in [
            update("owner", 1, true, true),
            update("owner", 1, true, false),
            update("owner", 1, false, false),
            TaskWrite {
                task_id: "task-1".to_string(),
                before: None,
                after: record("owner", 1, false),
            },
        ] {
            let report = fan.handle(&write).await;
            assert!(!report.triggered);
            assert_eq!(report.sent, 0);
        }
        assert!(push.messages().is_empty());
    }

    #[tokio::test]
    async fn no_other_tokens_sends_nothing() {
        let store = MemoryStore::new();
        profile(&store, "owner", Some("owner@example.com"), &["owner-phone"]).await;
        profile(&store, "b", None, &[]).await;
        let push = Arc::new(RecordingPush::new());

        let report = fanout(&store, &push).handle(&update("owner", 1, false, true)).await;

        assert!(report.triggered);
        assert_eq!(report.sent, 0);
        assert!(report.error.is_none());
        assert!(push.messages().is_empty());
    }

    #[tokio::test]
    async fn shared_tokens_are_sent_once() {
        let store = team().await;
        profile(&store, "d", None, &["b-phone"]).await;
        let push = Arc::new(RecordingPush::new());

        let report = fanout(&store, &push).handle(&update("owner", 1, false, true)).await;
        assert_eq!(report.recipients, 3);
    }

    #[tokio::test]
    async fn unknown_owner_and_slot_use_fallback_labels() {
        let store = team().await;
        let push = Arc::new(RecordingPush::new());

        fanout(&store, &push).handle(&update("stranger", 9, false, true)).await;

        let body = &push.messages()[0].notification.body;
        assert_eq!(body, "Unknown user completed the Task task!");
        assert_eq!(push.messages()[0].tokens.len(), 4);
    }

    #[tokio::test]
    async fn partial_failure_is_reported_not_raised() {
        let store = team().await;
        let push = Arc::new(RecordingPush::rejecting(&["c-phone"]));

        let report = fanout(&store, &push).handle(&update("owner", 1, false, true)).await;

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_tokens, vec!["c-phone"]);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn push_outage_reports_zero() {
        let store = team().await;
        let push = Arc::new(RecordingPush::down(PushError::Unavailable(
            "connection refused".to_string(),
        )));

        let report = fanout(&store, &push).handle(&update("owner", 1, false, true)).await;

        assert!(report.triggered);
        assert_eq!(report.sent, 0);
        assert_eq!(report.recipients, 3);
        assert!(report.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn directory_outage_reports_zero() {
        let store = team().await;
        store.set_offline(true);
        let push = Arc::new(RecordingPush::new());

        let report = fanout(&store, &push).handle(&update("owner", 1, false, true)).await;

        assert_eq!(report.sent, 0);
        assert!(report.error.is_some());
        assert!(push.messages().is_empty());
    }

    #[tokio::test]
    async fn store_writes_drive_fanout() {
        use sipsync_core::store::TaskStore;
        use sipsync_core::types::{NewTaskRecord, TaskPatch};

        let store = team().await;
        let push = Arc::new(RecordingPush::new());
        let fan = fanout(&store, &push);
        let mut writes = store.task_writes();

        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let day = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        let created = store
            .create_task(NewTaskRecord::completed("b", 3, day, now))
            .await
            .unwrap();
        store
            .update_task(&created.id, TaskPatch::complete(now))
            .await
            .unwrap();

        let first = fan.handle(&writes.recv().await.unwrap()).await;
        let second = fan.handle(&writes.recv().await.unwrap()).await;

        // b's own tokens are excluded; owner and c remain.
        assert_eq!(first.sent, 2);
        assert!(!second.triggered);
        assert_eq!(push.messages().len(), 1);
    }

    #[test]
    fn token_prefix_truncates() {
        assert_eq!(token_prefix("abcdefghijkl"), "abcdefgh…");
        assert_eq!(token_prefix("abc"), "abc…");
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = FanOutReport {
            triggered: true,
            recipients: 2,
            sent: 1,
            failed: 1,
            failed_tokens: vec!["t".to_string()],
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failedTokens"][0], "t");
        assert!(json.get("error").is_none());
    }
}
