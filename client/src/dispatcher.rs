//! Local notification dispatcher.
//!
//! Turns notification intents into in-app notifications through an injected
//! [`Notifier`], applying the permission policy: show when granted, ask once
//! when never asked, drop silently when denied.
//!
//! Also maps delivered push payloads to system notifications for the case
//! where the application is in the background.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sipsync_core::types::{completion_body, NotificationIntent, COMPLETION_TITLE};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Title of a background push without a title.
pub const BACKGROUND_DEFAULT_TITLE: &str = "💧 Water reminder";

/// Body of a background push without a body.
pub const BACKGROUND_DEFAULT_BODY: &str = "You have a new notification!";

/// Tag shared by background push notifications.
pub const BACKGROUND_TAG: &str = "water-reminder";

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Never asked.
    Default,
    Granted,
    Denied,
}

/// Buttons offered on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Open,
    Close,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    /// `None` keeps the notification until the user acts on it.
    pub dismiss_after: Option<Duration>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

/// Platform notification runtime.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Prompts the user and returns the resulting permission.
    async fn request_permission(&self) -> Permission;

    fn show(&self, notification: LocalNotification);

    /// Brings the application window to the front.
    fn focus_app(&self);
}

/// What happened to a dispatched intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Shown,
    /// Permission denied or never granted; the intent was dropped.
    Suppressed,
}

/// What a notification activation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Focused,
    Dismissed,
}

/// Shows completion notifications, subject to permission.
pub struct LocalDispatcher {
    notifier: Arc<dyn Notifier>,
    dismiss_after: Duration,
    /// Answer to the one-time prompt; concurrent dispatches wait on it.
    prompt: OnceCell<Permission>,
}

impl std::fmt::Debug for LocalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDispatcher")
            .field("dismiss_after", &self.dismiss_after)
            .field("prompt", &self.prompt.get())
            .finish_non_exhaustive()
    }
}

impl LocalDispatcher {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, dismiss_after: Duration) -> Self {
        Self {
            notifier,
            dismiss_after,
            prompt: OnceCell::new(),
        }
    }

    /// Shows the "task completed" notification for `intent`.
    pub async fn dispatch(&self, intent: &NotificationIntent) -> DispatchOutcome {
        if !self.ensure_permission().await {
            debug!(
                user_id = %intent.user_id,
                slot_id = intent.slot_id,
                "Notification permission not granted; dropping"
            );
            return DispatchOutcome::Suppressed;
        }

        let notification = completion_notification(intent, self.dismiss_after);
        debug!(tag = %notification.tag, "Showing completion notification");
        self.notifier.show(notification);
        DispatchOutcome::Shown
    }

    /// Handles a click on a notification (`None`) or on one of its actions.
    pub fn activate(&self, action: Option<NotificationAction>) -> Activation {
        activate(self.notifier.as_ref(), action)
    }

    async fn ensure_permission(&self) -> bool {
        match self.notifier.permission() {
            Permission::Granted => true,
            Permission::Denied => false,
            Permission::Default => {
                let permission = self
                    .prompt
                    .get_or_init(|| async {
                        let permission = self.notifier.request_permission().await;
                        info!(?permission, "Notification permission requested");
                        permission
                    })
                    .await;
                *permission == Permission::Granted
            }
        }
    }
}

/// Builds the in-app notification for a completion.
#[must_use]
pub fn completion_notification(
    intent: &NotificationIntent,
    dismiss_after: Duration,
) -> LocalNotification {
    LocalNotification {
        title: COMPLETION_TITLE.to_string(),
        body: completion_body(&intent.user_email, &intent.slot_label),
        tag: format!("task-completed-{}", Utc::now().timestamp_millis()),
        dismiss_after: Some(dismiss_after),
        require_interaction: false,
        actions: Vec::new(),
    }
}

/// `notification` block of a delivered push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushNotificationBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A push message as delivered to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub notification: Option<PushNotificationBody>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Maps a push received in the background to a system notification.
#[must_use]
pub fn background_notification(payload: &PushPayload) -> LocalNotification {
    let body = payload.notification.as_ref();
    LocalNotification {
        title: body
            .and_then(|n| n.title.clone())
            .unwrap_or_else(|| BACKGROUND_DEFAULT_TITLE.to_string()),
        body: body
            .and_then(|n| n.body.clone())
            .unwrap_or_else(|| BACKGROUND_DEFAULT_BODY.to_string()),
        tag: BACKGROUND_TAG.to_string(),
        dismiss_after: None,
        require_interaction: true,
        actions: vec![NotificationAction::Open, NotificationAction::Close],
    }
}

/// Opening a notification (body click or `Open`) focuses the app; `Close` dismisses it.
pub fn activate(notifier: &dyn Notifier, action: Option<NotificationAction>) -> Activation {
    match action {
        None | Some(NotificationAction::Open) => {
            notifier.focus_app();
            Activation::Focused
        }
        Some(NotificationAction::Close) => Activation::Dismissed,
    }
}

/// Notifier that logs notifications and keeps them for inspection.
#[derive(Debug)]
pub struct LogNotifier {
    permission: Mutex<Permission>,
    answer: Permission,
    requests: AtomicUsize,
    focused: AtomicUsize,
    shown: Mutex<Vec<LocalNotification>>,
}

impl LogNotifier {
    /// A notifier in state `permission` that answers a prompt with `answer`.
    #[must_use]
    pub fn new(permission: Permission, answer: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
            answer,
            requests: AtomicUsize::new(0),
            focused: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// A notifier with permission already granted.
    #[must_use]
    pub fn granted() -> Self {
        Self::new(Permission::Granted, Permission::Granted)
    }

    #[must_use]
    pub fn shown(&self) -> Vec<LocalNotification> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn focus_count(&self) -> usize {
        self.focused.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request_permission(&self) -> Permission {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut permission = self.permission.lock().unwrap_or_else(|e| e.into_inner());
        *permission = self.answer;
        *permission
    }

    fn show(&self, notification: LocalNotification) {
        info!(
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            "Notification"
        );
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }

    fn focus_app(&self) {
        debug!("Focusing application");
        self.focused.fetch_add(1, Ordering::SeqCst);
    }
}
