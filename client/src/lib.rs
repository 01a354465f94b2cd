//! SipSync client - daily hydration tasks with real-time team notifications.
//!
//! This crate keeps the signed-in user's per-day task state in sync with the
//! shared store and notifies them when teammates complete their tasks.
//!
//! # Overview
//!
//! A [`ClientSession`] follows the identity provider. While a user is signed
//! in it keeps a live [`TodayView`] of their four daily slots, runs a
//! [`WatcherSession`] over everyone's tasks for the day, and shows a local
//! notification for each new completion by someone else. Writes go through
//! the [`CompletionMutator`].
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for client operations
//! - [`identity`]: Identity provider seam
//! - [`reconciler`]: Per-slot view of the user's day
//! - [`mutator`]: Completion, un-completion and consumption writes
//! - [`watcher`]: Cross-user completion detection
//! - [`email_cache`]: Coalescing `userId -> email` cache
//! - [`dispatcher`]: Local and background notifications
//! - [`tokens`]: Device push token lifecycle
//! - [`session`]: Sign-in/sign-out orchestration
//! - [`team`]: Team progress for today
//! - [`stats`]: Hydration statistics

pub mod config;
pub mod dispatcher;
pub mod email_cache;
pub mod error;
pub mod identity;
pub mod mutator;
pub mod reconciler;
pub mod session;
pub mod stats;
pub mod team;
pub mod tokens;
pub mod watcher;

pub use config::Config;
pub use dispatcher::{LocalDispatcher, LogNotifier, Notifier, Permission};
pub use email_cache::EmailCache;
pub use error::{ClientError, RegistrationError, Result};
pub use identity::{IdentityProvider, SessionIdentity};
pub use mutator::{amount_policy, CompletionMutator, MutationOutcome, PolicyAction};
pub use reconciler::{reconcile, TodayView};
pub use session::{ClientDeps, ClientSession};
pub use stats::HydrationStats;
pub use team::{team_progress, TeamSummary};
pub use tokens::{LocalPushRegistration, PushRegistration, TokenLifecycle};
pub use watcher::{CompletionTracker, WatcherConfig, WatcherSession};
