//! SipSync core library.
//!
//! Shared building blocks for the SipSync client and server: the hydration
//! task model, the day boundary policy, the error taxonomy, the document
//! store seams and an in-process store implementation.
//!
//! # Modules
//!
//! - [`types`]: Slots, task records, profiles and notification payloads
//! - [`day`]: Day boundary policy and clocks
//! - [`error`]: The [`SyncError`] taxonomy
//! - [`store`]: Store traits, queries and live subscription handles
//! - [`memory`]: [`MemoryStore`], an in-process store with live feeds and write triggers

pub mod day;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use day::{Clock, Day, DayPolicy, FixedClock, SystemClock};
pub use error::{Result, SyncError};
pub use memory::MemoryStore;
pub use store::{
    bounded, ProfileDirectory, ProfileStore, Snapshot, Subscription, TaskFeed, TaskQuery,
    TaskStore,
};
pub use types::{
    Identity, NewTaskRecord, NotificationIntent, NotifiedKey, Slot, SlotId, TaskPatch,
    TaskRecord, TaskWrite, UserProfile, ViewTask, SLOTS,
};
