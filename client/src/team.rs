//! Team progress for today.
//!
//! Groups today's records of every user and reports, per user, how many of
//! the day's slots they completed, plus team-wide aggregates.

use std::collections::BTreeMap;

use serde::Serialize;
use sipsync_core::types::{TaskRecord, SLOTS, SLOT_COUNT, UNKNOWN_USER_LABEL};

/// One user's progress for the day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: String,
    pub email: String,
    /// Completion flag per slot, in slot order.
    pub slots: Vec<bool>,
    pub completed_count: usize,
    pub total_count: usize,
    /// `completed_count / total_count * 100`.
    pub progress: f64,
}

/// Team-wide figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    pub members: Vec<UserProgress>,
    /// Users with at least one record today.
    pub active_users: usize,
    pub total_completed: usize,
    /// Mean of per-user progress, rounded to a whole percent.
    pub average_completion: u32,
}

/// Builds the team view from today's records of all users.
///
/// `emails` maps user ids to emails; users missing from it are shown with the
/// sentinel label. Members are ordered by user id.
#[must_use]
pub fn team_progress(records: &[TaskRecord], emails: &BTreeMap<String, String>) -> TeamSummary {
    let mut by_user: BTreeMap<&str, Vec<&TaskRecord>> = BTreeMap::new();
    for record in records {
        by_user.entry(record.user_id.as_str()).or_default().push(record);
    }

    let members: Vec<UserProgress> = by_user
        .into_iter()
        .map(|(user_id, tasks)| {
            let slots: Vec<bool> = SLOTS
                .iter()
                .map(|slot| tasks.iter().any(|t| t.slot_id == slot.id && t.completed))
                .collect();
            let completed_count = slots.iter().filter(|done| **done).count();
            UserProgress {
                user_id: user_id.to_string(),
                email: emails
                    .get(user_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_USER_LABEL.to_string()),
                slots,
                completed_count,
                total_count: SLOT_COUNT,
                progress: completed_count as f64 / SLOT_COUNT as f64 * 100.0,
            }
        })
        .collect();

    let total_completed = members.iter().map(|m| m.completed_count).sum();
    let average_completion = if members.is_empty() {
        0
    } else {
        let sum: f64 = members.iter().map(|m| m.progress).sum();
        (sum / members.len() as f64).round() as u32
    };

    TeamSummary {
        active_users: members.len(),
        total_completed,
        average_completion,
        members,
    }
}
