//! Hydration statistics for one user.
//!
//! Every completed task counts as half a litre. Figures are reported for
//! today, for the window from seven days ago through today, and for all time.

use serde::Serialize;
use sipsync_core::day::Day;
use sipsync_core::types::{TaskRecord, ML_PER_TASK};

/// Completed tasks that make up a 19 L carboy.
pub const TASKS_PER_CARBOY: u32 = 38;

/// Days before today included in the weekly window.
pub const WEEKLY_LOOKBACK_DAYS: i64 = 7;

/// Completed-task count and water total for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterTotal {
    pub tasks: u32,
    pub water_ml: u32,
}

impl WaterTotal {
    fn from_count(tasks: u32) -> Self {
        Self {
            tasks,
            water_ml: tasks.saturating_mul(ML_PER_TASK),
        }
    }

    /// Water in litres.
    #[must_use]
    pub fn litres(&self) -> f64 {
        f64::from(self.water_ml) / 1000.0
    }
}

/// A user's hydration figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationStats {
    pub daily: WaterTotal,
    pub weekly: WaterTotal,
    pub total: WaterTotal,
}

impl HydrationStats {
    /// Computes the figures from all of one user's records.
    ///
    /// Only completed records count. The weekly window is
    /// `[today - 7 days, end of today)`.
    #[must_use]
    pub fn compute(records: &[TaskRecord], today: Day) -> Self {
        let week_start = today.offset(-WEEKLY_LOOKBACK_DAYS).start();
        let completed = || records.iter().filter(|r| r.completed);

        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        Self {
            daily: WaterTotal::from_count(count(
                completed().filter(|r| today.contains(r.date)).count(),
            )),
            weekly: WaterTotal::from_count(count(
                completed()
                    .filter(|r| r.date >= week_start && r.date < today.end())
                    .count(),
            )),
            total: WaterTotal::from_count(count(completed().count())),
        }
    }

    /// All-time count of half-litre servings.
    #[must_use]
    pub fn half_litres(&self) -> u32 {
        self.total.tasks
    }

    /// All-time whole litres.
    #[must_use]
    pub fn litres(&self) -> u32 {
        self.total.tasks / 2
    }

    /// All-time whole 19 L carboys.
    #[must_use]
    pub fn carboys(&self) -> u32 {
        self.total.tasks / TASKS_PER_CARBOY
    }
}
