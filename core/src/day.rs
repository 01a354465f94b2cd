//! Day boundary policy and time sources.
//!
//! Every deployment uses one canonical fixed UTC offset. "Today" is the
//! half-open interval `[local midnight, next local midnight)`, expressed as
//! UTC instants, and a task record's `date` is the UTC instant of that local
//! midnight.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};

/// Source of the current instant.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A calendar day under the deployment's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Day {
    start: DateTime<Utc>,
}

impl Day {
    /// UTC instant of the local midnight starting this day.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// UTC instant of the next local midnight (exclusive bound).
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::days(1)
    }

    /// Returns `true` if `instant` falls within `[start, end)`.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end()
    }

    /// The day `days` after this one (negative goes back).
    #[must_use]
    pub fn offset(&self, days: i64) -> Self {
        Self {
            start: self.start + Duration::days(days),
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.to_rfc3339())
    }
}

/// Maps instants to calendar days using a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayPolicy {
    offset: FixedOffset,
}

impl Default for DayPolicy {
    fn default() -> Self {
        Self::utc()
    }
}

impl DayPolicy {
    #[must_use]
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Days aligned to UTC midnight.
    #[must_use]
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The day containing `instant`.
    #[must_use]
    pub fn day_of(&self, instant: DateTime<Utc>) -> Day {
        let local_date = instant.with_timezone(&self.offset).date_naive();
        let local_midnight = local_date.and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Day {
            start: DateTime::from_naive_utc_and_offset(utc_midnight, Utc),
        }
    }

    /// The day containing the clock's current instant.
    #[must_use]
    pub fn today(&self, clock: &dyn Clock) -> Day {
        self.day_of(clock.now())
    }
}

/// Parses a `±HH:MM` offset such as `+03:00` or `-05:30`.
///
/// ```rust
/// use sipsync_core::day::parse_utc_offset;
///
/// assert_eq!(parse_utc_offset("+03:00").map(|o| o.local_minus_utc()), Some(3 * 3600));
/// assert_eq!(parse_utc_offset("-05:30").map(|o| o.local_minus_utc()), Some(-(5 * 3600 + 1800)));
/// assert!(parse_utc_offset("03:00").is_none());
/// ```
#[must_use]
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hours) || !two_digits(minutes) {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
