use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default look-back used for snapshots and payloads.
pub const DEFAULT_WINDOW_HOURS: u32 = 24;

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// The `hours` leading up to and including `end`.
    pub fn trailing(end: DateTime<Utc>, hours: u32) -> Self {
        Self {
            start: end - Duration::hours(i64::from(hours)),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Length of the overlap between `[from, to]` and this window.
    pub fn overlap(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
        let start = from.max(self.start);
        let end = to.min(self.end);
        if end > start {
            end - start
        } else {
            Duration::zero()
        }
    }
}
