//! Polling intervals for grid waits.
//!
//! A grid scheduler can only be asked "is this job still active?", so a
//! waiter has to poll. Intervals start small for short jobs and double up to
//! a ceiling so long jobs do not hammer the scheduler.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Geometric backoff between status queries.
///
/// The sequence is `initial, 2 * initial, 4 * initial, ...`, each term capped
/// at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBackoff {
    /// First interval.
    #[serde(rename = "initial_ms", with = "serde_millis")]
    pub initial: Duration,

    /// Largest interval ever used.
    #[serde(rename = "ceiling_ms", with = "serde_millis")]
    pub ceiling: Duration,
}

impl PollBackoff {
    /// Create a backoff; a ceiling below `initial` is raised to `initial`.
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        Self {
            initial,
            ceiling: ceiling.max(initial),
        }
    }

    /// Interval to use after `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.ceiling).max(self.initial)
    }

    /// Endless sequence of intervals.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial.min(self.ceiling)), move |d| Some(self.next(*d)))
    }
}

impl Default for PollBackoff {
    /// 10 ms doubling up to one minute.
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(60))
    }
}

/// Durations as whole milliseconds in configuration files.
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
