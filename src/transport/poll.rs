//! Adaptive polling cadence.
//!
//! Both the receive loop and senders waiting for an idle slot poll a shared
//! word. Right after activity they poll fast (hundreds of microseconds);
//! after a run of empty polls they fall back to a slow idle interval.
//!
//! ```text
//!            activity
//!   ┌──────────────────────────┐
//!   ▼                          │
//! Active ── N empty polls ──▶ Idle
//!   busy_interval               idle_interval
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{GroupwireError, Result};

/// Default poll interval while active.
pub const DEFAULT_BUSY_INTERVAL: Duration = Duration::from_micros(200);

/// Default poll interval while idle.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(5);

/// Default number of empty polls before going idle.
pub const DEFAULT_BUSY_POLLS: u32 = 64;

/// Polling cadence.
///
/// Serialized with durations in microseconds:
/// `{"busy_interval_us": 200, "idle_interval_us": 5000, "busy_polls": 64}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval right after activity.
    #[serde(rename = "busy_interval_us", with = "duration_us")]
    pub busy_interval: Duration,
    /// Interval once nothing has happened for a while.
    #[serde(rename = "idle_interval_us", with = "duration_us")]
    pub idle_interval: Duration,
    /// Empty polls tolerated before switching to the idle interval.
    pub busy_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            busy_interval: DEFAULT_BUSY_INTERVAL,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            busy_polls: DEFAULT_BUSY_POLLS,
        }
    }
}

impl PollConfig {
    /// Parse from a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Current cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Polling fast; counts empty polls since the last activity.
    Active {
        /// Empty polls so far.
        empty_polls: u32,
    },
    /// Polling slowly.
    Idle,
}

/// Busy/idle state machine driving sleep intervals.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    config: PollConfig,
    state: PollState,
}

impl PollSchedule {
    /// Start in the active state.
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            state: PollState::Active { empty_polls: 0 },
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Record one poll and return how long to sleep before the next.
    pub fn next_interval(&mut self, activity: bool) -> Duration {
        self.state = match (self.state, activity) {
            (_, true) => PollState::Active { empty_polls: 0 },
            (PollState::Active { empty_polls }, false) if empty_polls + 1 < self.config.busy_polls => {
                PollState::Active {
                    empty_polls: empty_polls + 1,
                }
            }
            (_, false) => PollState::Idle,
        };

        match self.state {
            PollState::Active { .. } => self.config.busy_interval,
            PollState::Idle => self.config.idle_interval,
        }
    }
}

/// Poll `ready` until it returns true.
///
/// Fails with `ShuttingDown` as soon as `abort` is set, and with `Timeout`
/// once `deadline` passes.
pub async fn wait_until<F>(
    mut ready: F,
    config: PollConfig,
    deadline: Instant,
    abort: &AtomicBool,
) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut schedule = PollSchedule::new(config);

    loop {
        if abort.load(Ordering::Acquire) {
            return Err(GroupwireError::ShuttingDown);
        }
        if ready() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(GroupwireError::Timeout(now - start));
        }

        let interval = schedule.next_interval(false);
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Serde helper: `Duration` as integer microseconds.
pub(crate) mod duration_us {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
