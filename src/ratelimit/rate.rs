//! Rate configuration and per-key window state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage key of the process-wide fallback rate.
///
/// Not usable as an application-level rate limit key.
pub const DEFAULT_KEY: &str = "default";

/// Limit configuration for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// Maximum admitted hits per window
    pub max_request: u64,
    /// Elapsed time after which the window resets
    #[serde(rename = "window_ms", with = "duration_millis")]
    pub window: Duration,
}

impl Rate {
    pub fn new(max_request: u64, window: Duration) -> Self {
        Self {
            max_request,
            window,
        }
    }

    pub fn per_second(max_request: u64) -> Self {
        Self::new(max_request, Duration::from_secs(1))
    }

    pub fn per_minute(max_request: u64) -> Self {
        Self::new(max_request, Duration::from_secs(60))
    }

    pub fn per_hour(max_request: u64) -> Self {
        Self::new(max_request, Duration::from_secs(3600))
    }
}

/// Hit counter for the current window of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Admitted hits in the current window
    pub total_hit: u64,
    /// When the current window began
    pub window_started_at: DateTime<Utc>,
}

impl Stat {
    /// State recorded for the hit that opens a window.
    pub fn first_hit(now: DateTime<Utc>) -> Self {
        Self {
            total_hit: 1,
            window_started_at: now,
        }
    }

    /// Whether strictly more than `rate.window` has passed since the window began.
    ///
    /// A window start in the future (clock skew between writers) counts as open.
    pub fn window_expired(&self, rate: &Rate, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.window_started_at)
            .to_std()
            .map_or(false, |elapsed| elapsed > rate.window)
    }

    /// Whether admitting one more hit would cross the ceiling.
    pub fn would_exceed(&self, rate: &Rate) -> bool {
        self.total_hit.saturating_add(1) > rate.max_request
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(window.as_millis())
            .map_err(|_| S::Error::custom(format!("window {window:?} exceeds u64 milliseconds")))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
