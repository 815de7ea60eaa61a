use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout and retry contract attached to one network call.
///
/// A policy is supplied by the caller per call and discarded afterwards;
/// there is no process-wide default. `retries` bounds the number of
/// *additional* attempts after the first failure, so `retries = 0` means
/// exactly one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPolicy {
    /// Upper bound for a single attempt.
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Additional attempts after the first failure.
    #[serde(default)]
    pub retries: u32,
}

impl RequestPolicy {
    /// Creates a policy with a per-attempt timeout and a retry budget.
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    /// Creates a single-attempt policy.
    pub const fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 0,
        }
    }

    /// Returns whether another attempt is allowed after `failures` failed ones.
    pub fn can_retry(&self, failures: u32) -> bool {
        failures <= self.retries
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Exponential backoff schedule for re-establishing a long-lived push
/// connection.
///
/// Unlike [`RequestPolicy`], reconnect attempts are unbounded; the schedule
/// only spaces them out so an unreachable endpoint is not hot-looped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    #[serde(default = "default_initial_ms", with = "duration_ms", rename = "initial_ms")]
    pub initial: Duration,
    /// Exponential multiplier per failed attempt.
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Upper bound for computed delays.
    #[serde(default = "default_max_ms", with = "duration_ms", rename = "max_ms")]
    pub max: Duration,
}

const fn default_initial_ms() -> Duration {
    Duration::from_millis(500)
}

const fn default_factor() -> f64 {
    2.0
}

const fn default_max_ms() -> Duration {
    Duration::from_secs(30)
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: default_initial_ms(),
            factor: default_factor(),
            max: default_max_ms(),
        }
    }
}

impl ReconnectBackoff {
    /// Creates a backoff schedule with the given initial delay and factor.
    ///
    /// Non-positive factors fall back to the default multiplier.
    pub fn exponential(initial: Duration, factor: f64) -> Self {
        let factor = if factor <= 0.0 { default_factor() } else { factor };
        Self {
            initial,
            factor,
            max: default_max_ms(),
        }
    }

    /// Overrides the delay cap.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max.max(Duration::from_millis(1));
        self
    }

    /// Delay before reconnect attempt `failures` (0-based count of
    /// consecutive failures so far).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = self.factor.powi(failures as i32);
        let base = (self.initial.as_millis() as f64 * exp).round() as u64;
        let capped = base.min(self.max.as_millis() as u64).max(1);
        Duration::from_millis(capped)
    }

    /// Starts a mutable schedule tracking consecutive failures.
    pub fn schedule(&self) -> ReconnectSchedule {
        ReconnectSchedule {
            backoff: self.clone(),
            failures: 0,
        }
    }
}

/// Mutable cursor over a [`ReconnectBackoff`].
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    backoff: ReconnectBackoff,
    failures: u32,
}

impl ReconnectSchedule {
    /// Returns the next delay and advances the failure count.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Consecutive failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Resets the schedule after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
