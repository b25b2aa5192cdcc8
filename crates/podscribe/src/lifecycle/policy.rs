use chrono::{DateTime, TimeDelta, Utc};

use crate::config::LifecycleConfig;

/// Retry ceiling and backoff schedule for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&LifecycleConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base_secs: config.backoff_base_secs,
            backoff_max_secs: config.backoff_max_secs,
        }
    }

    /// Whether recording `attempts` polls would pass the ceiling.
    pub fn exceeds_ceiling(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }

    /// `base * 2^(attempts-1)`, capped at the configured maximum.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(32);
        self.backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_secs)
    }

    /// Earliest time the next poll of a job with `attempts` recorded is due.
    pub fn next_poll_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let secs = i64::try_from(self.backoff_secs(attempts)).unwrap_or(i64::MAX);
        TimeDelta::try_seconds(secs)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
