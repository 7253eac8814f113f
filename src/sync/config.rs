use std::time::Duration;

use crate::constants::{
    DEFAULT_CHANGE_CHANNEL_CAPACITY, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_BUILD_RETRIES,
    DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS, DEFAULT_SWEEP_INTERVAL_SECS,
};

/// How long a shut-down coordinator waits for in-flight builds.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Auto-sync tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period after the last change before a rebuild fires.
    pub debounce: Duration,
    /// First retry delay; doubles per attempt.
    pub retry_base: Duration,
    /// Cap on the retry delay.
    pub retry_max: Duration,
    /// Failed builds retried before the TM waits for the next trigger.
    pub max_build_retries: u32,
    /// Period of the stale-lock / dirty-TM sweep.
    pub sweep_interval: Duration,
    /// Bound of the change channel; a full channel drops notifications.
    pub channel_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            max_build_retries: DEFAULT_MAX_BUILD_RETRIES,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            channel_capacity: DEFAULT_CHANGE_CHANNEL_CAPACITY,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl SyncConfig {
    /// Delay before retry number `attempt` (1-based): `retry_base * 2^(attempt-1)`,
    /// capped at `retry_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.retry_base
            .saturating_mul(1u32 << exp)
            .min(self.retry_max)
    }
}
