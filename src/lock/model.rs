use std::time::Duration;

use serde::Serialize;

use crate::store::TmId;

/// A persisted build lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildLock {
    pub tm_id: TmId,
    /// Holder token, `{worker_id}/{sequence}`.
    pub holder: String,
    /// Acquisition (or last renewal) time in unix milliseconds.
    pub acquired_at: i64,
}

impl BuildLock {
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.acquired_at).max(0) as u64)
    }

    /// A lock is stale once its age exceeds `ttl`.
    pub fn is_stale(&self, now_ms: i64, ttl: Duration) -> bool {
        self.age(now_ms) > ttl
    }

    /// Worker id part of the holder token.
    pub fn worker(&self) -> &str {
        self.holder
            .rsplit_once('/')
            .map_or(self.holder.as_str(), |(worker, _)| worker)
    }
}
