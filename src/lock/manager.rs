use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::LockResult;
use super::model::BuildLock;
use super::store::LockStore;
use crate::store::TmId;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Proof of a successful acquisition. Carries the holder token used for renewal
/// and release.
#[derive(Debug, PartialEq, Eq)]
pub struct LockGuard {
    tm_id: TmId,
    token: String,
}

impl LockGuard {
    pub fn tm_id(&self) -> TmId {
        self.tm_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Per-TM build mutual exclusion over a [`LockStore`].
///
/// Each acquisition gets a fresh holder token (`{worker_id}/{n}`), so a build whose
/// lock was reclaimed as stale can detect the loss on its next [`renew`](Self::renew)
/// even when the new holder runs in the same process.
pub struct BuildLockManager {
    store: Arc<dyn LockStore>,
    worker_id: String,
    ttl: Duration,
    sequence: AtomicU64,
    held: Mutex<HashMap<TmId, String>>,
}

impl std::fmt::Debug for BuildLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildLockManager")
            .field("worker_id", &self.worker_id)
            .field("ttl", &self.ttl)
            .field("held", &self.held.lock().len())
            .finish_non_exhaustive()
    }
}

impl BuildLockManager {
    pub fn new(store: Arc<dyn LockStore>, worker_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            ttl,
            sequence: AtomicU64::new(0),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn stale_before(&self, now_ms: i64) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(ttl_ms)
    }

    /// Epoch millis before which a lock counts as stale.
    pub fn stale_cutoff_ms(&self) -> i64 {
        self.stale_before(now_ms())
    }

    /// Attempts to take the build lock for `tm_id`.
    ///
    /// Returns `Ok(None)` when another live holder owns it. A lock older than the
    /// TTL is taken over in the same atomic write.
    pub fn try_acquire(&self, tm_id: TmId) -> LockResult<Option<LockGuard>> {
        let token = format!(
            "{}/{}",
            self.worker_id,
            self.sequence.fetch_add(1, Ordering::Relaxed) + 1
        );
        let now = now_ms();
        let previous = self.store.get(tm_id)?;

        if !self
            .store
            .try_acquire(tm_id, &token, now, self.stale_before(now))?
        {
            debug!(tm_id, holder = ?previous.map(|l| l.holder), "Build lock contended");
            return Ok(None);
        }

        if let Some(previous) = previous.filter(|p| p.is_stale(now, self.ttl)) {
            warn!(
                tm_id,
                previous_holder = %previous.holder,
                age_ms = previous.age(now).as_millis() as u64,
                holder = %token,
                "Reclaimed stale build lock"
            );
        }

        self.held.lock().insert(tm_id, token.clone());
        debug!(tm_id, holder = %token, "Build lock acquired");
        Ok(Some(LockGuard { tm_id, token }))
    }

    /// Heartbeat: refreshes the lock timestamp. `false` means the lock was lost.
    pub fn renew(&self, guard: &LockGuard) -> LockResult<bool> {
        self.store.renew(guard.tm_id, &guard.token, now_ms())
    }

    /// Releases the lock held through `guard`. Returns `false` if it had already been
    /// reclaimed by someone else.
    pub fn release_guard(&self, guard: LockGuard) -> LockResult<bool> {
        {
            let mut held = self.held.lock();
            if held.get(&guard.tm_id) == Some(&guard.token) {
                held.remove(&guard.tm_id);
            }
        }
        let released = self.store.release(guard.tm_id, &guard.token)?;
        if released {
            debug!(tm_id = guard.tm_id, holder = %guard.token, "Build lock released");
        } else {
            warn!(tm_id = guard.tm_id, holder = %guard.token, "Build lock was no longer held at release");
        }
        Ok(released)
    }

    /// Releases this worker's lock on `tm_id`; a no-op if it holds none.
    pub fn release(&self, tm_id: TmId) -> LockResult<()> {
        let Some(token) = self.held.lock().remove(&tm_id) else {
            return Ok(());
        };
        self.store.release(tm_id, &token)?;
        Ok(())
    }

    /// `true` if a lock row exists for `tm_id` and is older than the TTL.
    pub fn is_stale(&self, tm_id: TmId) -> LockResult<bool> {
        Ok(self
            .store
            .get(tm_id)?
            .is_some_and(|lock| lock.is_stale(now_ms(), self.ttl)))
    }

    pub fn current(&self, tm_id: TmId) -> LockResult<Option<BuildLock>> {
        self.store.get(tm_id)
    }

    /// `true` if this worker believes it holds the lock on `tm_id`.
    pub fn is_held(&self, tm_id: TmId) -> bool {
        self.held.lock().contains_key(&tm_id)
    }

    /// Force-releases every lock older than the TTL.
    pub fn reclaim_stale(&self) -> LockResult<Vec<BuildLock>> {
        let now = now_ms();
        let removed = self.store.remove_stale(self.stale_before(now))?;
        if removed.is_empty() {
            return Ok(removed);
        }

        let mut held = self.held.lock();
        for lock in &removed {
            warn!(
                tm_id = lock.tm_id,
                holder = %lock.holder,
                age_ms = lock.age(now).as_millis() as u64,
                "Force-released stale build lock"
            );
            if held.get(&lock.tm_id) == Some(&lock.holder) {
                held.remove(&lock.tm_id);
            }
        }
        Ok(removed)
    }

    /// Releases every lock this worker holds (shutdown cleanup).
    pub fn release_all_held(&self) -> usize {
        let held: Vec<(TmId, String)> = self.held.lock().drain().collect();
        let mut released = 0;
        for (tm_id, token) in held {
            match self.store.release(tm_id, &token) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!(tm_id, error = %e, "Failed to release build lock on shutdown"),
            }
        }
        if released > 0 {
            info!(released, "Released held build locks");
        }
        released
    }
}
