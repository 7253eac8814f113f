use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;
use rusqlite::{ErrorCode, OptionalExtension, params};

use super::error::{LockError, LockResult};
use super::model::BuildLock;
use crate::store::{DbPool, TmId};

/// Persistence backend for build locks.
///
/// Every method is a single atomic operation against the backing store, so two
/// workers sharing a backend can never both observe a successful acquisition.
pub trait LockStore: Send + Sync {
    /// Inserts the lock row if absent, or takes it over if its `acquired_at` is
    /// older than `stale_before_ms`. Returns `true` if `holder` now owns the lock.
    fn try_acquire(
        &self,
        tm_id: TmId,
        holder: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> LockResult<bool>;

    /// Refreshes `acquired_at` if `holder` still owns the lock.
    fn renew(&self, tm_id: TmId, holder: &str, now_ms: i64) -> LockResult<bool>;

    /// Deletes the lock if `holder` owns it. Returns `false` (not an error) otherwise.
    fn release(&self, tm_id: TmId, holder: &str) -> LockResult<bool>;

    fn get(&self, tm_id: TmId) -> LockResult<Option<BuildLock>>;

    /// Deletes and returns every lock acquired before `stale_before_ms`.
    fn remove_stale(&self, stale_before_ms: i64) -> LockResult<Vec<BuildLock>>;
}

/// Lock rows in the `build_locks` table of the entry store database.
#[derive(Debug, Clone)]
pub struct SqliteLockStore {
    pool: DbPool,
}

impl SqliteLockStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl LockStore for SqliteLockStore {
    fn try_acquire(
        &self,
        tm_id: TmId,
        holder: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> LockResult<bool> {
        let conn = self.pool.get()?;
        let result = conn.execute(
            "INSERT INTO build_locks (tm_id, holder, acquired_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(tm_id) DO UPDATE
                SET holder = excluded.holder, acquired_at = excluded.acquired_at
              WHERE build_locks.acquired_at < ?4",
            params![tm_id, holder, now_ms, stale_before_ms],
        );
        match result {
            Ok(changed) => Ok(changed == 1),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(LockError::TmNotFound { tm_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn renew(&self, tm_id: TmId, holder: &str, now_ms: i64) -> LockResult<bool> {
        let changed = self.pool.get()?.execute(
            "UPDATE build_locks SET acquired_at = ?3 WHERE tm_id = ?1 AND holder = ?2",
            params![tm_id, holder, now_ms],
        )?;
        Ok(changed == 1)
    }

    fn release(&self, tm_id: TmId, holder: &str) -> LockResult<bool> {
        let changed = self.pool.get()?.execute(
            "DELETE FROM build_locks WHERE tm_id = ?1 AND holder = ?2",
            params![tm_id, holder],
        )?;
        Ok(changed == 1)
    }

    fn get(&self, tm_id: TmId) -> LockResult<Option<BuildLock>> {
        let lock = self
            .pool
            .get()?
            .query_row(
                "SELECT tm_id, holder, acquired_at FROM build_locks WHERE tm_id = ?1",
                params![tm_id],
                |row| {
                    Ok(BuildLock {
                        tm_id: row.get(0)?,
                        holder: row.get(1)?,
                        acquired_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(lock)
    }

    fn remove_stale(&self, stale_before_ms: i64) -> LockResult<Vec<BuildLock>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "DELETE FROM build_locks WHERE acquired_at < ?1
             RETURNING tm_id, holder, acquired_at",
        )?;
        let removed = stmt
            .query_map(params![stale_before_ms], |row| {
                Ok(BuildLock {
                    tm_id: row.get(0)?,
                    holder: row.get(1)?,
                    acquired_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(removed)
    }
}

/// Process-local lock table behind a mutex; for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<TmId, BuildLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a lock row as-is (simulates a worker that crashed while holding it).
    pub fn insert_raw(&self, lock: BuildLock) {
        self.locks.lock().insert(lock.tm_id, lock);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

impl LockStore for MemoryLockStore {
    fn try_acquire(
        &self,
        tm_id: TmId,
        holder: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> LockResult<bool> {
        let mut locks = self.locks.lock();
        let lock = BuildLock {
            tm_id,
            holder: holder.to_string(),
            acquired_at: now_ms,
        };
        match locks.entry(tm_id) {
            Entry::Vacant(slot) => {
                slot.insert(lock);
                Ok(true)
            }
            Entry::Occupied(mut slot) if slot.get().acquired_at < stale_before_ms => {
                slot.insert(lock);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    fn renew(&self, tm_id: TmId, holder: &str, now_ms: i64) -> LockResult<bool> {
        match self.locks.lock().get_mut(&tm_id) {
            Some(lock) if lock.holder == holder => {
                lock.acquired_at = now_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release(&self, tm_id: TmId, holder: &str) -> LockResult<bool> {
        let mut locks = self.locks.lock();
        if locks.get(&tm_id).is_some_and(|lock| lock.holder == holder) {
            locks.remove(&tm_id);
            return Ok(true);
        }
        Ok(false)
    }

    fn get(&self, tm_id: TmId) -> LockResult<Option<BuildLock>> {
        Ok(self.locks.lock().get(&tm_id).cloned())
    }

    fn remove_stale(&self, stale_before_ms: i64) -> LockResult<Vec<BuildLock>> {
        let mut locks = self.locks.lock();
        let stale: Vec<TmId> = locks
            .values()
            .filter(|lock| lock.acquired_at < stale_before_ms)
            .map(|lock| lock.tm_id)
            .collect();
        Ok(stale
            .into_iter()
            .filter_map(|tm_id| locks.remove(&tm_id))
            .collect())
    }
}
