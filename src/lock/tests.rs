use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Utc;

use super::*;
use crate::store::{EntryStore, NewTm, TmId};

const TTL: Duration = Duration::from_secs(600);

fn sqlite_store_with_tm() -> (EntryStore, SqliteLockStore, TmId) {
    let store = EntryStore::open_in_memory().unwrap();
    let tm = store.create_tm(&NewTm::new("tm", "en", "fr")).unwrap();
    let locks = SqliteLockStore::new(store.pool().clone());
    (store, locks, tm.id)
}

fn exercise_store(locks: &dyn LockStore, tm_id: TmId) {
    assert!(locks.try_acquire(tm_id, "a/1", 1_000, 0).unwrap());
    assert!(!locks.try_acquire(tm_id, "b/1", 1_500, 500).unwrap());
    assert_eq!(locks.get(tm_id).unwrap().unwrap().holder, "a/1");

    assert!(locks.renew(tm_id, "a/1", 2_000).unwrap());
    assert!(!locks.renew(tm_id, "b/1", 2_000).unwrap());
    assert_eq!(locks.get(tm_id).unwrap().unwrap().acquired_at, 2_000);

    // Still fresh relative to the renewal.
    assert!(!locks.try_acquire(tm_id, "b/2", 2_500, 1_999).unwrap());
    // Stale: b takes over in the same write.
    assert!(locks.try_acquire(tm_id, "b/3", 9_000, 2_001).unwrap());
    assert_eq!(locks.get(tm_id).unwrap().unwrap().holder, "b/3");

    assert!(!locks.release(tm_id, "a/1").unwrap());
    assert!(locks.get(tm_id).unwrap().is_some());
    assert!(locks.release(tm_id, "b/3").unwrap());
    assert!(locks.get(tm_id).unwrap().is_none());
    assert!(!locks.release(tm_id, "b/3").unwrap());

    assert!(locks.try_acquire(tm_id, "c/1", 100, 0).unwrap());
    assert!(locks.remove_stale(50).unwrap().is_empty());
    let removed = locks.remove_stale(101).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].holder, "c/1");
    assert!(locks.get(tm_id).unwrap().is_none());
}

#[test]
fn test_sqlite_lock_store_semantics() {
    let (_store, locks, tm_id) = sqlite_store_with_tm();
    exercise_store(&locks, tm_id);
}

#[test]
fn test_memory_lock_store_semantics() {
    exercise_store(&MemoryLockStore::new(), 7);
}

#[test]
fn test_sqlite_lock_for_unknown_tm() {
    let (_store, locks, _) = sqlite_store_with_tm();
    let err = locks.try_acquire(9999, "a/1", 1, 0).unwrap_err();
    assert!(matches!(err, LockError::TmNotFound { tm_id: 9999 }));
}

#[test]
fn test_lock_row_cascades_with_tm() {
    let (store, locks, tm_id) = sqlite_store_with_tm();
    assert!(locks.try_acquire(tm_id, "a/1", 1, 0).unwrap());

    store.delete_tm(tm_id).unwrap();
    assert!(locks.get(tm_id).unwrap().is_none());
}

#[test]
fn test_manager_single_holder() {
    let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
    let a = BuildLockManager::new(Arc::clone(&store), "worker-a", TTL);
    let b = BuildLockManager::new(store, "worker-b", TTL);

    let guard = a.try_acquire(1).unwrap().expect("first acquisition");
    assert_eq!(guard.tm_id(), 1);
    assert!(guard.token().starts_with("worker-a/"));
    assert!(a.is_held(1));

    assert!(b.try_acquire(1).unwrap().is_none());
    assert!(a.try_acquire(1).unwrap().is_none());
    assert!(!a.is_stale(1).unwrap());

    assert!(a.renew(&guard).unwrap());
    assert!(a.release_guard(guard).unwrap());
    assert!(!a.is_held(1));
    assert!(b.try_acquire(1).unwrap().is_some());
}

#[test]
fn test_release_without_holding_is_noop() {
    let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
    let a = BuildLockManager::new(Arc::clone(&store), "worker-a", TTL);
    let b = BuildLockManager::new(Arc::clone(&store), "worker-b", TTL);

    b.release(1).unwrap();
    let _guard = a.try_acquire(1).unwrap().unwrap();
    b.release(1).unwrap();
    assert!(a.current(1).unwrap().is_some());

    a.release(1).unwrap();
    assert!(a.current(1).unwrap().is_none());
    a.release(1).unwrap();
}

#[test]
fn test_stale_lock_reclaimed_by_other_worker() {
    let memory = Arc::new(MemoryLockStore::new());
    let an_hour_ago = Utc::now().timestamp_millis() - 3_600_000;
    memory.insert_raw(BuildLock {
        tm_id: 3,
        holder: "crashed/1".into(),
        acquired_at: an_hour_ago,
    });
    let store: Arc<dyn LockStore> = memory;
    let manager = BuildLockManager::new(store, "worker-b", TTL);

    assert!(manager.is_stale(3).unwrap());
    let guard = manager.try_acquire(3).unwrap().expect("stale lock is reclaimable");
    assert_eq!(manager.current(3).unwrap().unwrap().worker(), "worker-b");
    assert!(!manager.is_stale(3).unwrap());
    manager.release_guard(guard).unwrap();
}

#[test]
fn test_reclaim_stale_sweep() {
    let memory = Arc::new(MemoryLockStore::new());
    let now = Utc::now().timestamp_millis();
    memory.insert_raw(BuildLock {
        tm_id: 1,
        holder: "crashed/1".into(),
        acquired_at: now - 3_600_000,
    });
    memory.insert_raw(BuildLock {
        tm_id: 2,
        holder: "alive/1".into(),
        acquired_at: now,
    });
    let store: Arc<dyn LockStore> = memory.clone();
    let manager = BuildLockManager::new(store, "sweeper", TTL);

    let removed = manager.reclaim_stale().unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].tm_id, 1);
    assert_eq!(memory.len(), 1);
    assert!(manager.reclaim_stale().unwrap().is_empty());
}

#[test]
fn test_renew_detects_lost_lock() {
    let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
    let a = BuildLockManager::new(Arc::clone(&store), "worker-a", Duration::ZERO);
    let b = BuildLockManager::new(store, "worker-b", TTL);

    let guard = a.try_acquire(5).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    // Zero TTL makes the lock immediately stale for a's sweep.
    assert_eq!(a.reclaim_stale().unwrap().len(), 1);
    let _taken = b.try_acquire(5).unwrap().unwrap();

    assert!(!a.renew(&guard).unwrap());
    assert!(!a.release_guard(guard).unwrap());
    assert_eq!(b.current(5).unwrap().unwrap().worker(), "worker-b");
}

#[test]
fn test_release_all_held() {
    let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
    let manager = BuildLockManager::new(Arc::clone(&store), "worker", TTL);
    for tm_id in 1..=3 {
        manager.try_acquire(tm_id).unwrap().unwrap();
    }

    assert_eq!(manager.release_all_held(), 3);
    assert_eq!(manager.release_all_held(), 0);
    assert!(store.get(2).unwrap().is_none());
}

#[test]
fn test_racing_reclaimers_exactly_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locks.db");
    let seed = EntryStore::open(&path).unwrap();
    let tm_id = seed.create_tm(&NewTm::new("tm", "en", "fr")).unwrap().id;
    seed.pool()
        .get()
        .unwrap()
        .execute(
            "INSERT INTO build_locks (tm_id, holder, acquired_at) VALUES (?1, 'dead/1', 0)",
            [tm_id],
        )
        .unwrap();

    const WORKERS: usize = 8;
    let barrier = Arc::new(Barrier::new(WORKERS));
    let winners: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                scope.spawn(move || {
                    // Separate pools stand in for separate worker processes.
                    let store = EntryStore::open(&path).unwrap();
                    let locks: Arc<dyn LockStore> =
                        Arc::new(SqliteLockStore::new(store.pool().clone()));
                    let manager = BuildLockManager::new(locks, format!("worker-{i}"), TTL);
                    barrier.wait();
                    usize::from(manager.try_acquire(tm_id).unwrap().is_some())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(winners, 1);
    let lock = seed.pool().get().unwrap().query_row(
        "SELECT holder FROM build_locks WHERE tm_id = ?1",
        [tm_id],
        |row| row.get::<_, String>(0),
    );
    assert!(lock.unwrap().starts_with("worker-"));
}
