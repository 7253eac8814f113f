//! Per-TM build locks.
//!
//! The lock is a persisted row acquired by one conditional write (insert if absent,
//! or take over if older than the TTL), so exclusion holds across worker processes
//! sharing the database. [`MemoryLockStore`] substitutes a plain mutex-guarded map.

pub mod error;
mod manager;
mod model;
mod store;

#[cfg(test)]
mod tests;

pub use error::{LockError, LockResult};
pub use manager::{BuildLockManager, LockGuard};
pub use model::BuildLock;
pub use store::{LockStore, MemoryLockStore, SqliteLockStore};
