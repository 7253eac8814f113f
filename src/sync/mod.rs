//! Auto-sync: debounced index rebuilds driven by entry-store changes.
//!
//! The entry store reports every committed mutation through a [`SyncHandle`]
//! (a bounded, non-blocking channel). The [`AutoSyncCoordinator`] coalesces bursts
//! per TM, runs at most one build per TM at a time, retries with exponential
//! backoff, and periodically sweeps for stale locks and missed changes.

mod config;
mod coordinator;
mod handle;


pub use config::{DEFAULT_SHUTDOWN_GRACE_SECS, SyncConfig};
pub use coordinator::AutoSyncCoordinator;
pub use handle::{PendingChanges, SyncHandle, SyncStats};
