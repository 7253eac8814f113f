use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::store::{ChangeEvent, ChangeNotifier, ChangeOp, TmId};

#[derive(Debug)]
pub(crate) enum SyncCommand {
    Change(ChangeEvent),
    Rebuild(TmId),
    Forget(TmId),
    Shutdown,
}

/// Mutation counts accumulated between two builds of a TM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingChanges {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl PendingChanges {
    pub(crate) fn record(&mut self, event: &ChangeEvent) {
        let count = u64::from(event.count);
        match event.op {
            ChangeOp::Insert => self.inserts += count,
            ChangeOp::Update => self.updates += count,
            ChangeOp::Delete => self.deletes += count,
            ChangeOp::Reconcile => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserts == 0 && self.updates == 0 && self.deletes == 0
    }
}

impl fmt::Display for PendingChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INSERT={}, UPDATE={}, DELETE={}",
            self.inserts, self.updates, self.deletes
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    pub notifications: AtomicU64,
    pub dropped: AtomicU64,
    pub builds_fired: AtomicU64,
    pub builds_completed: AtomicU64,
    pub builds_failed: AtomicU64,
    pub builds_contended: AtomicU64,
    pub follow_ups: AtomicU64,
    pub sweeps: AtomicU64,
    pub locks_reclaimed: AtomicU64,
    pub reconciled: AtomicU64,
}

impl SyncCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub notifications: u64,
    /// Notifications lost to a full or closed channel.
    pub dropped: u64,
    pub builds_fired: u64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    pub builds_contended: u64,
    pub follow_ups: u64,
    pub sweeps: u64,
    pub locks_reclaimed: u64,
    /// Dirty TMs scheduled by the sweep rather than a notification.
    pub reconciled: u64,
}

/// Cloneable front end of the auto-sync coordinator.
///
/// Every method is non-blocking; delivery failures are reported, never awaited.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
    counters: Arc<SyncCounters>,
}

impl SyncHandle {
    pub(crate) fn new(tx: mpsc::Sender<SyncCommand>, counters: Arc<SyncCounters>) -> Self {
        Self { tx, counters }
    }

    fn send(&self, command: SyncCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                debug!(?command, "Sync channel full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Schedules a rebuild that bypasses the debounce window.
    pub fn request_rebuild(&self, tm_id: TmId) -> bool {
        self.send(SyncCommand::Rebuild(tm_id))
    }

    /// Drops all scheduling state for a deleted TM.
    pub fn forget(&self, tm_id: TmId) -> bool {
        self.send(SyncCommand::Forget(tm_id))
    }

    /// Asks the coordinator to stop; it finishes in-flight builds within its grace
    /// period. Waits for channel capacity, unlike the other methods.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SyncCommand::Shutdown).await;
    }

    /// `false` once the coordinator has stopped.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        SyncStats {
            notifications: load(&c.notifications),
            dropped: load(&c.dropped),
            builds_fired: load(&c.builds_fired),
            builds_completed: load(&c.builds_completed),
            builds_failed: load(&c.builds_failed),
            builds_contended: load(&c.builds_contended),
            follow_ups: load(&c.follow_ups),
            sweeps: load(&c.sweeps),
            locks_reclaimed: load(&c.locks_reclaimed),
            reconciled: load(&c.reconciled),
        }
    }
}

impl ChangeNotifier for SyncHandle {
    fn notify(&self, event: ChangeEvent) -> bool {
        let delivered = self.send(SyncCommand::Change(event));
        if !delivered {
            SyncCounters::bump(&self.counters.dropped);
        }
        delivered
    }
}
