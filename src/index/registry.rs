use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::error::{IndexError, IndexResult};
use super::persist::SnapshotStore;
use super::snapshot::IndexSnapshot;
use crate::store::TmId;

/// The active snapshot per TM.
///
/// Installing replaces the `Arc` under a short write lock. A reader that already
/// cloned the previous `Arc` keeps querying it; the old snapshot is dropped with
/// its last reader.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    snapshots: RwLock<HashMap<TmId, Arc<IndexSnapshot>>>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `snapshot` the active index of its TM. Versions only move forward.
    pub fn install(&self, snapshot: IndexSnapshot) -> IndexResult<Arc<IndexSnapshot>> {
        let snapshot = Arc::new(snapshot);
        let mut snapshots = self.snapshots.write();
        if let Some(current) = snapshots.get(&snapshot.tm_id())
            && current.version() >= snapshot.version()
        {
            return Err(IndexError::StaleVersion {
                tm_id: snapshot.tm_id(),
                current: current.version(),
                attempted: snapshot.version(),
            });
        }
        snapshots.insert(snapshot.tm_id(), Arc::clone(&snapshot));
        debug!(
            tm_id = snapshot.tm_id(),
            index_version = snapshot.version(),
            entries = snapshot.len(),
            "Snapshot installed"
        );
        Ok(snapshot)
    }

    /// Returns the active snapshot if it is at least `version`, otherwise tries to
    /// install `version` from `store` (written by this or another worker).
    ///
    /// `Ok(None)` if neither memory nor disk has that version.
    pub fn get_or_load(
        &self,
        store: &SnapshotStore,
        tm_id: TmId,
        version: u64,
    ) -> IndexResult<Option<Arc<IndexSnapshot>>> {
        if let Some(current) = self.get(tm_id)
            && current.version() >= version
        {
            return Ok(Some(current));
        }

        let Some(loaded) = store.load(tm_id)? else {
            return Ok(None);
        };
        if loaded.version() != version {
            return Ok(None);
        }
        match self.install(loaded) {
            Ok(snapshot) => Ok(Some(snapshot)),
            // Lost a race with a concurrent install of the same or a newer version.
            Err(IndexError::StaleVersion { .. }) => Ok(self.get(tm_id)),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, tm_id: TmId) -> Option<Arc<IndexSnapshot>> {
        self.snapshots.read().get(&tm_id).cloned()
    }

    pub fn version(&self, tm_id: TmId) -> Option<u64> {
        self.snapshots.read().get(&tm_id).map(|s| s.version())
    }

    pub fn remove(&self, tm_id: TmId) -> Option<Arc<IndexSnapshot>> {
        self.snapshots.write().remove(&tm_id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}
