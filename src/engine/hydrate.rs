//! Startup recovery: crashed builds, persisted snapshots, orphaned files.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::index::{SnapshotRegistry, SnapshotStore};
use crate::lock::BuildLockManager;
use crate::store::{EntryStore, StoreResult, TmId, TmStatus, TranslationMemory};

/// What startup recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    /// TMs left `indexing` by a dead builder, reset for rebuild.
    pub recovered: Vec<TmId>,
    /// Snapshots installed from disk.
    pub loaded: Vec<TmId>,
    /// TMs whose snapshot was missing or unusable; the sweep rebuilds them.
    pub invalidated: Vec<TmId>,
    /// Snapshot files of deleted TMs that were removed.
    pub orphans_removed: usize,
}

pub(crate) fn hydrate(
    store: &EntryStore,
    locks: &BuildLockManager,
    registry: &SnapshotRegistry,
    snapshots: &SnapshotStore,
    provider: &dyn EmbeddingProvider,
) -> StoreResult<HydrationReport> {
    let mut report = HydrationReport {
        recovered: store.recover_interrupted_builds(locks.stale_cutoff_ms())?,
        ..HydrationReport::default()
    };

    let tms = store.list_tms()?;
    for tm in &tms {
        if tm.index_version == 0 || !matches!(tm.status, TmStatus::Ready | TmStatus::Error) {
            continue;
        }
        match load_snapshot(tm, registry, snapshots, provider) {
            Ok(()) => report.loaded.push(tm.id),
            Err(reason) => {
                warn!(tm_id = tm.id, reason, "Persisted snapshot not usable");
                store.invalidate_index(tm.id, reason)?;
                report.invalidated.push(tm.id);
            }
        }
    }

    let known: HashSet<TmId> = tms.iter().map(|tm| tm.id).collect();
    match snapshots.list() {
        Ok(ids) => {
            for id in ids.into_iter().filter(|id| !known.contains(id)) {
                match snapshots.remove(id) {
                    Ok(_) => report.orphans_removed += 1,
                    Err(e) => warn!(tm_id = id, error = %e, "Failed to remove orphaned snapshot"),
                }
            }
        }
        Err(e) => warn!(error = %e, "Failed to list persisted snapshots"),
    }

    info!(
        recovered = report.recovered.len(),
        loaded = report.loaded.len(),
        invalidated = report.invalidated.len(),
        orphans_removed = report.orphans_removed,
        "Hydration complete"
    );
    Ok(report)
}

fn load_snapshot(
    tm: &TranslationMemory,
    registry: &SnapshotRegistry,
    snapshots: &SnapshotStore,
    provider: &dyn EmbeddingProvider,
) -> Result<(), &'static str> {
    let snapshot = match snapshots.load(tm.id) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Err("snapshot missing on disk"),
        Err(e) => {
            warn!(tm_id = tm.id, error = %e, "Failed to read persisted snapshot");
            return Err("snapshot unreadable");
        }
    };

    if snapshot.version() != tm.index_version {
        return Err("snapshot version does not match the index version");
    }
    if snapshot.provider() != provider.name() || snapshot.dimension() != provider.dimension() {
        return Err("snapshot built by a different embedding provider");
    }
    registry
        .install(snapshot)
        .map(|_| ())
        .map_err(|_| "a newer snapshot is already installed")
}
