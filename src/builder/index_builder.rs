use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::error::{BuildError, BuildResult};
use crate::embedding::{EmbeddingProvider, validate_batch};
use crate::index::{IndexError, SnapshotBuilder, SnapshotRegistry, SnapshotStore};
use crate::lock::{BuildLockManager, LockGuard};
use crate::store::{EntryStore, TmId, TmStatus, TranslationMemory};

/// Whether a build may be skipped when the index is already current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Always rebuild (explicit rebuild requests).
    Force,
    /// Skip when the TM is `ready`, clean and its snapshot is installed.
    IfStale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    Built {
        tm_id: TmId,
        index_version: u64,
        entries: usize,
        revision: u64,
    },
    /// Another holder owns the build lock; nothing was done.
    Contended {
        tm_id: TmId,
        holder: Option<String>,
    },
    UpToDate {
        tm_id: TmId,
        index_version: u64,
    },
}

/// Build counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub contended: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    contended: AtomicU64,
    skipped: AtomicU64,
}

/// Embeds all entries of a TM into a new snapshot and drives the status machine.
///
/// A build reads the TM as of one store transaction, embeds in batches of
/// `batch_size`, and renews its lock after every batch. Any failure abandons the
/// partial snapshot. On success the snapshot is installed before the TM becomes
/// `ready`, so `ready` is never visible ahead of a queryable index.
pub struct IndexBuilder {
    store: Arc<EntryStore>,
    locks: Arc<BuildLockManager>,
    provider: Arc<dyn EmbeddingProvider>,
    registry: Arc<SnapshotRegistry>,
    snapshots: Option<SnapshotStore>,
    batch_size: usize,
    counters: Counters,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("provider", &self.provider.name())
            .field("dimension", &self.provider.dimension())
            .field("batch_size", &self.batch_size)
            .field("persist", &self.snapshots.is_some())
            .finish()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl IndexBuilder {
    pub fn new(
        store: Arc<EntryStore>,
        locks: Arc<BuildLockManager>,
        provider: Arc<dyn EmbeddingProvider>,
        registry: Arc<SnapshotRegistry>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            locks,
            provider,
            registry,
            snapshots: None,
            batch_size: batch_size.max(1),
            counters: Counters::default(),
        }
    }

    /// Persists every installed snapshot to `snapshots`.
    pub fn with_snapshot_store(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    pub fn snapshot_store(&self) -> Option<&SnapshotStore> {
        self.snapshots.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> BuildStats {
        BuildStats {
            started: self.counters.started.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            contended: self.counters.contended.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// `true` if `tm` is `ready`, has no unindexed revisions and its snapshot is
    /// installed here (loading it from disk if another worker built it).
    fn is_current(&self, tm: &TranslationMemory) -> bool {
        if tm.status != TmStatus::Ready || tm.is_dirty() {
            return false;
        }
        if self.registry.version(tm.id) == Some(tm.index_version) {
            return true;
        }
        let Some(snapshots) = &self.snapshots else {
            return false;
        };
        match self.registry.get_or_load(snapshots, tm.id, tm.index_version) {
            Ok(snapshot) => snapshot.is_some(),
            Err(e) => {
                warn!(tm_id = tm.id, error = %e, "Persisted snapshot unusable; rebuilding");
                false
            }
        }
    }

    /// Runs one build attempt for `tm_id`.
    ///
    /// Lock contention is a normal outcome ([`BuildOutcome::Contended`]), not an
    /// error. Build failures leave the TM in `error` with the message retained.
    #[instrument(skip(self), fields(provider = %self.provider.name()))]
    pub async fn build(&self, tm_id: TmId, mode: BuildMode) -> BuildResult<BuildOutcome> {
        let result = self.build_inner(tm_id, mode).await;
        if let Err(e) = &result
            && e.is_tm_missing()
        {
            self.forget(tm_id);
        }
        result
    }

    async fn build_inner(&self, tm_id: TmId, mode: BuildMode) -> BuildResult<BuildOutcome> {
        if mode == BuildMode::IfStale {
            let tm = self.store.get_tm(tm_id)?;
            if self.is_current(&tm) {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(BuildOutcome::UpToDate {
                    tm_id,
                    index_version: tm.index_version,
                });
            }
        }

        let Some(guard) = self.locks.try_acquire(tm_id)? else {
            self.counters.contended.fetch_add(1, Ordering::Relaxed);
            let holder = self.locks.current(tm_id).ok().flatten().map(|l| l.holder);
            debug!(tm_id, ?holder, "Build skipped: lock held elsewhere");
            return Ok(BuildOutcome::Contended { tm_id, holder });
        };

        let result = self.build_locked(&guard, mode).await;

        if let Err(e) = self.locks.release_guard(guard) {
            warn!(tm_id, error = %e, "Failed to release build lock");
        }
        result
    }

    async fn build_locked(&self, guard: &LockGuard, mode: BuildMode) -> BuildResult<BuildOutcome> {
        let tm_id = guard.tm_id();

        // Another worker may have finished a build between our check and the lock.
        if mode == BuildMode::IfStale {
            let tm = self.store.get_tm(tm_id)?;
            if self.is_current(&tm) {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(BuildOutcome::UpToDate {
                    tm_id,
                    index_version: tm.index_version,
                });
            }
        }

        let tm = self.store.begin_build(tm_id)?;
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        match self.run(guard, &tm).await {
            Ok(outcome) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(outcome)
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(tm_id, error = %e, "Index build failed");
                // A lost lock belongs to another build now; its status is not ours to set.
                if !e.is_tm_missing()
                    && !matches!(e, BuildError::LockLost { .. })
                    && let Err(fail_err) = self.store.fail_build(tm_id, &e.to_string())
                {
                    warn!(tm_id, error = %fail_err, "Could not record build failure");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, guard: &LockGuard, tm: &TranslationMemory) -> BuildResult<BuildOutcome> {
        let started = Instant::now();
        let tm_id = tm.id;
        let store = Arc::clone(&self.store);
        let read = tokio::task::spawn_blocking(move || store.read_snapshot(tm_id)).await??;
        let dimension = self.provider.dimension();
        let total = read.entries.len();

        info!(
            tm_id,
            entries = total,
            revision = read.revision,
            batch_size = self.batch_size,
            "Index build started"
        );

        let mut snapshot = SnapshotBuilder::new(tm_id, dimension, self.provider.name())
            .with_capacity(total);

        for chunk in read.entries.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|e| e.source.clone()).collect();
            let vectors = self.provider.embed_batch(&texts).await?;
            validate_batch(texts.len(), dimension, &vectors)?;
            snapshot.push_batch(chunk, vectors)?;

            if !self.locks.renew(guard)? {
                return Err(BuildError::LockLost { tm_id });
            }
            debug!(tm_id, embedded = snapshot.len(), total, "Embedded batch");
        }

        let version = tm
            .index_version
            .max(self.registry.version(tm_id).unwrap_or(0))
            + 1;
        let snapshot = snapshot.finish(version, read.revision, now_ms());

        let (snapshot, staged) = match self.snapshots.clone() {
            Some(snapshots) => {
                tokio::task::spawn_blocking(move || {
                    let staged = snapshots.stage(&snapshot)?;
                    Ok::<_, IndexError>((snapshot, Some(staged)))
                })
                .await??
            }
            None => (snapshot, None),
        };

        // Fencing check before anything becomes visible. A dropped stage is deleted.
        if !self.locks.renew(guard)? {
            return Err(BuildError::LockLost { tm_id });
        }
        if let Some(staged) = staged {
            staged.commit()?;
        }
        self.registry.install(snapshot)?;
        self.store.complete_build(tm_id, version, read.revision)?;

        info!(
            tm_id,
            index_version = version,
            entries = total,
            revision = read.revision,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index build complete"
        );

        Ok(BuildOutcome::Built {
            tm_id,
            index_version: version,
            entries: total,
            revision: read.revision,
        })
    }

    /// Drops the in-memory and persisted snapshot of a TM.
    pub fn forget(&self, tm_id: TmId) {
        self.registry.remove(tm_id);
        if let Some(snapshots) = &self.snapshots
            && let Err(e) = snapshots.remove(tm_id)
        {
            warn!(tm_id, error = %e, "Failed to remove persisted snapshot");
        }
    }
}
