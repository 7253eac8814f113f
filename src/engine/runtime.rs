use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::error::{EngineError, EngineResult};
use super::hydrate::{HydrationReport, hydrate};
use crate::builder::IndexBuilder;
use crate::config::Config;
use crate::constants::{DEFAULT_EMBEDDER_TIMEOUT_SECS, DEFAULT_QUERY_CACHE_CAPACITY};
use crate::embedding::{CachedEmbedder, EmbeddingProvider, provider_from_parts};
use crate::index::{SnapshotRegistry, SnapshotStore};
use crate::lock::{BuildLockManager, LockStore, SqliteLockStore};
use crate::store::{
    ChangeEvent, ChangeNotifier, ChangeOp, EntryStore, NewTm, StoreResult, TmId,
    TranslationMemory,
};
use crate::suggest::{SuggestOutcome, SuggestResult, SuggestionService};
use crate::sync::{AutoSyncCoordinator, SyncConfig, SyncHandle};

/// Assembles an [`Engine`] from a [`Config`], with optional injected parts.
pub struct EngineBuilder {
    config: Config,
    store: Option<Arc<EntryStore>>,
    lock_store: Option<Arc<dyn LockStore>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    sync_config: Option<SyncConfig>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            lock_store: None,
            provider: None,
            sync_config: None,
        }
    }

    /// Uses `store` instead of opening `{data_dir}/tmsync.db`.
    pub fn store(mut self, store: Arc<EntryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `lock_store` instead of the lock table of the entry store's database.
    pub fn lock_store(mut self, lock_store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(lock_store);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Overrides the auto-sync settings derived from the config.
    pub fn sync_config(mut self, sync_config: SyncConfig) -> Self {
        self.sync_config = Some(sync_config);
        self
    }

    /// Opens storage, recovers state left by a previous run and starts auto-sync.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(self) -> EngineResult<Engine> {
        let config = self.config;
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(EntryStore::open(&config.db_path())?),
        };
        let lock_store = self
            .lock_store
            .unwrap_or_else(|| Arc::new(SqliteLockStore::new(store.pool().clone())));
        let provider = match self.provider {
            Some(provider) => provider,
            None => provider_from_parts(
                config.embedder_url.as_deref(),
                &config.embedder_model,
                config.embedding_dim,
                Duration::from_secs(DEFAULT_EMBEDDER_TIMEOUT_SECS),
            )?,
        };

        let worker_id = config.resolved_worker_id();
        let locks = Arc::new(BuildLockManager::new(
            lock_store,
            worker_id.clone(),
            config.lock_ttl,
        ));
        let registry = Arc::new(SnapshotRegistry::new());
        let snapshots = SnapshotStore::new(config.snapshot_dir());

        let hydration = hydrate(&store, &locks, &registry, &snapshots, provider.as_ref())?;

        let builder = Arc::new(
            IndexBuilder::new(
                Arc::clone(&store),
                Arc::clone(&locks),
                Arc::clone(&provider),
                Arc::clone(&registry),
                config.batch_size,
            )
            .with_snapshot_store(snapshots.clone()),
        );

        let query_provider: Arc<dyn EmbeddingProvider> = Arc::new(CachedEmbedder::new(
            Arc::clone(&provider),
            DEFAULT_QUERY_CACHE_CAPACITY,
        ));
        let suggestions = Arc::new(
            SuggestionService::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                query_provider,
                config.stale_policy,
            )
            .with_snapshot_store(snapshots),
        );

        let sync_config = self.sync_config.unwrap_or_else(|| config.sync_config());
        let (sync, sync_task) = AutoSyncCoordinator::spawn(
            Arc::clone(&builder),
            Arc::clone(&locks),
            Arc::clone(&store),
            sync_config,
        );
        store.set_notifier(Arc::new(sync.clone()));

        info!(
            worker_id = %worker_id,
            provider = provider.name(),
            dimension = provider.dimension(),
            data_dir = %config.data_dir.display(),
            "Engine started"
        );

        Ok(Engine {
            config,
            store,
            locks,
            registry,
            builder,
            suggestions,
            provider,
            sync,
            sync_task: Mutex::new(Some(sync_task)),
            hydration,
        })
    }
}

/// The running indexing and consistency engine.
///
/// Entry mutations go straight to [`store`](Self::store); indexing follows
/// asynchronously through the auto-sync coordinator.
pub struct Engine {
    config: Config,
    store: Arc<EntryStore>,
    locks: Arc<BuildLockManager>,
    registry: Arc<SnapshotRegistry>,
    builder: Arc<IndexBuilder>,
    suggestions: Arc<SuggestionService>,
    provider: Arc<dyn EmbeddingProvider>,
    sync: SyncHandle,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    hydration: HydrationReport,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("worker_id", &self.locks.worker_id())
            .field("provider", &self.provider.name())
            .field("snapshots", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts an engine from `config` alone.
    pub async fn start(config: Config) -> EngineResult<Self> {
        EngineBuilder::new(config).start().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<BuildLockManager> {
        &self.locks
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    pub fn builder(&self) -> &Arc<IndexBuilder> {
        &self.builder
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    pub fn hydration(&self) -> &HydrationReport {
        &self.hydration
    }

    /// Creates a TM and schedules its first (empty) build.
    pub fn create_tm(&self, new: &NewTm) -> StoreResult<TranslationMemory> {
        let tm = self.store.create_tm(new)?;
        self.sync
            .notify(ChangeEvent::new(tm.id, ChangeOp::Reconcile, 0));
        Ok(tm)
    }

    /// Deletes a TM with its entries, lock row, snapshot and sync state.
    pub fn delete_tm(&self, tm_id: TmId) -> StoreResult<()> {
        self.store.delete_tm(tm_id)?;
        self.builder.forget(tm_id);
        self.sync.forget(tm_id);
        Ok(())
    }

    /// Queues a forced rebuild and returns the TM as it is now. The build still
    /// goes through the build lock.
    ///
    /// A clean `ready` TM is never picked up by the sweep, so a request that could
    /// not be queued is reported instead of dropped.
    pub fn request_rebuild(&self, tm_id: TmId) -> EngineResult<TranslationMemory> {
        let tm = self.store.get_tm(tm_id)?;
        if !self.sync.request_rebuild(tm_id) {
            warn!(tm_id, "Rebuild request not queued");
            return Err(EngineError::RebuildNotQueued { tm_id });
        }
        Ok(tm)
    }

    pub async fn suggest(
        &self,
        tm_id: Option<TmId>,
        source: &str,
        threshold: f32,
        max_results: i64,
    ) -> SuggestResult<SuggestOutcome> {
        self.suggestions
            .suggest(tm_id, source, threshold, max_results)
            .await
    }

    /// `true` while the database answers and auto-sync runs.
    pub fn is_ready(&self) -> bool {
        self.store.ping().is_ok() && self.sync.is_running()
    }

    /// Stops auto-sync (letting in-flight builds finish within the grace period)
    /// and releases every build lock this worker still holds.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
        let task = self.sync_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Auto-sync task ended abnormally");
        }
        self.store.clear_notifier();
        let released = self.locks.release_all_held();
        info!(released, "Engine stopped");
    }
}
