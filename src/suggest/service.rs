use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::error::{SuggestError, SuggestResult};
use super::policy::StalePolicy;
use crate::constants::MAX_SUGGESTION_RESULTS;
use crate::embedding::EmbeddingProvider;
use crate::index::{IndexSnapshot, ScoredMatch, SnapshotRegistry, SnapshotStore};
use crate::store::{EntryStore, TmId, TmStatus, TranslationMemory};

/// Ranked matches from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionSet {
    pub tm_id: TmId,
    /// Version of the snapshot that answered.
    pub index_version: u64,
    pub status: TmStatus,
    /// The snapshot predates committed changes or the TM is not `ready`.
    pub stale: bool,
    pub suggestions: Vec<ScoredMatch>,
}

impl SuggestionSet {
    pub fn count(&self) -> usize {
        self.suggestions.len()
    }
}

/// Why a query could not be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReadyReason {
    /// No TM id was given and no TM is `ready`.
    NoReadyTm,
    /// The TM has never been indexed.
    Pending,
    Indexing,
    Error,
    /// The TM is `ready` but no usable snapshot is available to this worker.
    SnapshotUnavailable,
}

impl NotReadyReason {
    fn for_status(status: TmStatus) -> Self {
        match status {
            TmStatus::Pending => NotReadyReason::Pending,
            TmStatus::Indexing => NotReadyReason::Indexing,
            TmStatus::Error => NotReadyReason::Error,
            TmStatus::Ready => NotReadyReason::SnapshotUnavailable,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            NotReadyReason::NoReadyTm => "no translation memory is ready",
            NotReadyReason::Pending => "translation memory has not been indexed yet",
            NotReadyReason::Indexing => "index build in progress",
            NotReadyReason::Error => "last index build failed",
            NotReadyReason::SnapshotUnavailable => "index snapshot unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotReady {
    pub tm_id: Option<TmId>,
    pub status: Option<TmStatus>,
    pub reason: NotReadyReason,
    pub last_error: Option<String>,
}

/// Result of a valid query. "Not ready" is distinct from an empty match list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SuggestOutcome {
    Ready(SuggestionSet),
    NotReady(NotReady),
}

impl SuggestOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, SuggestOutcome::Ready(_))
    }

    pub fn suggestions(&self) -> &[ScoredMatch] {
        match self {
            SuggestOutcome::Ready(set) => &set.suggestions,
            SuggestOutcome::NotReady(_) => &[],
        }
    }
}

/// Checks query parameters before any lookup.
pub fn validate_query(source: &str, threshold: f32, max_results: i64) -> SuggestResult<usize> {
    if source.trim().is_empty() {
        return Err(SuggestError::EmptySource);
    }
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(SuggestError::InvalidThreshold { value: threshold });
    }
    match usize::try_from(max_results) {
        Ok(n) if (1..=MAX_SUGGESTION_RESULTS).contains(&n) => Ok(n),
        _ => Err(SuggestError::InvalidMaxResults { value: max_results }),
    }
}

/// Fuzzy-match queries against the installed snapshots.
///
/// Never waits for a build: the answer comes from whichever snapshot is installed
/// when the query starts, or is an explicit [`SuggestOutcome::NotReady`].
pub struct SuggestionService {
    store: Arc<EntryStore>,
    registry: Arc<SnapshotRegistry>,
    snapshots: Option<SnapshotStore>,
    provider: Arc<dyn EmbeddingProvider>,
    policy: StalePolicy,
}

impl std::fmt::Debug for SuggestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionService")
            .field("provider", &self.provider.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SuggestionService {
    pub fn new(
        store: Arc<EntryStore>,
        registry: Arc<SnapshotRegistry>,
        provider: Arc<dyn EmbeddingProvider>,
        policy: StalePolicy,
    ) -> Self {
        Self {
            store,
            registry,
            snapshots: None,
            provider,
            policy,
        }
    }

    /// Falls back to persisted snapshots written by other workers.
    pub fn with_snapshot_store(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn policy(&self) -> StalePolicy {
        self.policy
    }

    /// Ranks the entries of `tm_id` (or of the most recently indexed `ready` TM)
    /// against `source`.
    #[instrument(skip(self, source), fields(source_len = source.len()))]
    pub async fn suggest(
        &self,
        tm_id: Option<TmId>,
        source: &str,
        threshold: f32,
        max_results: i64,
    ) -> SuggestResult<SuggestOutcome> {
        let max_results = validate_query(source, threshold, max_results)?;

        let tm = match tm_id {
            Some(tm_id) => self.store.get_tm(tm_id)?,
            None => match self.store.latest_ready_tm()? {
                Some(tm) => tm,
                None => {
                    return Ok(SuggestOutcome::NotReady(NotReady {
                        tm_id: None,
                        status: None,
                        reason: NotReadyReason::NoReadyTm,
                        last_error: None,
                    }));
                }
            },
        };

        let Some(snapshot) = self.usable_snapshot(&tm) else {
            debug!(tm_id = tm.id, status = %tm.status, "Suggestion not ready");
            return Ok(SuggestOutcome::NotReady(NotReady {
                tm_id: Some(tm.id),
                status: Some(tm.status),
                reason: NotReadyReason::for_status(tm.status),
                last_error: tm.last_error.clone(),
            }));
        };

        let query = self.provider.embed(source).await?;
        let suggestions = snapshot.search(&query, threshold, max_results)?;
        let stale = tm.status != TmStatus::Ready
            || tm.is_dirty()
            || snapshot.version() < tm.index_version;

        debug!(
            tm_id = tm.id,
            index_version = snapshot.version(),
            matches = suggestions.len(),
            stale,
            "Suggestion query served"
        );
        Ok(SuggestOutcome::Ready(SuggestionSet {
            tm_id: tm.id,
            index_version: snapshot.version(),
            status: tm.status,
            stale,
            suggestions,
        }))
    }

    /// The snapshot `tm` may be answered from under the configured policy.
    fn usable_snapshot(&self, tm: &TranslationMemory) -> Option<Arc<IndexSnapshot>> {
        if tm.status == TmStatus::Pending || tm.index_version == 0 {
            return None;
        }

        let snapshot = match &self.snapshots {
            Some(snapshots) => match self.registry.get_or_load(snapshots, tm.id, tm.index_version) {
                Ok(Some(snapshot)) => Some(snapshot),
                Ok(None) => self.registry.get(tm.id),
                Err(e) => {
                    warn!(tm_id = tm.id, error = %e, "Persisted snapshot unusable");
                    self.registry.get(tm.id)
                }
            },
            None => self.registry.get(tm.id),
        }?;

        if snapshot.provider() != self.provider.name()
            || snapshot.dimension() != self.provider.dimension()
        {
            warn!(
                tm_id = tm.id,
                snapshot_provider = snapshot.provider(),
                provider = self.provider.name(),
                "Snapshot was built by a different embedding provider"
            );
            return None;
        }

        let current = tm.status == TmStatus::Ready && snapshot.version() >= tm.index_version;
        if current || self.policy == StalePolicy::ServeLastGood {
            Some(snapshot)
        } else {
            None
        }
    }
}
