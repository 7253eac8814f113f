//! TM-Sync library crate (used by the server binary and integration tests).
//!
//! Keeps similarity indexes over translation memories consistent with the
//! entries they are built from.
//!
//! # Public API Surface
//!
//! ## Core Types
//! - [`Engine`], [`EngineBuilder`] - Wiring of every component below
//! - [`Config`], [`ConfigError`] - Runtime configuration
//! - [`EntryStore`] - Durable entries, TM status and revisions
//!
//! ## Indexing
//! - [`IndexBuilder`], [`BuildMode`] - Locked, atomic index builds
//! - [`BuildLockManager`] - Per-TM single-writer lock with stale reclamation
//! - [`SnapshotRegistry`], [`SnapshotStore`] - Installed and persisted snapshots
//! - [`AutoSyncCoordinator`], [`SyncHandle`] - Debounced rebuilds and the reconciliation sweep
//!
//! ## Queries
//! - [`SuggestionService`], [`SuggestOutcome`] - Fuzzy suggestions with explicit not-ready answers
//!
//! ## Embedding
//! - [`EmbeddingProvider`] - Opaque `embed(text) -> vector` seam
//! - [`HashingEmbedder`], [`HttpEmbeddingProvider`], [`CachedEmbedder`]
//!
//! ## Test/Mock Support
//! Mock implementations are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod builder;
pub mod config;
pub mod constants;
pub mod embedding;
pub mod engine;
pub mod gateway;
pub mod hashing;
pub mod index;
pub mod lock;
pub mod store;
pub mod suggest;
pub mod sync;

pub use builder::{BuildError, BuildMode, BuildOutcome, BuildResult, BuildStats, IndexBuilder};
pub use config::{Config, ConfigError};
#[cfg(any(test, feature = "mock"))]
pub use embedding::MockEmbedder;
pub use embedding::{
    CachedEmbedder, EmbeddingError, EmbeddingProvider, EmbeddingResult, HashingEmbedder,
    HttpEmbeddingProvider, provider_from_parts,
};
pub use engine::{Engine, EngineBuilder, EngineError, EngineResult, HydrationReport};
pub use hashing::{feature_bucket, hash_query, hash_to_u64};
pub use index::{
    IndexError, IndexResult, IndexSnapshot, ScoredMatch, SnapshotRegistry, SnapshotStore,
};
pub use lock::{
    BuildLock, BuildLockManager, LockError, LockGuard, LockResult, LockStore, MemoryLockStore,
    SqliteLockStore,
};
#[cfg(any(test, feature = "mock"))]
pub use store::RecordingNotifier;
pub use store::{
    ChangeEvent, ChangeNotifier, ChangeOp, EntryId, EntryStore, EntryUpdate, NewEntry, NewTm,
    StoreError, StoreResult, TmEntry, TmId, TmStatus, TranslationMemory,
};
pub use suggest::{
    NotReady, NotReadyReason, StalePolicy, SuggestError, SuggestOutcome, SuggestResult,
    SuggestionService, SuggestionSet,
};
pub use sync::{AutoSyncCoordinator, SyncConfig, SyncHandle, SyncStats};
