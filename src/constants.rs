//! Cross-cutting, shared constants.
//!
//! Runtime configuration ([`crate::config::Config`]) starts from these values; modules that
//! need a default without a `Config` in hand (tests, builders) read them directly.

/// Default embedding dimension for the built-in hashing provider.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Default model identifier reported by the built-in hashing provider.
pub const DEFAULT_EMBEDDER_MODEL: &str = "hashing-v1";

/// Number of entries sent to the embedding provider per call.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Upper bound on [`DEFAULT_BATCH_SIZE`] overrides.
pub const MAX_BATCH_SIZE: usize = 1024;

/// Quiet period after the last mutation before a TM is re-indexed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 3_000;

/// Age after which a build lock is considered abandoned.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 10 * 60;

/// Interval of the reconciliation sweep (stale locks + dirty TMs).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// First retry delay after a contended or failed build.
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Ceiling of the retry backoff.
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

/// Automatic retries of a failing build before waiting for the next trigger.
pub const DEFAULT_MAX_BUILD_RETRIES: u32 = 5;

/// Capacity of the change-notification channel feeding the coordinator.
pub const DEFAULT_CHANGE_CHANNEL_CAPACITY: usize = 4096;

/// Largest `max_results` accepted by the suggestion service.
pub const MAX_SUGGESTION_RESULTS: usize = 100;

/// Entries held by the query-embedding cache.
pub const DEFAULT_QUERY_CACHE_CAPACITY: u64 = 10_000;

/// Timeout for a single call to a remote embedding provider.
pub const DEFAULT_EMBEDDER_TIMEOUT_SECS: u64 = 60;

/// SQLite database filename inside the data directory.
pub const DB_FILENAME: &str = "tmsync.db";

/// Directory (inside the data directory) holding persisted index snapshots.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Response header carrying the engine's status for a request.
pub const TMSYNC_STATUS_HEADER: &str = "x-tmsync-status";
pub const TMSYNC_STATUS_HEALTHY: &str = "healthy";
pub const TMSYNC_STATUS_READY: &str = "ready";
pub const TMSYNC_STATUS_NOT_READY: &str = "not_ready";
pub const TMSYNC_STATUS_ERROR: &str = "error";
pub const TMSYNC_STATUS_STALE: &str = "stale";
