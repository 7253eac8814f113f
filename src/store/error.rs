use thiserror::Error;

use super::model::{EntryId, TmId, TmStatus};

#[derive(Debug, Error)]
/// Errors returned by the entry store.
pub enum StoreError {
    /// SQLite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Could not obtain a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// IO error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Translation memory does not exist.
    #[error("translation memory not found: {tm_id}")]
    TmNotFound {
        /// TM id.
        tm_id: TmId,
    },

    /// Entry does not exist.
    #[error("entry not found: {entry_id}")]
    EntryNotFound {
        /// Entry id.
        entry_id: EntryId,
    },

    /// Entry or TM fields failed validation.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Error message.
        reason: String,
    },

    /// Status change not permitted by the state machine.
    #[error("invalid status transition for tm {tm_id}: {from} -> {to}")]
    InvalidTransition {
        /// TM id.
        tm_id: TmId,
        /// Current status.
        from: TmStatus,
        /// Requested status.
        to: TmStatus,
    },
}

impl StoreError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors caused by a missing TM or entry.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::TmNotFound { .. } | StoreError::EntryNotFound { .. }
        )
    }
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
