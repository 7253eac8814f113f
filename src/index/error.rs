use std::path::PathBuf;

use thiserror::Error;

use crate::store::TmId;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("batch size mismatch: {expected} entries, {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },

    #[error("refusing to install version {attempted} for tm {tm_id}: version {current} is active")]
    StaleVersion {
        tm_id: TmId,
        current: u64,
        attempted: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(String),

    #[error("corrupt snapshot at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type IndexResult<T> = Result<T, IndexError>;
