use thiserror::Error;

use crate::config::ConfigError;
use crate::embedding::EmbeddingError;
use crate::index::IndexError;
use crate::store::{StoreError, TmId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("embedding provider setup failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("snapshot error: {0}")]
    Index(#[from] IndexError),

    #[error("failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),

    /// Auto-sync is stopped or its queue is full.
    #[error("rebuild of tm {tm_id} could not be queued; auto-sync is unavailable")]
    RebuildNotQueued { tm_id: TmId },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_not_found())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
