use thiserror::Error;

use crate::constants::MAX_SUGGESTION_RESULTS;
use crate::embedding::EmbeddingError;
use crate::index::IndexError;
use crate::store::{StoreError, TmId};

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("threshold must be a number within [0, 1], got {value}")]
    InvalidThreshold { value: f32 },

    #[error("max_results must be within 1..={MAX_SUGGESTION_RESULTS}, got {value}")]
    InvalidMaxResults { value: i64 },

    #[error("source text must not be empty")]
    EmptySource,

    #[error("translation memory {tm_id} not found")]
    TmNotFound { tm_id: TmId },

    #[error("entry store error: {0}")]
    Store(StoreError),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

impl SuggestError {
    /// `true` for errors caused by the request rather than the engine.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SuggestError::InvalidThreshold { .. }
                | SuggestError::InvalidMaxResults { .. }
                | SuggestError::EmptySource
        )
    }
}

impl From<StoreError> for SuggestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TmNotFound { tm_id } => SuggestError::TmNotFound { tm_id },
            other => SuggestError::Store(other),
        }
    }
}

pub type SuggestResult<T> = Result<T, SuggestError>;
