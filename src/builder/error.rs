use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::index::IndexError;
use crate::lock::LockError;
use crate::store::{StoreError, TmId};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("entry store error: {0}")]
    Store(#[from] StoreError),

    #[error("build lock error: {0}")]
    Lock(#[from] LockError),

    #[error("embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("blocking build task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("build lock for tm {tm_id} was reclaimed before the build finished")]
    LockLost { tm_id: TmId },
}

impl BuildError {
    /// `true` if the TM no longer exists.
    pub fn is_tm_missing(&self) -> bool {
        matches!(
            self,
            BuildError::Store(StoreError::TmNotFound { .. })
                | BuildError::Lock(LockError::TmNotFound { .. })
        )
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
