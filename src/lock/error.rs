use thiserror::Error;

use crate::store::TmId;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("cannot lock unknown translation memory {tm_id}")]
    TmNotFound { tm_id: TmId },
}

pub type LockResult<T> = Result<T, LockError>;
