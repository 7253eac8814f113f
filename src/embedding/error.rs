use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("invalid embedding provider configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("embedding request failed: {reason}")]
    Request { reason: String },

    #[error("embedding provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed embedding response: {reason}")]
    InvalidResponse { reason: String },

    #[error("embedding worker failed: {reason}")]
    Worker { reason: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding count mismatch: sent {expected} texts, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Request {
            reason: err.to_string(),
        }
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;
