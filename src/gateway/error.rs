use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::constants::TMSYNC_STATUS_HEADER;
use crate::engine::EngineError;
use crate::store::StoreError;
use crate::suggest::SuggestError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("index error: {0}")]
    IndexError(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TmNotFound { .. } | StoreError::EntryNotFound { .. } => {
                GatewayError::NotFound(err.to_string())
            }
            StoreError::InvalidInput { .. } | StoreError::InvalidTransition { .. } => {
                GatewayError::InvalidRequest(err.to_string())
            }
            other => GatewayError::StorageError(other.to_string()),
        }
    }
}

impl From<SuggestError> for GatewayError {
    fn from(err: SuggestError) -> Self {
        if err.is_validation() {
            return GatewayError::InvalidRequest(err.to_string());
        }
        match err {
            SuggestError::TmNotFound { tm_id } => {
                GatewayError::NotFound(format!("translation memory {tm_id} not found"))
            }
            SuggestError::Store(e) => e.into(),
            SuggestError::Embedding(e) => GatewayError::ProviderError(e.to_string()),
            SuggestError::Index(e) => GatewayError::IndexError(e.to_string()),
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(e) => e.into(),
            EngineError::RebuildNotQueued { .. } => GatewayError::Unavailable(err.to_string()),
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, tmsync_status) = match &self {
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::ProviderError(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            GatewayError::StorageError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
            GatewayError::IndexError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_error"),
            GatewayError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            GatewayError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(TMSYNC_STATUS_HEADER, HeaderValue::from_static(tmsync_status));

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, headers, body).into_response()
    }
}
