//! HTTP gateway (Axum) over the engine.
//!
//! Mutations commit synchronously; suggestion queries never wait for a build.

pub mod error;
pub mod handler;
pub mod state;

#[cfg(test)]
mod handler_tests;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use tower_http::trace::TraceLayer;

pub use error::{ErrorResponse, GatewayError};
pub use handler::{
    bulk_insert_handler, create_tm_handler, delete_entry_handler, delete_tm_handler,
    get_tm_handler, insert_entry_handler, list_entries_handler, list_tms_handler,
    rebuild_handler, suggest_handler, update_entry_handler,
};
pub use state::HandlerState;

use crate::constants::{
    TMSYNC_STATUS_ERROR, TMSYNC_STATUS_HEADER, TMSYNC_STATUS_HEALTHY, TMSYNC_STATUS_READY,
};

pub fn create_router_with_state(state: HandlerState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/tm", get(list_tms_handler).post(create_tm_handler))
        .route("/tm/suggest", get(suggest_handler))
        .route("/tm/{id}", get(get_tm_handler).delete(delete_tm_handler))
        .route("/tm/{id}/rebuild", post(rebuild_handler))
        .route(
            "/tm/{id}/entries",
            get(list_entries_handler).post(insert_entry_handler),
        )
        .route("/tm/{id}/entries/bulk", post(bulk_insert_handler))
        .route(
            "/entries/{id}",
            patch(update_entry_handler).delete(delete_entry_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(serde::Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub components: ComponentStatus,
}

#[derive(serde::Serialize)]
pub struct ComponentStatus {
    pub http: &'static str,
    pub storage: &'static str,
    pub auto_sync: &'static str,
    pub embedder: String,
    pub snapshots: usize,
}

#[tracing::instrument]
pub async fn health_handler() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        TMSYNC_STATUS_HEADER,
        HeaderValue::from_static(TMSYNC_STATUS_HEALTHY),
    );

    (
        StatusCode::OK,
        headers,
        Json(HealthResponse { status: "ok" }),
    )
        .into_response()
}

#[tracing::instrument(skip(state))]
pub async fn ready_handler(State(state): State<HandlerState>) -> Response {
    let engine = &state.engine;
    let storage_status = if engine.store().ping().is_ok() {
        TMSYNC_STATUS_READY
    } else {
        TMSYNC_STATUS_ERROR
    };
    let sync_status = if engine.sync().is_running() {
        TMSYNC_STATUS_READY
    } else {
        "stopped"
    };

    let components = ComponentStatus {
        http: TMSYNC_STATUS_READY,
        storage: storage_status,
        auto_sync: sync_status,
        embedder: engine.provider().name().to_string(),
        snapshots: engine.registry().len(),
    };

    let is_ready =
        components.storage == TMSYNC_STATUS_READY && components.auto_sync == TMSYNC_STATUS_READY;
    let (status_code, status_msg) = if is_ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "pending")
    };

    let mut headers = HeaderMap::new();
    headers.insert(TMSYNC_STATUS_HEADER, HeaderValue::from_static(status_msg));

    (
        status_code,
        headers,
        Json(ReadyResponse {
            status: status_msg,
            components,
        }),
    )
        .into_response()
}
