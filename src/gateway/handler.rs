use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::constants::{
    TMSYNC_STATUS_HEADER, TMSYNC_STATUS_NOT_READY, TMSYNC_STATUS_READY, TMSYNC_STATUS_STALE,
};
use crate::gateway::error::GatewayError;
use crate::gateway::state::HandlerState;
use crate::index::ScoredMatch;
use crate::store::{
    EntryId, EntryUpdate, NewEntry, NewTm, TmEntry, TmId, TmStatus, TranslationMemory,
};
use crate::suggest::{NotReadyReason, SuggestOutcome};

pub const DEFAULT_SUGGEST_THRESHOLD: f32 = 0.5;
pub const DEFAULT_SUGGEST_MAX_RESULTS: i64 = 5;

/// Status view of one TM.
#[derive(Debug, Serialize)]
pub struct TmStatusResponse {
    pub id: TmId,
    pub name: String,
    pub source_lang: String,
    pub target_lang: String,
    pub status: TmStatus,
    pub entry_count: u64,
    pub index_version: u64,
    pub last_error: Option<String>,
    /// Committed changes are not yet covered by a build.
    pub dirty: bool,
    /// Version of the snapshot this worker serves, if any.
    pub snapshot_version: Option<u64>,
}

impl TmStatusResponse {
    fn new(tm: TranslationMemory, snapshot_version: Option<u64>) -> Self {
        let dirty = tm.is_dirty();
        Self {
            id: tm.id,
            name: tm.name,
            source_lang: tm.source_lang,
            target_lang: tm.target_lang,
            status: tm.status,
            entry_count: tm.entry_count,
            index_version: tm.index_version,
            last_error: tm.last_error,
            dirty,
            snapshot_version,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    pub source: String,
    pub threshold: Option<f32>,
    pub max_results: Option<i64>,
    pub tm_id: Option<TmId>,
}

/// `suggestions` and `count` are always present; the rest says which index
/// answered, or why none could.
#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<ScoredMatch>,
    pub count: usize,
    pub ready: bool,
    pub tm_id: Option<TmId>,
    pub status: Option<TmStatus>,
    pub index_version: Option<u64>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NotReadyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_error: Option<String>,
}

impl From<SuggestOutcome> for SuggestResponse {
    fn from(outcome: SuggestOutcome) -> Self {
        match outcome {
            SuggestOutcome::Ready(set) => Self {
                count: set.count(),
                suggestions: set.suggestions,
                ready: true,
                tm_id: Some(set.tm_id),
                status: Some(set.status),
                index_version: Some(set.index_version),
                stale: set.stale,
                reason: None,
                message: None,
                last_error: None,
            },
            SuggestOutcome::NotReady(not_ready) => Self {
                suggestions: Vec::new(),
                count: 0,
                ready: false,
                tm_id: not_ready.tm_id,
                status: not_ready.status,
                index_version: None,
                stale: false,
                reason: Some(not_ready.reason),
                message: Some(not_ready.reason.message().to_string()),
                last_error: not_ready.last_error,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkInsertRequest {
    pub entries: Vec<NewEntry>,
}

#[derive(Debug, Serialize)]
pub struct BulkInsertResponse {
    pub inserted: usize,
    pub ids: Vec<EntryId>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    body.map(|Json(value)| value)
        .map_err(|e| GatewayError::InvalidRequest(e.body_text()))
}

fn status_view(state: &HandlerState, tm: TranslationMemory) -> TmStatusResponse {
    let snapshot_version = state.engine.registry().version(tm.id);
    TmStatusResponse::new(tm, snapshot_version)
}

#[instrument(skip(state))]
pub async fn list_tms_handler(
    State(state): State<HandlerState>,
) -> Result<Json<Vec<TmStatusResponse>>, GatewayError> {
    let tms = state.engine.store().list_tms()?;
    Ok(Json(
        tms.into_iter().map(|tm| status_view(&state, tm)).collect(),
    ))
}

#[instrument(skip(state, body))]
pub async fn create_tm_handler(
    State(state): State<HandlerState>,
    body: Result<Json<NewTm>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let new = json_body(body)?;
    let tm = state.engine.create_tm(&new)?;
    Ok((StatusCode::CREATED, Json(status_view(&state, tm))).into_response())
}

#[instrument(skip(state))]
pub async fn get_tm_handler(
    State(state): State<HandlerState>,
    Path(tm_id): Path<TmId>,
) -> Result<Json<TmStatusResponse>, GatewayError> {
    let tm = state.engine.store().get_tm(tm_id)?;
    Ok(Json(status_view(&state, tm)))
}

#[instrument(skip(state))]
pub async fn delete_tm_handler(
    State(state): State<HandlerState>,
    Path(tm_id): Path<TmId>,
) -> Result<StatusCode, GatewayError> {
    state.engine.delete_tm(tm_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queues a rebuild and answers with the status as it is now.
#[instrument(skip(state))]
pub async fn rebuild_handler(
    State(state): State<HandlerState>,
    Path(tm_id): Path<TmId>,
) -> Result<Response, GatewayError> {
    let tm = state.engine.request_rebuild(tm_id)?;
    info!(tm_id, status = %tm.status, "Rebuild requested");
    Ok((StatusCode::ACCEPTED, Json(status_view(&state, tm))).into_response())
}

#[instrument(skip(state, params))]
pub async fn suggest_handler(
    State(state): State<HandlerState>,
    params: Result<Query<SuggestParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    let Query(params) = params.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let threshold = params.threshold.unwrap_or(DEFAULT_SUGGEST_THRESHOLD);
    let max_results = params.max_results.unwrap_or(DEFAULT_SUGGEST_MAX_RESULTS);

    let outcome = state
        .engine
        .suggest(params.tm_id, &params.source, threshold, max_results)
        .await?;
    let response = SuggestResponse::from(outcome);
    debug!(
        tm_id = ?response.tm_id,
        count = response.count,
        ready = response.ready,
        stale = response.stale,
        "Suggestion query answered"
    );

    let tmsync_status = match (response.ready, response.stale) {
        (false, _) => TMSYNC_STATUS_NOT_READY,
        (true, true) => TMSYNC_STATUS_STALE,
        (true, false) => TMSYNC_STATUS_READY,
    };
    let mut headers = HeaderMap::new();
    headers.insert(TMSYNC_STATUS_HEADER, HeaderValue::from_static(tmsync_status));

    Ok((StatusCode::OK, headers, Json(response)).into_response())
}

#[instrument(skip(state))]
pub async fn list_entries_handler(
    State(state): State<HandlerState>,
    Path(tm_id): Path<TmId>,
) -> Result<Json<Vec<TmEntry>>, GatewayError> {
    Ok(Json(state.engine.store().list(tm_id)?))
}

#[instrument(skip(state, body))]
pub async fn insert_entry_handler(
    State(state): State<HandlerState>,
    Path(tm_id): Path<TmId>,
    body: Result<Json<NewEntry>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let entry = json_body(body)?;
    let store = state.engine.store();
    let entry_id = store.insert(tm_id, &entry)?;
    let entry = store.get_entry(entry_id)?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

#[instrument(skip(state, body))]
pub async fn bulk_insert_handler(
    State(state): State<HandlerState>,
    Path(tm_id): Path<TmId>,
    body: Result<Json<BulkInsertRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let request = json_body(body)?;
    let ids = state.engine.store().insert_many(tm_id, &request.entries)?;
    info!(tm_id, inserted = ids.len(), "Bulk import committed");
    Ok((
        StatusCode::CREATED,
        Json(BulkInsertResponse {
            inserted: ids.len(),
            ids,
        }),
    )
        .into_response())
}

#[instrument(skip(state, body))]
pub async fn update_entry_handler(
    State(state): State<HandlerState>,
    Path(entry_id): Path<EntryId>,
    body: Result<Json<EntryUpdate>, JsonRejection>,
) -> Result<Json<TmEntry>, GatewayError> {
    let fields = json_body(body)?;
    Ok(Json(state.engine.store().update(entry_id, &fields)?))
}

#[instrument(skip(state))]
pub async fn delete_entry_handler(
    State(state): State<HandlerState>,
    Path(entry_id): Path<EntryId>,
) -> Result<StatusCode, GatewayError> {
    state.engine.store().delete(entry_id)?;
    Ok(StatusCode::NO_CONTENT)
}
