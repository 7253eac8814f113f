use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    response::IntoResponse,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::time::Instant;
use tower::ServiceExt;

use crate::config::Config;
use crate::constants::TMSYNC_STATUS_HEADER;
use crate::engine::{Engine, EngineError};
use crate::gateway::create_router_with_state;
use crate::gateway::error::GatewayError;
use crate::gateway::state::HandlerState;
use crate::store::{StoreError, TmId, TmStatus};
use crate::suggest::SuggestError;

struct TestApp {
    _dir: TempDir,
    state: HandlerState,
    router: Router,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        debounce: Duration::from_millis(30),
        sweep_interval: Duration::from_millis(200),
        retry_base: Duration::from_millis(20),
        retry_max: Duration::from_millis(200),
        worker_id: Some("gateway-test".to_string()),
        ..Config::default()
    };
    let engine = Arc::new(Engine::start(config).await.unwrap());
    let state = HandlerState::new(engine);
    let router = create_router_with_state(state.clone());
    TestApp {
        _dir: dir,
        state,
        router,
    }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        TestResponse::read(response).await
    }

    async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None).await
    }

    async fn create_tm(&self, name: &str) -> TmId {
        let response = self
            .send(
                Method::POST,
                "/tm",
                Some(json!({"name": name, "source_lang": "en", "target_lang": "fr"})),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        response.body["id"].as_i64().unwrap()
    }

    async fn wait_until_synced(&self, tm_id: TmId) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let tm = self.state.engine.store().get_tm(tm_id).unwrap();
            if tm.status == TmStatus::Ready && !tm.is_dirty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestResponse {
    async fn read(response: axum::response::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Self {
            status,
            headers,
            body,
        }
    }

    fn tmsync_status(&self) -> &str {
        self.headers
            .get(TMSYNC_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

#[tokio::test]
async fn test_healthz_reports_ok() {
    let app = test_app().await;

    let response = app.get("/healthz").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.tmsync_status(), "healthy");
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_ready_follows_auto_sync() {
    let app = test_app().await;

    let response = app.get("/ready").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["components"]["storage"], "ready");
    assert_eq!(response.body["components"]["embedder"], "hashing-v1");

    app.state.engine.shutdown().await;

    let response = app.get("/ready").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["components"]["auto_sync"], "stopped");
    assert_eq!(response.tmsync_status(), "pending");
}

#[tokio::test]
async fn test_tm_lifecycle_routes() {
    let app = test_app().await;
    let tm_id = app.create_tm("ui-strings").await;

    let listed = app.get("/tm").await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    assert!(app.wait_until_synced(tm_id).await);
    let status = app.get(&format!("/tm/{tm_id}")).await;
    assert_eq!(status.status, StatusCode::OK);
    assert_eq!(status.body["status"], "ready");
    assert_eq!(status.body["entry_count"], 0);
    assert!(status.body["last_error"].is_null());
    assert!(status.body["index_version"].as_u64().unwrap() >= 1);

    let deleted = app.send(Method::DELETE, &format!("/tm/{tm_id}"), None).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let missing = app.get(&format!("/tm/{tm_id}")).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_tm_is_404_with_error_body() {
    let app = test_app().await;

    let response = app.get("/tm/999").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.tmsync_status(), "not_found");
    assert_eq!(response.body["code"], 404);
    assert!(response.body["error"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn test_create_tm_rejects_bad_input() {
    let app = test_app().await;

    let blank = app
        .send(
            Method::POST,
            "/tm",
            Some(json!({"name": " ", "source_lang": "en", "target_lang": "fr"})),
        )
        .await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);
    assert_eq!(blank.tmsync_status(), "invalid_request");

    let malformed = app
        .send(Method::POST, "/tm", Some(json!({"name": "missing langs"})))
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(malformed.body["code"], 400);
}

#[tokio::test]
async fn test_suggest_rejects_invalid_parameters() {
    let app = test_app().await;

    for uri in [
        "/tm/suggest?source=hello&threshold=1.5",
        "/tm/suggest?source=hello&threshold=-0.1",
        "/tm/suggest?source=hello&max_results=0",
        "/tm/suggest?source=hello&max_results=-2",
        "/tm/suggest?source=hello&threshold=abc",
        "/tm/suggest?threshold=0.5",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(response.body["code"], 400, "{uri}");
    }
}

#[tokio::test]
async fn test_suggest_after_bulk_import() {
    let app = test_app().await;
    let tm_id = app.create_tm("greetings").await;

    let imported = app
        .send(
            Method::POST,
            &format!("/tm/{tm_id}/entries/bulk"),
            Some(json!({"entries": [
                {"source": "hello", "target": "bonjour"},
                {"source": "goodbye", "target": "au revoir"},
                {"source": "hi", "target": "salut"}
            ]})),
        )
        .await;
    assert_eq!(imported.status, StatusCode::CREATED);
    assert_eq!(imported.body["inserted"], 3);
    assert!(app.wait_until_synced(tm_id).await);

    let response = app
        .get(&format!(
            "/tm/suggest?source=hi%20there&threshold=0.3&max_results=2&tm_id={tm_id}"
        ))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.tmsync_status(), "ready");
    let count = response.body["count"].as_u64().unwrap();
    assert!((1..=2).contains(&count));
    assert_eq!(response.body["suggestions"][0]["target"], "salut");
    assert_eq!(response.body["ready"], true);
    assert_eq!(response.body["stale"], false);
}

#[tokio::test]
async fn test_suggest_on_unindexed_tm_is_not_ready() {
    let app = test_app().await;
    app.state.engine.shutdown().await;
    let tm_id = app.create_tm("never-built").await;

    let response = app
        .get(&format!("/tm/suggest?source=hello&tm_id={tm_id}"))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.tmsync_status(), "not_ready");
    assert_eq!(response.body["ready"], false);
    assert_eq!(response.body["reason"], "pending");
    assert_eq!(response.body["count"], 0);
    assert_eq!(response.body["suggestions"], json!([]));
}

#[tokio::test]
async fn test_suggest_without_any_ready_tm() {
    let app = test_app().await;

    let response = app.get("/tm/suggest?source=hello").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["reason"], "no_ready_tm");
    assert!(response.body["tm_id"].is_null());
}

#[tokio::test]
async fn test_rebuild_returns_current_status() {
    let app = test_app().await;
    let tm_id = app.create_tm("rebuild-me").await;
    assert!(app.wait_until_synced(tm_id).await);
    let version = app.state.engine.store().get_tm(tm_id).unwrap().index_version;

    let response = app
        .send(Method::POST, &format!("/tm/{tm_id}/rebuild"), None)
        .await;

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["index_version"], version);

    let deadline = Instant::now() + Duration::from_secs(5);
    while app.state.engine.registry().version(tm_id) != Some(version + 1) {
        assert!(Instant::now() < deadline, "rebuild never landed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let missing = app.send(Method::POST, "/tm/999/rebuild", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rebuild_after_auto_sync_stopped_is_unavailable() {
    let app = test_app().await;
    let tm_id = app.create_tm("stopped").await;
    assert!(app.wait_until_synced(tm_id).await);
    app.state.engine.shutdown().await;

    let response = app
        .send(Method::POST, &format!("/tm/{tm_id}/rebuild"), None)
        .await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.tmsync_status(), "unavailable");
    assert!(
        response.body["error"]
            .as_str()
            .unwrap()
            .contains("could not be queued")
    );
}

#[tokio::test]
async fn test_entry_routes() {
    let app = test_app().await;
    let tm_id = app.create_tm("entries").await;

    let created = app
        .send(
            Method::POST,
            &format!("/tm/{tm_id}/entries"),
            Some(json!({"source": "save", "target": "enregistrer", "string_id": "btn.save"})),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let entry_id = created.body["id"].as_i64().unwrap();
    assert_eq!(created.body["string_id"], "btn.save");

    let updated = app
        .send(
            Method::PATCH,
            &format!("/entries/{entry_id}"),
            Some(json!({"target": "sauvegarder", "confirmed": true})),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["target"], "sauvegarder");
    assert_eq!(updated.body["confirmed"], true);

    let listed = app.get(&format!("/tm/{tm_id}/entries")).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    let empty_source = app
        .send(
            Method::POST,
            &format!("/tm/{tm_id}/entries"),
            Some(json!({"source": "", "target": "x"})),
        )
        .await;
    assert_eq!(empty_source.status, StatusCode::BAD_REQUEST);

    let deleted = app
        .send(Method::DELETE, &format!("/entries/{entry_id}"), None)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let gone = app
        .send(
            Method::PATCH,
            &format!("/entries/{entry_id}"),
            Some(json!({"target": "x"})),
        )
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    let unknown_tm = app
        .send(
            Method::POST,
            "/tm/999/entries",
            Some(json!({"source": "a", "target": "b"})),
        )
        .await;
    assert_eq!(unknown_tm.status, StatusCode::NOT_FOUND);
}

#[test]
fn test_error_status_mapping() {
    let cases = [
        (
            GatewayError::from(StoreError::TmNotFound { tm_id: 7 }),
            StatusCode::NOT_FOUND,
        ),
        (
            GatewayError::from(SuggestError::InvalidThreshold { value: 2.0 }),
            StatusCode::BAD_REQUEST,
        ),
        (
            GatewayError::from(SuggestError::TmNotFound { tm_id: 7 }),
            StatusCode::NOT_FOUND,
        ),
        (
            GatewayError::from(SuggestError::Embedding(
                crate::embedding::EmbeddingError::Request {
                    reason: "connection refused".to_string(),
                },
            )),
            StatusCode::BAD_GATEWAY,
        ),
        (
            GatewayError::from(EngineError::RebuildNotQueued { tm_id: 7 }),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        (
            GatewayError::from(EngineError::Store(StoreError::TmNotFound { tm_id: 7 })),
            StatusCode::NOT_FOUND,
        ),
        (
            GatewayError::InternalError("boom".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, expected) in cases {
        let response = error.into_response();
        assert_eq!(response.status(), expected);
        assert!(response.headers().contains_key(TMSYNC_STATUS_HEADER));
    }
}
