use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::{Value, json};

use super::*;

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn test_hashing_embedder_is_normalised_and_deterministic() {
    let embedder = HashingEmbedder::new(384).unwrap();
    let a = embedder.embed_text("Save changes");
    let b = embedder.embed_text("save   CHANGES!");

    assert_eq!(a.len(), 384);
    assert_eq!(a, b);
    let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn test_hashing_embedder_zero_vector_without_words() {
    let embedder = HashingEmbedder::new(64).unwrap();
    assert!(embedder.embed_text("  ?! ").iter().all(|v| *v == 0.0));
}

#[test]
fn test_hashing_embedder_shared_words_score_higher() {
    let embedder = HashingEmbedder::new(384).unwrap();
    let query = embedder.embed_text("hi there");
    let hi = embedder.embed_text("hi");
    let hello = embedder.embed_text("hello");

    let hi_score = dot(&query, &hi);
    assert!(hi_score > 0.5, "hi score {hi_score}");
    assert!(hi_score > dot(&query, &hello));
}

#[test]
fn test_hashing_embedder_rejects_bad_config() {
    assert!(matches!(
        HashingEmbedder::new(0).unwrap_err(),
        EmbeddingError::InvalidConfig { .. }
    ));
    assert!(matches!(
        HashingEmbedder::with_name(" ", 8).unwrap_err(),
        EmbeddingError::InvalidConfig { .. }
    ));
}

#[tokio::test]
async fn test_embed_uses_provider_name_and_dimension() {
    let embedder = HashingEmbedder::with_name("feature-hash-test", 32).unwrap();
    assert_eq!(embedder.name(), "feature-hash-test");
    assert_eq!(embedder.embed("bonjour").await.unwrap().len(), 32);

    let batch = embedder
        .embed_batch(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn test_hashing_batch_leaves_runtime_free() {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    let embedder = HashingEmbedder::new(384).unwrap();
    let texts: Vec<String> = (0..5_000)
        .map(|i| format!("the quick brown fox number {i} jumps over the lazy dog"))
        .collect();

    let ticks = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let ticker = tokio::spawn({
        let ticks = Arc::clone(&ticks);
        let stop = Arc::clone(&stop);
        async move {
            while !stop.load(Ordering::Relaxed) {
                ticks.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }
    });

    let batch = embedder.embed_batch(&texts).await.unwrap();
    let ticks_during_batch = ticks.load(Ordering::Relaxed);
    stop.store(true, Ordering::Relaxed);
    ticker.await.unwrap();

    assert!(ticks_during_batch > 0);
    assert_eq!(batch.len(), texts.len());
    assert_eq!(batch[4_999], embedder.embed_text(&texts[4_999]));
}

#[tokio::test]
async fn test_cached_embedder_hits_on_repeat() {
    let mock = Arc::new(MockEmbedder::new(16));
    let cached = CachedEmbedder::new(mock.clone(), 100);

    let first = cached.embed("hello world").await.unwrap();
    let second = cached.embed("hello world").await.unwrap();
    cached.embed("other").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cached.stats(), (1, 2));
    assert_eq!(mock.batch_calls(), 2);
    assert_eq!(cached.name(), mock.name());
}

#[tokio::test]
async fn test_cached_embedder_does_not_cache_failures() {
    let mock = Arc::new(MockEmbedder::new(16));
    let cached = CachedEmbedder::new(mock.clone(), 100);

    mock.set_fail(true);
    assert!(cached.embed("hello").await.is_err());
    mock.set_fail(false);
    assert!(cached.embed("hello").await.is_ok());
    assert_eq!(cached.stats(), (0, 2));
}

#[tokio::test]
async fn test_mock_fail_on_batch() {
    let mock = MockEmbedder::new(8);
    let texts = vec!["x".to_string()];
    mock.embed_batch(&texts).await.unwrap();

    mock.fail_on_batch(2);
    assert!(mock.embed_batch(&texts).await.is_ok());
    assert!(mock.embed_batch(&texts).await.is_err());
    assert!(mock.embed_batch(&texts).await.is_ok());
    assert_eq!(mock.batch_calls(), 4);
    assert_eq!(mock.texts_embedded(), 3);
}

#[test]
fn test_validate_batch() {
    assert!(validate_batch(1, 2, &[vec![0.1, 0.2]]).is_ok());
    assert!(matches!(
        validate_batch(2, 2, &[vec![0.1, 0.2]]).unwrap_err(),
        EmbeddingError::CountMismatch {
            expected: 2,
            actual: 1
        }
    ));
    assert!(matches!(
        validate_batch(1, 3, &[vec![0.1, 0.2]]).unwrap_err(),
        EmbeddingError::DimensionMismatch { .. }
    ));
    assert!(validate_batch(1, 1, &[vec![f32::NAN]]).is_err());
}

#[test]
fn test_provider_from_parts() {
    let hashing = provider_from_parts(None, "hashing-v1", 12, Duration::from_secs(1)).unwrap();
    assert_eq!(hashing.name(), "hashing-v1");
    assert_eq!(hashing.dimension(), 12);

    let http = provider_from_parts(
        Some("http://127.0.0.1:1/embeddings"),
        "e5-small",
        384,
        Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(http.name(), "e5-small");

    assert!(provider_from_parts(Some("http://x"), "", 384, Duration::from_secs(1)).is_err());
}

async fn spawn_embedding_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/embeddings")
}

#[tokio::test]
async fn test_http_provider_orders_by_index() {
    let router = Router::new().route(
        "/embeddings",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["model"], "test-model");
            assert_eq!(body["input"].as_array().unwrap().len(), 2);
            Json(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            }))
        }),
    );
    let url = spawn_embedding_server(router).await;
    let provider = HttpEmbeddingProvider::new(url, "test-model", 2, Duration::from_secs(5)).unwrap();

    let vectors = provider
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_provider_surfaces_status() {
    let router = Router::new().route(
        "/embeddings",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
    );
    let url = spawn_embedding_server(router).await;
    let provider = HttpEmbeddingProvider::new(url, "m", 2, Duration::from_secs(5)).unwrap();

    let err = provider.embed("hello").await.unwrap_err();
    assert!(matches!(
        err,
        EmbeddingError::Provider { status: 503, ref body } if body == "model loading"
    ));
}

#[tokio::test]
async fn test_http_provider_rejects_wrong_dimension() {
    let router = Router::new().route(
        "/embeddings",
        post(|| async { Json(json!({ "data": [{ "embedding": [1.0, 0.0, 0.0] }] })) }),
    );
    let url = spawn_embedding_server(router).await;
    let provider = HttpEmbeddingProvider::new(url, "m", 2, Duration::from_secs(5)).unwrap();

    assert!(matches!(
        provider.embed("hello").await.unwrap_err(),
        EmbeddingError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    ));
}

#[tokio::test]
async fn test_http_provider_unreachable() {
    let provider = HttpEmbeddingProvider::new(
        "http://127.0.0.1:1/embeddings",
        "m",
        2,
        Duration::from_secs(2),
    )
    .unwrap();
    assert!(matches!(
        provider.embed("hello").await.unwrap_err(),
        EmbeddingError::Request { .. }
    ));
}
