//! HTTP embedding provider speaking the common `/embeddings` JSON shape:
//! request `{ "model", "input": [..] }`, response `{ "data": [{ "embedding", "index" }] }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::{EmbeddingError, EmbeddingResult};
use super::provider::{EmbeddingProvider, validate_batch};

const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    http: HttpClient,
    url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    /// Fails on an empty URL, empty model identifier or zero dimension.
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> EmbeddingResult<Self> {
        let url = url.into();
        let model = model.into();
        if url.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig {
                reason: "embedder URL must not be empty".to_string(),
            });
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig {
                reason: "model identifier must not be empty".to_string(),
            });
        }
        if dimension == 0 {
            return Err(EmbeddingError::InvalidConfig {
                reason: "embedding dimension must be positive".to_string(),
            });
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            url,
            model,
            dimension,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    #[instrument(skip(self, texts), fields(model = %self.model, count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .http
            .post(&self.url)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse =
            resp.json().await.map_err(|e| EmbeddingError::InvalidResponse {
                reason: e.to_string(),
            })?;
        if parsed.data.iter().all(|d| d.index.is_some()) {
            parsed.data.sort_by_key(|d| d.index);
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        validate_batch(texts.len(), self.dimension, &vectors)?;
        debug!(vectors = vectors.len(), "Embedding batch received");
        Ok(vectors)
    }
}
