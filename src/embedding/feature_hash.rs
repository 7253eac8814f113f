//! Deterministic feature-hashing embedder.
//!
//! Needs no model files or network, so it is the default provider and the one the
//! test suite relies on. Each lowercase word contributes a whole-word feature plus
//! the character trigrams of `^word$`; features are hashed into `dimension` buckets
//! and the vector is L2-normalised.

use async_trait::async_trait;

use super::error::{EmbeddingError, EmbeddingResult};
use super::provider::EmbeddingProvider;
use crate::constants::DEFAULT_EMBEDDER_MODEL;
use crate::hashing::feature_bucket;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    name: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> EmbeddingResult<Self> {
        Self::with_name(DEFAULT_EMBEDDER_MODEL, dimension)
    }

    pub fn with_name(name: impl Into<String>, dimension: usize) -> EmbeddingResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig {
                reason: "model name must not be empty".to_string(),
            });
        }
        if dimension == 0 {
            return Err(EmbeddingError::InvalidConfig {
                reason: "embedding dimension must be positive".to_string(),
            });
        }
        Ok(Self { name, dimension })
    }

    /// Embeds one text synchronously. Text without word characters maps to the zero
    /// vector, which scores 0 against everything.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[feature_bucket(&format!("w:{word}"), self.dimension)] += 1.0;

            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                vector[feature_bucket(&format!("t:{trigram}"), self.dimension)] += 1.0;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Hashing is CPU-bound, so batches run on the blocking pool.
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let embedder = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| embedder.embed_text(t))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| EmbeddingError::Worker {
            reason: e.to_string(),
        })
    }
}
