use async_trait::async_trait;

use super::error::{EmbeddingError, EmbeddingResult};

/// Maps text to fixed-dimension vectors.
///
/// The model identity is a property of the provider instance (`name()`), injected at
/// construction; the build path never looks it up anywhere else.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier. Part of query-cache keys and logged with every build.
    fn name(&self) -> &str;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    /// Embeds `texts`, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        let vector = vectors.swap_remove(0);
        check_dimension(self.dimension(), &vector)?;
        Ok(vector)
    }
}

pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> EmbeddingResult<()> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Verifies a provider answered `expected` vectors of `dimension` finite floats.
pub fn validate_batch(
    expected: usize,
    dimension: usize,
    vectors: &[Vec<f32>],
) -> EmbeddingResult<()> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    for vector in vectors {
        check_dimension(dimension, vector)?;
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidResponse {
                reason: "vector contains non-finite values".to_string(),
            });
        }
    }
    Ok(())
}
