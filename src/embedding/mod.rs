//! Embedding providers.
//!
//! - [`HashingEmbedder`]: deterministic, in-process (default).
//! - [`HttpEmbeddingProvider`]: external inference endpoint.
//! - [`CachedEmbedder`]: query-embedding cache in front of either.

mod cached;
pub mod error;
mod feature_hash;
mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod provider;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

pub use cached::CachedEmbedder;
pub use error::{EmbeddingError, EmbeddingResult};
pub use feature_hash::HashingEmbedder;
pub use http::HttpEmbeddingProvider;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbedder;
pub use provider::{EmbeddingProvider, validate_batch};

/// Builds the configured provider: HTTP when `url` is set, otherwise hashing.
pub fn provider_from_parts(
    url: Option<&str>,
    model: &str,
    dimension: usize,
    timeout: Duration,
) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
    Ok(match url {
        Some(url) => Arc::new(HttpEmbeddingProvider::new(url, model, dimension, timeout)?),
        None => Arc::new(HashingEmbedder::with_name(model, dimension)?),
    })
}
