//! Scriptable embedder for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::{EmbeddingError, EmbeddingResult};
use super::feature_hash::HashingEmbedder;
use super::provider::EmbeddingProvider;

/// Wraps [`HashingEmbedder`] with failure injection, latency and call accounting.
#[derive(Debug)]
pub struct MockEmbedder {
    inner: HashingEmbedder,
    fail: AtomicBool,
    fail_on_batch: AtomicUsize,
    delay: Mutex<Duration>,
    batch_calls: AtomicUsize,
    texts_embedded: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingEmbedder::with_name("mock-embedder", dimension)
                .expect("mock dimension must be positive"),
            fail: AtomicBool::new(false),
            fail_on_batch: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            batch_calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Every call fails while set.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Fails the `n`-th batch call (1-based) counted from now; 0 disables.
    pub fn fail_on_batch(&self, n: usize) {
        let base = self.batch_calls.load(Ordering::Acquire);
        let target = if n == 0 { 0 } else { base + n };
        self.fail_on_batch.store(target, Ordering::Release);
    }

    /// Sleeps this long inside every batch call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::Acquire)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::Acquire)
    }

    /// Highest number of concurrently running batch calls observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::Acquire)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let call = self.batch_calls.fetch_add(1, Ordering::AcqRel) + 1;
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(active, Ordering::AcqRel);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::Acquire) || self.fail_on_batch.load(Ordering::Acquire) == call
        {
            return Err(EmbeddingError::Request {
                reason: "mock embedder failure".to_string(),
            });
        }

        self.texts_embedded.fetch_add(texts.len(), Ordering::AcqRel);
        self.inner.embed_batch(texts).await
    }
}
