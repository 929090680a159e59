//! Batched, retrying access to the embedding provider.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mergewise_llm::{LlmError, LlmProvider};

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Maximum texts per provider call.
    pub batch_size: usize,
    /// Attempts per batch, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry; doubles with every further attempt.
    pub backoff: Duration,
    /// Deadline for a single provider call.
    pub timeout: Duration,
    /// Batches in flight at once.
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            concurrency: 2,
        }
    }
}

/// Result of embedding a list of texts. `vectors[i]` belongs to `texts[i]` and is
/// `None` when its batch was dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedOutcome {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub batches_ok: usize,
    pub batches_dropped: usize,
    /// Provider calls made, retries included.
    pub calls: usize,
}

impl EmbedOutcome {
    #[must_use]
    pub fn embedded(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

}

pub struct EmbeddingGateway<P> {
    provider: Arc<P>,
    config: EmbeddingConfig,
}

impl<P> std::fmt::Debug for EmbeddingGateway<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct BatchResult {
    result: Result<Vec<Vec<f32>>, LlmError>,
    calls: usize,
}

impl<P: LlmProvider> EmbeddingGateway<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.config.backoff.saturating_mul(1u32 << attempt.min(16))
    }

    async fn embed_with_retry(&self, batch: &[String]) -> BatchResult {
        let attempts = self.config.max_attempts.max(1);
        let mut calls = 0;
        let mut attempt = 0;
        loop {
            calls += 1;
            let result =
                match tokio::time::timeout(self.config.timeout, self.provider.embed_batch(batch))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout),
                };
            match result {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "embedding batch failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return BatchResult { result, calls },
            }
        }
    }

    /// Embed `texts` in batches of at most `batch_size`, up to `concurrency` batches at
    /// a time. Every vector must have `expected_dimension` components, or the dimension
    /// of the first accepted batch when none is given.
    ///
    /// Failed batches are dropped and logged; this never returns an error.
    pub async fn embed_all(
        &self,
        texts: &[String],
        expected_dimension: Option<usize>,
    ) -> EmbedOutcome {
        let mut outcome = EmbedOutcome {
            vectors: vec![None; texts.len()],
            ..EmbedOutcome::default()
        };
        if texts.is_empty() {
            return outcome;
        }
        if !self.provider.supports_embeddings() {
            tracing::warn!(
                provider = self.provider.name(),
                texts = texts.len(),
                "provider cannot embed, chunks stay unembedded"
            );
            outcome.batches_dropped = texts.len().div_ceil(self.config.batch_size.max(1));
            return outcome;
        }

        let batch_size = self.config.batch_size.max(1);
        // Built eagerly so the stream holds plain futures rather than a borrowing
        // closure, which keeps the caller's future `Send`.
        let batches: Vec<_> = texts
            .chunks(batch_size)
            .map(|batch| self.embed_with_retry(batch))
            .collect();
        let results: Vec<BatchResult> = futures::stream::iter(batches)
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut dimension = expected_dimension;
        for (i, batch) in results.into_iter().enumerate() {
            outcome.calls += batch.calls;
            let offset = i * batch_size;
            let expected_len = texts[offset..].len().min(batch_size);
            match check_batch(batch.result, expected_len, dimension) {
                Ok(vectors) => {
                    dimension = dimension.or_else(|| vectors.first().map(Vec::len));
                    for (slot, v) in outcome.vectors[offset..].iter_mut().zip(vectors) {
                        *slot = Some(v);
                    }
                    outcome.batches_ok += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        batch = i,
                        texts = expected_len,
                        attempts = batch.calls,
                        "dropping embedding batch: {e}"
                    );
                    outcome.batches_dropped += 1;
                }
            }
        }
        outcome
    }

    /// Embed query texts, keeping only the ones that succeeded. `None` when nothing
    /// could be embedded.
    pub async fn embed_queries(
        &self,
        texts: &[String],
        expected_dimension: Option<usize>,
    ) -> Option<Vec<Vec<f32>>> {
        let outcome = self.embed_all(texts, expected_dimension).await;
        let vectors: Vec<_> = outcome.vectors.into_iter().flatten().collect();
        (!vectors.is_empty()).then_some(vectors)
    }
}

fn check_batch(
    result: Result<Vec<Vec<f32>>, LlmError>,
    expected_len: usize,
    dimension: Option<usize>,
) -> Result<Vec<Vec<f32>>, LlmError> {
    let vectors = result?;
    if vectors.len() != expected_len {
        return Err(LlmError::BatchSizeMismatch {
            expected: expected_len,
            actual: vectors.len(),
        });
    }
    let want = dimension.or_else(|| vectors.first().map(Vec::len));
    if let Some(want) = want
        && let Some(bad) = vectors.iter().find(|v| v.len() != want)
    {
        return Err(LlmError::DimensionMismatch {
            expected: want,
            actual: bad.len(),
        });
    }
    if vectors.iter().any(|v| v.is_empty()) {
        return Err(LlmError::DimensionMismatch {
            expected: want.unwrap_or(0),
            actual: 0,
        });
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use mergewise_llm::mock::{EmbedFailure, MockProvider};

    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {i}")).collect()
    }

    fn gateway(mock: &MockProvider, batch_size: usize) -> EmbeddingGateway<MockProvider> {
        EmbeddingGateway::new(
            Arc::new(mock.clone()),
            EmbeddingConfig {
                batch_size,
                backoff: Duration::from_millis(10),
                ..EmbeddingConfig::default()
            },
        )
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn embed_all_future_is_send() {
        let gw = gateway(&MockProvider::default(), 2);
        let input = texts(5);
        let fut = gw.embed_all(&input, None);
        assert_send(&fut);
        let queries = gw.embed_queries(&input, Some(64));
        assert_send(&queries);
    }

    #[tokio::test]
    async fn batches_preserve_input_order() {
        let mock = MockProvider::default();
        let gw = gateway(&mock, 3);
        let input = texts(7);
        let outcome = gw.embed_all(&input, None).await;
        assert_eq!(outcome.batches_ok, 3);
        assert_eq!(outcome.calls, 3);
        assert_eq!(mock.embed_calls(), 3);
        assert_eq!(mock.embedded_texts(), 7);
        for (text, v) in input.iter().zip(&outcome.vectors) {
            assert_eq!(
                v.as_deref().unwrap(),
                mergewise_llm::mock::bag_of_words(text, 64).as_slice()
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let mock = MockProvider::default().with_transient_failures(2);
        let gw = gateway(&mock, 10);
        let outcome = gw.embed_all(&texts(4), None).await;
        assert_eq!(outcome.batches_ok, 1);
        assert_eq!(outcome.calls, 3);
        assert_eq!(outcome.embedded(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_failure_drops_batch_after_max_attempts() {
        let mock = MockProvider::default().with_embed_failure(EmbedFailure::Transient);
        let gw = gateway(&mock, 2);
        let outcome = gw.embed_all(&texts(3), None).await;
        assert_eq!(outcome.batches_dropped, 2);
        assert_eq!(outcome.calls, 6);
        assert!(outcome.vectors.iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let mock = MockProvider::default().with_embed_failure(EmbedFailure::Malformed);
        let gw = gateway(&mock, 5);
        let outcome = gw.embed_all(&texts(5), None).await;
        assert_eq!(outcome.batches_dropped, 1);
        assert_eq!(outcome.calls, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_drops_batch() {
        let mock = MockProvider::default().with_dimension(8);
        let gw = gateway(&mock, 5);
        let outcome = gw.embed_all(&texts(2), Some(16)).await;
        assert_eq!(outcome.batches_dropped, 1);
        assert_eq!(outcome.embedded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let mock = MockProvider::default().with_embed_delay(60_000);
        let gw = EmbeddingGateway::new(
            Arc::new(mock.clone()),
            EmbeddingConfig {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
                timeout: Duration::from_secs(1),
                ..EmbeddingConfig::default()
            },
        );
        let outcome = gw.embed_all(&texts(1), None).await;
        assert_eq!(outcome.batches_dropped, 1);
        assert_eq!(outcome.calls, 2);
    }

    #[tokio::test]
    async fn unsupported_provider_makes_no_calls() {
        let mut mock = MockProvider::default();
        mock.supports_embeddings = false;
        let gw = gateway(&mock, 4);
        let outcome = gw.embed_all(&texts(5), None).await;
        assert_eq!(outcome.batches_dropped, 2);
        assert_eq!(mock.embed_calls(), 0);
        assert!(gw.embed_queries(&texts(1), None).await.is_none());
    }

    #[test]
    fn backoff_doubles() {
        let gw = gateway(&MockProvider::default(), 1);
        assert_eq!(gw.delay(0), Duration::from_millis(10));
        assert_eq!(gw.delay(2), Duration::from_millis(40));
    }
}
