//! Test-only mock LLM provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

/// How mock embedding calls fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedFailure {
    /// Every call is rate limited.
    Transient,
    /// Every batch comes back one vector short.
    Malformed,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    /// Fixed vector returned for every text. `None` hashes words into `dimension` buckets.
    pub embedding: Option<Vec<f32>>,
    pub dimension: usize,
    pub supports_embeddings: bool,
    pub fail_chat: bool,
    pub embed_failure: Option<EmbedFailure>,
    /// Milliseconds to sleep before returning a chat response.
    pub delay_ms: u64,
    /// Milliseconds to sleep before returning embeddings.
    pub embed_delay_ms: u64,
    transient_budget: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
    embedded_texts: Arc<AtomicUsize>,
    chat_calls: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            embedding: None,
            dimension: 64,
            supports_embeddings: true,
            fail_chat: false,
            embed_failure: None,
            delay_ms: 0,
            embed_delay_ms: 0,
            transient_budget: Arc::new(AtomicUsize::new(0)),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            embedded_texts: Arc::new(AtomicUsize::new(0)),
            chat_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_embed_delay(mut self, ms: u64) -> Self {
        self.embed_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_embed_failure(mut self, failure: EmbedFailure) -> Self {
        self.embed_failure = Some(failure);
        self
    }

    /// Rate-limit the next `n` embedding calls, then succeed.
    #[must_use]
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_budget.store(n, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_fixed_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.dimension = embedding.len();
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Number of embedding requests received, successful or not.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Number of texts received across all embedding requests.
    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.embed_calls.store(0, Ordering::SeqCst);
        self.embedded_texts.store(0, Ordering::SeqCst);
        self.chat_calls.store(0, Ordering::SeqCst);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(fixed) = &self.embedding {
            return fixed.clone();
        }
        bag_of_words(text, self.dimension.max(1))
    }

    fn take_transient(&self) -> bool {
        self.transient_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        if self.embed_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.embed_delay_ms)).await;
        }
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported { provider: "mock" });
        }
        if self.take_transient() {
            return Err(LlmError::RateLimited);
        }
        match self.embed_failure {
            Some(EmbedFailure::Transient) => Err(LlmError::RateLimited),
            Some(EmbedFailure::Malformed) => Err(LlmError::BatchSizeMismatch {
                expected: texts.len(),
                actual: texts.len().saturating_sub(1),
            }),
            None => Ok(texts.iter().map(|t| self.vector_for(t)).collect()),
        }
    }
}

/// Deterministic L2-normalized bag-of-words vector over lowercase alphanumeric tokens.
///
/// Texts sharing identifiers land close together, which is enough for ranking tests.
#[must_use]
pub fn bag_of_words(text: &str, dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension];
    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
    {
        let lower = token.to_lowercase();
        let bucket = fnv1a(lower.as_bytes()) % dimension as u64;
        let idx = usize::try_from(bucket).unwrap_or(0);
        v[idx] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl LlmProvider for MockProvider {
    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut r| (!r.is_empty()).then(|| r.remove(0)));
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self.embed_texts(&[text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or(LlmError::EmptyResponse { provider: "mock" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embed_texts(texts).await
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
