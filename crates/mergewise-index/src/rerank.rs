//! Second-stage relevance ordering of retrieved candidates.
//!
//! A reranker may only reorder: the output is always a permutation of the input.
//! The context store falls back to vector order when a reranker fails, times out or
//! returns anything else.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use mergewise_llm::{LlmError, LlmProvider, Message};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::ScoredChunk;

const RERANKER_SYSTEM_PROMPT: &str = "You are an expert context selection assistant helping with AI code reviews.
Rank the provided repository context chunks by how useful they are for understanding or reviewing the given PR diff.
Always return strict JSON with a `ranking` array sorted in descending usefulness.
Each element must include { id: string, score: integer 1-5 }. Limit the list to the chunks you would keep.";

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("reranker LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("reranker timed out")]
    Timeout,

    #[error("reranker returned an unusable result: {0}")]
    Invalid(String),
}

/// What the candidates are being ranked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerankQuery {
    pub file_path: String,
    pub query_texts: Vec<String>,
    /// Results the caller will keep after reranking.
    pub k: usize,
}

pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reorder `candidates` by relevance to `query`.
    ///
    /// # Errors
    ///
    /// Returns a `RerankError` when no ordering could be produced; the caller keeps the
    /// input order.
    fn rerank(
        &self,
        query: &RerankQuery,
        candidates: Vec<ScoredChunk>,
    ) -> impl Future<Output = Result<Vec<ScoredChunk>, RerankError>> + Send;
}

/// Same multiset of document ids on both sides.
#[must_use]
pub fn is_permutation(before: &[ScoredChunk], after: &[ScoredChunk]) -> bool {
    if before.len() != after.len() {
        return false;
    }
    let mut a: Vec<&str> = before.iter().map(ScoredChunk::document_id).collect();
    let mut b: Vec<&str> = after.iter().map(ScoredChunk::document_id).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

// Strict structured output needs every field required and no extra properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RankedItem {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Ranking {
    pub ranking: Vec<RankedItem>,
}

#[derive(Serialize)]
struct CandidatePayload<'a> {
    id: String,
    path: &'a str,
    start_line: usize,
    end_line: usize,
    label: Option<&'a str>,
    snippet: String,
}

#[derive(Serialize)]
struct RerankPayload<'a> {
    query: String,
    top_k: usize,
    candidates: Vec<CandidatePayload<'a>>,
}

fn candidate_id(i: usize) -> String {
    format!("c{i}")
}

fn candidate_index(id: &str, len: usize) -> Option<usize> {
    id.trim()
        .strip_prefix('c')?
        .parse::<usize>()
        .ok()
        .filter(|i| *i < len)
}

/// Order candidates by the model's ranking.
///
/// Ranked candidates come first by descending score (the first mention of an id wins,
/// unknown ids are ignored), followed by unranked candidates in their prior order.
#[must_use]
pub fn apply_ranking(candidates: Vec<ScoredChunk>, ranking: &Ranking) -> Vec<ScoredChunk> {
    let n = candidates.len();
    let mut seen = vec![false; n];
    let mut ranked: Vec<(usize, f32)> = Vec::new();
    for item in &ranking.ranking {
        let Some(idx) = candidate_index(&item.id, n) else {
            continue;
        };
        if std::mem::replace(&mut seen[idx], true) {
            continue;
        }
        let score = if item.score.is_finite() { item.score } else { 0.0 };
        ranked.push((idx, score));
    }
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut slots: Vec<Option<ScoredChunk>> = candidates.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(n);
    for (idx, score) in ranked {
        if let Some(mut c) = slots[idx].take() {
            c.rerank_score = Some(score);
            out.push(c);
        }
    }
    out.extend(slots.into_iter().flatten());
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_owned(),
        None => s.to_owned(),
    }
}

/// Asks the chat model to rank candidates, using structured output.
pub struct LlmReranker<P> {
    provider: Arc<P>,
    max_chars: usize,
}

impl<P> std::fmt::Debug for LlmReranker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmReranker")
            .field("max_chars", &self.max_chars)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> LlmReranker<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, max_chars: usize) -> Self {
        Self {
            provider,
            max_chars,
        }
    }

    fn messages(
        &self,
        query: &RerankQuery,
        candidates: &[ScoredChunk],
    ) -> Result<Vec<Message>, RerankError> {
        let payload = RerankPayload {
            query: query.query_texts.join("\n\n"),
            top_k: query.k,
            candidates: candidates
                .iter()
                .enumerate()
                .map(|(i, c)| CandidatePayload {
                    id: candidate_id(i),
                    path: &c.chunk.file_path,
                    start_line: c.chunk.start_line,
                    end_line: c.chunk.end_line,
                    label: c.chunk.label.as_deref(),
                    snippet: truncate_chars(&c.chunk.content, self.max_chars),
                })
                .collect(),
        };
        let user = serde_json::to_string(&payload)
            .map_err(|e| RerankError::Invalid(format!("payload encoding: {e}")))?;
        Ok(vec![
            Message::system(RERANKER_SYSTEM_PROMPT),
            Message::user(user),
        ])
    }
}

impl<P: LlmProvider> Reranker for LlmReranker<P> {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn rerank(
        &self,
        query: &RerankQuery,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, RerankError> {
        if candidates.len() <= 1 {
            return Ok(candidates);
        }
        let messages = self.messages(query, &candidates)?;
        let ranking: Ranking = self.provider.chat_typed(&messages).await?;
        if ranking.ranking.is_empty() {
            return Err(RerankError::Invalid("empty ranking".into()));
        }
        Ok(apply_ranking(candidates, &ranking))
    }
}

fn identifiers(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Blends the vector score with identifier overlap between query and chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalReranker {
    /// Share of the final score taken by lexical overlap, in `[0, 1]`.
    pub weight: f32,
}

impl LexicalReranker {
    #[must_use]
    pub fn new(weight: f32) -> Self {
        Self {
            weight: if weight.is_finite() {
                weight.clamp(0.0, 1.0)
            } else {
                0.5
            },
        }
    }

    #[must_use]
    pub fn order(&self, query: &RerankQuery, candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let wanted: HashSet<String> = query
            .query_texts
            .iter()
            .flat_map(|t| identifiers(t))
            .collect();
        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .map(|mut c| {
                let common = wanted.intersection(&identifiers(&c.chunk.content)).count();
                #[allow(clippy::cast_precision_loss)]
                let overlap = common as f32 / wanted.len().max(1) as f32;
                c.rerank_score = Some((1.0 - self.weight) * c.score + self.weight * overlap);
                c
            })
            .collect();
        scored.sort_by(|a, b| {
            let (sa, sb) = (a.rerank_score.unwrap_or(a.score), b.rerank_score.unwrap_or(b.score));
            sb.total_cmp(&sa)
                .then_with(|| a.document_id().cmp(b.document_id()))
        });
        scored
    }
}

impl Reranker for LexicalReranker {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn rerank(
        &self,
        query: &RerankQuery,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, RerankError> {
        Ok(self.order(query, candidates))
    }
}

/// Reranking strategy chosen by configuration.
pub enum AnyReranker<P> {
    Llm(LlmReranker<P>),
    Lexical(LexicalReranker),
}

impl<P> std::fmt::Debug for AnyReranker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Llm(r) => r.fmt(f),
            Self::Lexical(r) => r.fmt(f),
        }
    }
}

impl<P: LlmProvider> Reranker for AnyReranker<P> {
    fn name(&self) -> &'static str {
        match self {
            Self::Llm(r) => r.name(),
            Self::Lexical(r) => r.name(),
        }
    }

    async fn rerank(
        &self,
        query: &RerankQuery,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, RerankError> {
        match self {
            Self::Llm(r) => r.rerank(query, candidates).await,
            Self::Lexical(r) => r.rerank(query, candidates).await,
        }
    }
}
