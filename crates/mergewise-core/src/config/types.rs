use std::fmt;
use std::path::PathBuf;

use mergewise_index::plan::IndexScope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunker: ChunkerSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Chat and embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    /// Deterministic in-process provider, available with the `mock` feature.
    #[cfg(feature = "mock")]
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            #[cfg(feature = "mock")]
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4.1-mini".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub scope: IndexScope,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
}

fn default_true() -> bool {
    true
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data/context-indexes")
}

fn default_max_files() -> usize {
    200
}

fn default_max_file_bytes() -> u64 {
    80_000
}

fn default_max_snapshots() -> usize {
    16
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_dir: default_storage_dir(),
            scope: IndexScope::default(),
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
            max_snapshots: default_max_snapshots(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChunkerSection {
    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,
    #[serde(default = "default_min_chunk_lines")]
    pub min_chunk_lines: usize,
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,
}

fn default_max_chunk_lines() -> usize {
    100
}

fn default_min_chunk_lines() -> usize {
    3
}

fn default_window_lines() -> usize {
    40
}

fn default_window_overlap() -> usize {
    10
}

impl Default for ChunkerSection {
    fn default() -> Self {
        Self {
            max_chunk_lines: default_max_chunk_lines(),
            min_chunk_lines: default_min_chunk_lines(),
            window_lines: default_window_lines(),
            window_overlap: default_window_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_batch_size() -> usize {
    32
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    2
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_embed_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,
    #[serde(default = "default_query_context_lines")]
    pub query_context_lines: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

fn default_top_k() -> usize {
    4
}

fn default_oversample_factor() -> usize {
    3
}

fn default_query_context_lines() -> usize {
    3
}

fn default_max_query_chars() -> usize {
    4000
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            oversample_factor: default_oversample_factor(),
            query_context_lines: default_query_context_lines(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

/// Reranking strategy applied to vector search candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankStrategy {
    #[default]
    Llm,
    Lexical,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RerankerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: RerankStrategy,
    /// Snippet length sent per candidate.
    #[serde(default = "default_rerank_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
}

fn default_rerank_max_chars() -> usize {
    900
}

fn default_rerank_timeout_secs() -> u64 {
    20
}

fn default_lexical_weight() -> f32 {
    0.5
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RerankStrategy::default(),
            max_chars: default_rerank_max_chars(),
            timeout_secs: default_rerank_timeout_secs(),
            lexical_weight: default_lexical_weight(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Wrapper for sensitive strings with redacted Debug/Display.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Secrets read from the environment, never from the config file.
#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
}
