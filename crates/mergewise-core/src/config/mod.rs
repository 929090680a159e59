mod env;
mod types;


pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use mergewise_index::chunker::ChunkerConfig;
use mergewise_index::embedder::EmbeddingConfig;
use mergewise_index::query::QueryConfig;
use mergewise_index::{ContextStoreConfig, RetrievalConfig};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.resolve_secrets();
        Ok(config)
    }

    /// Pick up the provider API key from the environment.
    pub fn resolve_secrets(&mut self) {
        for var in ["MERGEWISE_OPENAI_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(val) = std::env::var(var)
                && !val.trim().is_empty()
            {
                self.secrets.openai_api_key = Some(Secret::new(val));
                return;
            }
        }
    }

    #[must_use]
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_lines: self.chunker.max_chunk_lines,
            min_chunk_lines: self.chunker.min_chunk_lines,
            window_lines: self.chunker.window_lines,
            window_overlap: self.chunker.window_overlap,
        }
    }

    #[must_use]
    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: self.embedding.batch_size,
            max_attempts: self.embedding.max_attempts,
            backoff: Duration::from_millis(self.embedding.backoff_ms),
            timeout: Duration::from_secs(self.embedding.timeout_secs),
            concurrency: self.embedding.concurrency,
        }
    }

    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            top_k: self.retrieval.top_k,
            oversample_factor: self.retrieval.oversample_factor,
            query: QueryConfig {
                context_lines: self.retrieval.query_context_lines,
                max_chars: self.retrieval.max_query_chars,
            },
            rerank_timeout: Duration::from_secs(self.reranker.timeout_secs),
        }
    }

    #[must_use]
    pub fn store_config(&self) -> ContextStoreConfig {
        ContextStoreConfig {
            enabled: self.index.enabled,
            scope: self.index.scope,
            max_files: self.index.max_files,
            max_file_bytes: self.index.max_file_bytes,
            max_snapshots: self.index.max_snapshots,
            chunker: self.chunker_config(),
            embedding: self.embedding_config(),
            retrieval: self.retrieval_config(),
        }
    }
}
