//! Application bootstrap: config resolution, provider, storage and store construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mergewise_index::ContextStore;
use mergewise_index::rerank::{AnyReranker, LexicalReranker, LlmReranker};
use mergewise_index::source::RepositorySource;
use mergewise_index::storage::{FsSnapshotStorage, SnapshotStorage};
use mergewise_llm::LlmProvider;
use mergewise_llm::any::AnyProvider;
use mergewise_llm::openai::OpenAiProvider;

use crate::config::{Config, ProviderKind, RerankStrategy};

pub struct AppBuilder {
    config: Config,
}

impl AppBuilder {
    /// Load the config file (defaults when missing) with env overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            config: Config::load(config_path)?,
        })
    }

    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn build_provider(&self) -> AnyProvider {
        create_provider(&self.config)
    }

    pub fn build_storage(&self) -> Arc<dyn SnapshotStorage> {
        Arc::new(FsSnapshotStorage::new(self.config.index.storage_dir.clone()))
    }

    /// Wire a context store over `source` with the configured provider, storage and
    /// reranker.
    pub fn build_store(&self, source: Arc<dyn RepositorySource>) -> ContextStore<AnyProvider> {
        let provider = Arc::new(self.build_provider());
        let store = ContextStore::new(
            self.config.store_config(),
            source,
            self.build_storage(),
            Arc::clone(&provider),
        );
        match create_reranker(&self.config, provider) {
            Some(reranker) => store.with_reranker(reranker),
            None => store,
        }
    }
}

pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(path) = std::env::var("MERGEWISE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Build the provider named by `llm.provider`.
///
/// A missing API key is not an error: OpenAI-compatible local servers accept
/// unauthenticated requests, and a rejected request degrades like any other provider
/// failure.
pub fn create_provider(config: &Config) -> AnyProvider {
    match config.llm.provider {
        ProviderKind::OpenAi => {
            let api_key = match &config.secrets.openai_api_key {
                Some(key) => key.expose().to_owned(),
                None => {
                    tracing::warn!("MERGEWISE_OPENAI_API_KEY not set, sending unauthenticated requests");
                    String::new()
                }
            };
            AnyProvider::OpenAi(OpenAiProvider::new(
                api_key,
                config.llm.base_url.clone(),
                config.llm.model.clone(),
                config.llm.max_tokens,
                Some(config.llm.embedding_model.clone()),
            ))
        }
        #[cfg(feature = "mock")]
        ProviderKind::Mock => AnyProvider::Mock(mergewise_llm::mock::MockProvider::default()),
    }
}

pub fn create_reranker<P: LlmProvider>(config: &Config, provider: Arc<P>) -> Option<AnyReranker<P>> {
    if !config.reranker.enabled {
        return None;
    }
    let reranker = match config.reranker.strategy {
        RerankStrategy::Llm => AnyReranker::Llm(LlmReranker::new(provider, config.reranker.max_chars)),
        RerankStrategy::Lexical => {
            AnyReranker::Lexical(LexicalReranker::new(config.reranker.lexical_weight))
        }
    };
    tracing::debug!(strategy = ?config.reranker.strategy, "reranker configured");
    Some(reranker)
}

#[cfg(test)]
mod tests {
    use mergewise_llm::mock::MockProvider;

    use super::*;

    #[test]
    fn cli_path_wins() {
        let path = resolve_config_path(Some(PathBuf::from("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }

    #[test]
    fn openai_provider_without_key_still_builds() {
        let config = Config::default();
        let provider = create_provider(&config);
        assert_eq!(provider.name(), "openai");
        assert!(provider.supports_embeddings());
    }

    #[test]
    fn disabled_reranker_is_none() {
        let mut config = Config::default();
        config.reranker.enabled = false;
        assert!(create_reranker(&config, Arc::new(MockProvider::default())).is_none());
    }

    #[test]
    fn strategy_selects_reranker_variant() {
        let mut config = Config::default();
        assert!(matches!(
            create_reranker(&config, Arc::new(MockProvider::default())),
            Some(AnyReranker::Llm(_))
        ));
        config.reranker.strategy = RerankStrategy::Lexical;
        assert!(matches!(
            create_reranker(&config, Arc::new(MockProvider::default())),
            Some(AnyReranker::Lexical(_))
        ));
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn store_persists_under_storage_dir() {
        use mergewise_index::source::MemorySource;
        use mergewise_index::{IndexStatus, RepositoryKey};

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.llm.provider = ProviderKind::Mock;
        config.index.storage_dir = dir.path().to_path_buf();
        let builder = AppBuilder::from_config(config);

        let key: RepositoryKey = "acme/widgets".parse().unwrap();
        let source = Arc::new(MemorySource::new());
        source.add_commit(&key, "c1", [("src/lib.rs", "pub fn answer() -> u32 {\n    42\n}\n")]);
        let store = builder.build_store(source);

        let report = store.repository(key.clone()).ensure_index("c1", &[]).await;
        assert_eq!(report.files_indexed, 1);
        assert_eq!(store.index_status(&key).await, IndexStatus::Ready);
        assert!(dir.path().join("acme__widgets").join("snapshot.idx").exists());
    }
}
