use std::str::FromStr;

use super::Config;

/// Parse an environment variable, warning and returning `None` when it does not parse.
fn parsed<T: FromStr>(var: &str) -> Option<T> {
    let v = std::env::var(var).ok()?;
    match v.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring invalid {var} value: {v}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_index();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("MERGEWISE_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid MERGEWISE_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("MERGEWISE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("MERGEWISE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("MERGEWISE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Some(enabled) = parsed::<bool>("MERGEWISE_INDEX_ENABLED") {
            self.index.enabled = enabled;
        }
        if let Ok(v) = std::env::var("MERGEWISE_INDEX_DIR")
            && !v.trim().is_empty()
        {
            self.index.storage_dir = v.into();
        }
        if let Ok(v) = std::env::var("MERGEWISE_INDEX_SCOPE") {
            match v.parse() {
                Ok(scope) => self.index.scope = scope,
                Err(e) => tracing::warn!("ignoring MERGEWISE_INDEX_SCOPE: {e}"),
            }
        }
        if let Some(n) = parsed::<usize>("MERGEWISE_INDEX_MAX_FILES") {
            self.index.max_files = n;
        }
        if let Some(n) = parsed::<usize>("MERGEWISE_EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = n.max(1);
        }
        if let Some(k) = parsed::<usize>("MERGEWISE_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = k;
        }
        if let Some(n) = parsed::<usize>("MERGEWISE_RETRIEVAL_OVERSAMPLE") {
            self.retrieval.oversample_factor = n.max(1);
        }
        if let Some(enabled) = parsed::<bool>("MERGEWISE_RERANKER_ENABLED") {
            self.reranker.enabled = enabled;
        }
        if let Ok(v) = std::env::var("MERGEWISE_RERANKER_STRATEGY") {
            let normalized = v.trim().to_ascii_lowercase();
            if let Ok(strategy) = serde_json::from_value(serde_json::Value::String(normalized)) {
                self.reranker.strategy = strategy;
            } else {
                tracing::warn!("ignoring invalid MERGEWISE_RERANKER_STRATEGY value: {v}");
            }
        }
    }
}
