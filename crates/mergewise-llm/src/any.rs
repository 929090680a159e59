#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::openai::OpenAiProvider;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given closure for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    OpenAi(OpenAiProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl LlmProvider for AnyProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        delegate_provider!(self, |p| p.chat(messages).await)
    }

    async fn chat_typed<T>(&self, messages: &[Message]) -> Result<T, LlmError>
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        Self: Sized,
    {
        delegate_provider!(self, |p| p.chat_typed::<T>(messages).await)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_provider!(self, |p| p.embed(text).await)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        delegate_provider!(self, |p| p.embed_batch(texts).await)
    }

    fn supports_embeddings(&self) -> bool {
        delegate_provider!(self, |p| p.supports_embeddings())
    }

    fn name(&self) -> &'static str {
        delegate_provider!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_variant_reports_name() {
        let p = AnyProvider::OpenAi(OpenAiProvider::new(
            "k".into(),
            "http://127.0.0.1:1".into(),
            "m".into(),
            1,
            Some("e".into()),
        ));
        assert_eq!(p.name(), "openai");
        assert!(p.supports_embeddings());
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn mock_variant_dispatches_embeddings() {
        let mock = MockProvider::default().with_dimension(4);
        let p = AnyProvider::Mock(mock.clone());
        let v = p.embed_batch(&["x".into()]).await.unwrap();
        assert_eq!(v[0].len(), 4);
        assert_eq!(mock.embed_calls(), 1);
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn mock_variant_dispatches_typed_chat() {
        #[derive(serde::Deserialize, schemars::JsonSchema)]
        struct Out {
            n: u32,
        }
        let p = AnyProvider::Mock(MockProvider::with_responses(vec!["{\"n\": 3}".into()]));
        let out: Out = p.chat_typed(&[]).await.unwrap();
        assert_eq!(out.n, 3);
    }
}
