use std::future::Future;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generate the JSON schema for `T` as a `serde_json::Value` plus its short type name.
///
/// # Errors
///
/// Returns `LlmError::Json` if the schema cannot be serialized.
pub fn schema_for<T: JsonSchema>() -> Result<(serde_json::Value, &'static str), LlmError> {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema)?;
    let name = std::any::type_name::<T>()
        .rsplit("::")
        .next()
        .unwrap_or("Output");
    Ok((value, name))
}

/// Strip a surrounding markdown code fence, if any, from a model reply.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the LLM and return the assistant response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Chat and deserialize the reply into `T`.
    ///
    /// The default asks for plain JSON through [`chat`](Self::chat) and parses the reply.
    /// Providers with native structured output override this.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::StructuredParse` if the reply is not valid JSON for `T`.
    fn chat_typed<T>(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<T, LlmError>> + Send
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        Self: Sized,
    {
        async move {
            let raw = self.chat(messages).await?;
            serde_json::from_str::<T>(strip_code_fence(&raw))
                .map_err(|e| LlmError::StructuredParse(e.to_string()))
        }
    }

    /// Compute an embedding vector for a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider does not support embeddings or the request fails.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Compute embeddings for a batch of texts, one vector per text in input order.
    ///
    /// The default embeds texts one at a time.
    ///
    /// # Errors
    ///
    /// Returns the first per-text failure.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    fn supports_embeddings(&self) -> bool;

    fn name(&self) -> &'static str;
}
