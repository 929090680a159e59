#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable")]
    Unavailable,

    #[error("request timed out")]
    Timeout,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    #[error("embedding batch size mismatch: sent {expected} texts, got {actual} vectors")]
    BatchSizeMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("structured output parse failed: {0}")]
    StructuredParse(String),

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Timeouts, rate limits, connection failures and server-side unavailability are
    /// transient. Shape and parse errors are not: the same request will fail again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Unavailable | Self::Timeout => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes() {
        assert!(LlmError::RateLimited.is_transient());
        assert!(LlmError::Unavailable.is_transient());
        assert!(LlmError::Timeout.is_transient());
    }

    #[test]
    fn malformed_responses_are_not_transient() {
        assert!(
            !LlmError::BatchSizeMismatch {
                expected: 2,
                actual: 1
            }
            .is_transient()
        );
        assert!(
            !LlmError::DimensionMismatch {
                expected: 8,
                actual: 4
            }
            .is_transient()
        );
        assert!(!LlmError::StructuredParse("bad".into()).is_transient());
        assert!(!LlmError::EmptyResponse { provider: "openai" }.is_transient());
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!LlmError::Json(json_err).is_transient());
    }

    #[test]
    fn display_includes_counts() {
        let e = LlmError::BatchSizeMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            e.to_string(),
            "embedding batch size mismatch: sent 3 texts, got 2 vectors"
        );
    }
}
