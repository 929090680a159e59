//! HTTP client shared by the OpenAI-compatible provider.

use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Outer bound only. The embedding gateway and the reranker set tighter per-call
/// deadlines from configuration.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client with rustls, a `mergewise/{version}` user agent and redirects disabled, so
/// the bearer token is only ever sent to the configured base URL.
///
/// Falls back to reqwest's default client if the builder fails.
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("mergewise/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}
