//! Rate-limit handling for provider requests.
//!
//! Only HTTP 429 is retried here. Timeouts, connection failures and 5xx responses go
//! back to the caller as transient errors for the embedding gateway's own backoff.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::LlmError;

/// How long to wait between rate-limited attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RateLimitPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for both computed backoff and server-supplied `Retry-After`.
    pub max_delay: Duration,
}

impl RateLimitPolicy {
    pub(crate) const DEFAULT: Self = Self {
        max_retries: 2,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };

    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay)
    }

    /// Delay before retry `attempt`: the server's `Retry-After` when it sent one,
    /// exponential backoff otherwise.
    pub(crate) fn delay(&self, headers: &HeaderMap, attempt: u32) -> Duration {
        retry_after(headers).map_or_else(|| self.backoff(attempt), |d| d.min(self.max_delay))
    }
}

/// `Retry-After` in (possibly fractional) seconds. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Send a request built by `f`, retrying on 429 as `policy` allows.
///
/// `f` must build a fresh request on every call. The first response that is not a
/// 429 is returned as is.
///
/// # Errors
///
/// Returns `LlmError::RateLimited` once retries are exhausted, `LlmError::Timeout`
/// for a timed-out request, or `LlmError::Http` for other transport failures.
pub(crate) async fn send_with_retry<F, Fut>(
    provider_name: &str,
    policy: &RateLimitPolicy,
    mut f: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = f().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Http(e)
            }
        })?;
        if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt >= policy.max_retries {
            tracing::warn!(
                provider = provider_name,
                attempts = attempt + 1,
                "rate limited, giving up"
            );
            return Err(LlmError::RateLimited);
        }
        let delay = policy.delay(response.headers(), attempt);
        tracing::warn!(
            provider = provider_name,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            retry = attempt + 1,
            max_retries = policy.max_retries,
            "rate limited, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn headers(retry_after: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_str(retry_after).unwrap());
        h
    }

    fn fast(max_retries: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let p = RateLimitPolicy::DEFAULT;
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_is_honoured_and_capped() {
        let p = RateLimitPolicy::DEFAULT;
        assert_eq!(p.delay(&headers("3"), 0), Duration::from_secs(3));
        assert_eq!(p.delay(&headers("0.5"), 0), Duration::from_millis(500));
        assert_eq!(p.delay(&headers("3600"), 0), Duration::from_secs(30));
    }

    #[test]
    fn unusable_retry_after_falls_back_to_backoff() {
        let p = RateLimitPolicy::DEFAULT;
        assert_eq!(
            p.delay(&headers("Wed, 21 Oct 2015 07:28:00 GMT"), 2),
            p.backoff(2)
        );
        assert_eq!(p.delay(&headers("-1"), 1), p.backoff(1));
        assert_eq!(p.delay(&HeaderMap::new(), 0), p.backoff(0));
    }

    /// Spawn a minimal HTTP server that returns a fixed response for each connection.
    async fn spawn_mock_server(responses: Vec<&'static str>) -> (u16, tokio::task::JoinHandle<()>) {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            for resp in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.split();
                    let mut buf_reader = BufReader::new(reader);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        buf_reader.read_line(&mut line).await.unwrap_or(0);
                        if line == "\r\n" || line == "\n" || line.is_empty() {
                            break;
                        }
                    }
                    writer.write_all(resp.as_bytes()).await.ok();
                });
            }
        });

        (port, handle)
    }

    const RATE_LIMITED: &str =
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

    #[tokio::test]
    async fn first_attempt_success() {
        let (port, _handle) = spawn_mock_server(vec![OK]).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/embeddings");

        let result = send_with_retry("test", &fast(3), || client.get(&url).send()).await;

        assert_eq!(result.unwrap().status(), 200);
    }

    #[tokio::test]
    async fn exhausted_retries_report_rate_limited() {
        let (port, _handle) = spawn_mock_server(vec![RATE_LIMITED, RATE_LIMITED]).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/embeddings");

        let result = send_with_retry("test", &fast(1), || client.get(&url).send()).await;

        assert!(
            matches!(result, Err(LlmError::RateLimited)),
            "expected RateLimited, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn recovers_after_one_rate_limit() {
        let (port, _handle) = spawn_mock_server(vec![RATE_LIMITED, OK]).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/embeddings");

        let result = send_with_retry("test", &fast(2), || client.get(&url).send()).await;

        assert_eq!(result.unwrap().status(), 200);
    }

    #[tokio::test]
    async fn server_errors_are_passed_through() {
        let (port, _handle) = spawn_mock_server(vec![UNAVAILABLE, OK]).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/embeddings");

        let result = send_with_retry("test", &fast(2), || client.get(&url).send()).await;

        assert_eq!(result.unwrap().status(), 503);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(attempt in 0u32..64) {
            let p = RateLimitPolicy::DEFAULT;
            let delay = p.backoff(attempt);
            prop_assert!(delay >= p.base_delay);
            prop_assert!(delay <= p.max_delay);
            if attempt > 0 {
                prop_assert!(delay >= p.backoff(attempt - 1));
            }
        }
    }
}
