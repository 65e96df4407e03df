//! Blocking HTTP access for the synchronous pipeline.
//!
//! Each client owns a single-threaded tokio runtime and drives `reqwest` with
//! `block_on`, so callers stay synchronous.

use crate::config::HttpConfig;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("response from {url} could not be decoded: {message}")]
    Decode { url: String, message: String },
    #[error("http client unavailable: {0}")]
    Setup(String),
}

impl HttpError {
    /// Transport failures, throttling and server errors may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Transport { .. } => true,
            HttpError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            HttpError::Decode { .. } | HttpError::Setup(_) => false,
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub const fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

pub struct HttpClient {
    client: reqwest::Client,
    runtime: Runtime,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(config: &HttpConfig, retry: RetryPolicy) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("wnv-outbreak/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| HttpError::Setup(err.to_string()))?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| HttpError::Setup(err.to_string()))?;

        Ok(Self {
            client,
            runtime,
            retry,
        })
    }

    pub fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, HttpError> {
        let mut attempt = 1;
        loop {
            match self.runtime.block_on(self.fetch_once(url, query)) {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        url,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed; retrying"
                    );
                    self.runtime.block_on(tokio::time::sleep(delay));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let body = self.get_text(url, query)?;
        serde_json::from_str(&body).map_err(|err| HttpError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }

    async fn fetch_once(&self, url: &str, query: &[(&str, &str)]) -> Result<String, HttpError> {
        let transport = |source: reqwest::Error| HttpError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(transport)
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::serve;
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config() -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
        }
    }

    fn flaky_router(failures: u32, status: StatusCode, hits: Arc<AtomicU32>) -> Router {
        Router::new().route(
            "/flaky",
            get(move || {
                let hits = Arc::clone(&hits);
                async move {
                    let seen = hits.fetch_add(1, Ordering::SeqCst);
                    if seen < failures {
                        (status, "not yet".to_string())
                    } else {
                        (StatusCode::OK, "ready".to_string())
                    }
                }
            }),
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn retries_server_errors_until_success() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = serve(flaky_router(2, StatusCode::SERVICE_UNAVAILABLE, Arc::clone(&hits)));
        let client = HttpClient::new(
            &config(),
            RetryPolicy::exponential(3, Duration::from_millis(10)),
        )
        .expect("client");

        let body = client.get_text(&format!("{base}/flaky"), &[]).expect("third attempt succeeds");

        assert_eq!(body, "ready");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = serve(flaky_router(10, StatusCode::TOO_MANY_REQUESTS, Arc::clone(&hits)));
        let client = HttpClient::new(
            &config(),
            RetryPolicy::exponential(2, Duration::from_millis(10)),
        )
        .expect("client");

        let error = client.get_text(&format!("{base}/flaky"), &[]).expect_err("still throttled");

        assert!(matches!(error, HttpError::Status { status: 429, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = serve(flaky_router(10, StatusCode::NOT_FOUND, Arc::clone(&hits)));
        let client = HttpClient::new(
            &config(),
            RetryPolicy::exponential(3, Duration::from_millis(10)),
        )
        .expect("client");

        let error = client.get_text(&format!("{base}/flaky"), &[]).expect_err("not found");

        assert!(!error.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_json_reports_decode_failures() {
        let base = serve(Router::new().route("/text", get(|| async { "plain words" })));
        let client = HttpClient::new(&config(), RetryPolicy::single_attempt()).expect("client");

        let error = client
            .get_json::<serde_json::Value>(&format!("{base}/text"), &[])
            .expect_err("not json");

        assert!(matches!(error, HttpError::Decode { .. }));
    }
}
