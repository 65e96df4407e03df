use crate::config::HttpConfig;
use crate::http::{HttpClient, HttpError, RetryPolicy};
use std::fmt::Debug;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("address source unavailable: {0}")]
    Unavailable(#[source] HttpError),
}

/// Remote publisher of the raw address table.
pub trait AddressSource: Debug {
    /// Retrieves the full table as UTF-8 text. One network round trip.
    fn fetch(&self) -> Result<String, SourceError>;
}

/// A spreadsheet published to the web as CSV.
#[derive(Debug)]
pub struct PublishedSheetSource {
    url: String,
    client: HttpClient,
}

impl PublishedSheetSource {
    pub fn new(url: impl Into<String>, http: &HttpConfig) -> Result<Self, SourceError> {
        let client =
            HttpClient::new(http, RetryPolicy::single_attempt()).map_err(SourceError::Unavailable)?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl AddressSource for PublishedSheetSource {
    fn fetch(&self) -> Result<String, SourceError> {
        debug!(url = %self.url, "fetching address sheet");
        let body = self
            .client
            .get_text(&self.url, &[])
            .map_err(SourceError::Unavailable)?;
        info!(bytes = body.len(), "address sheet fetched");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::serve;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn http_config() -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
        }
    }

    #[test]
    fn fetch_returns_sheet_text() {
        let base = serve(Router::new().route(
            "/pub",
            get(|| async { "Timestamp,Street Address\n2024-06-01,123 Main St\n" }),
        ));
        let source = PublishedSheetSource::new(format!("{base}/pub"), &http_config()).expect("source");

        let body = source.fetch().expect("sheet");

        assert!(body.starts_with("Timestamp,Street Address"));
    }

    #[test]
    fn server_errors_fail_after_one_attempt() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let base = serve(Router::new().route(
            "/pub",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::BAD_GATEWAY }
            }),
        ));
        let source = PublishedSheetSource::new(format!("{base}/pub"), &http_config()).expect("source");

        let error = source.fetch().expect_err("bad gateway");

        assert!(matches!(
            error,
            SourceError::Unavailable(HttpError::Status { status: 502, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
