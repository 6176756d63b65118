//! Price grid retrieval from the backend price endpoint.

use std::env;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bars::BarLoadError;
use crate::grid::{GridError, GridRequest, PriceField, PriceGrid, PriceGridResponse};

const PRICE_ENDPOINT_PATH: &str = "/api/price";

#[derive(Debug, Error)]
pub enum GridFetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("failed to decode price grid from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("backend returned an invalid grid: {0}")]
    InvalidGrid(#[from] GridError),
    #[error("local minute-bar store error: {0}")]
    Store(#[from] BarLoadError),
    #[error("price source serves no {0} prices")]
    UnsupportedPriceField(PriceField),
}

pub trait PriceGridSource: Send + Sync + 'static {
    fn fetch_grid(&self, req: &GridRequest) -> Result<PriceGrid, GridFetchError>;

    fn health(&self) -> SourceHealth {
        SourceHealth::of_kind("custom")
    }
}

/// What a source can say about itself without fetching a grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceHealth {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_minute_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_minute_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_loaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_skipped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl SourceHealth {
    pub fn of_kind(kind: &'static str) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceApiConfig {
    pub base_url: String,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PriceApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            http_timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

impl PriceApiConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(raw) = env::var("IMPACT_PRICE_API_URL") {
            let trimmed = raw.trim().trim_end_matches('/');
            if !trimmed.is_empty() {
                cfg.base_url = trimmed.to_string();
            }
        }
        if let Some(value) = env_parse("IMPACT_HTTP_TIMEOUT_MS") {
            cfg.http_timeout_ms = value;
        }
        if let Some(value) = env_parse("IMPACT_HTTP_MAX_RETRIES") {
            cfg.max_retries = value;
        }
        if let Some(value) = env_parse("IMPACT_HTTP_RETRY_BACKOFF_MS") {
            cfg.retry_backoff_ms = value;
        }

        cfg
    }

    pub fn price_endpoint(&self) -> String {
        format!("{}{PRICE_ENDPOINT_PATH}", self.base_url.trim_end_matches('/'))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

/// Blocking client for the backend price endpoint.
///
/// Must be built and dropped outside of an async context; run
/// `fetch_grid` on a blocking thread when called from tokio.
pub struct HttpPriceGridSource {
    cfg: PriceApiConfig,
    fetcher: Box<dyn HttpFetcher>,
}

impl HttpPriceGridSource {
    pub fn new(cfg: PriceApiConfig) -> Result<Self, GridFetchError> {
        let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
        Ok(Self {
            cfg,
            fetcher: Box::new(fetcher),
        })
    }

    #[cfg(test)]
    fn with_fetcher(cfg: PriceApiConfig, fetcher: Box<dyn HttpFetcher>) -> Self {
        Self { cfg, fetcher }
    }

    pub fn config(&self) -> &PriceApiConfig {
        &self.cfg
    }
}

impl PriceGridSource for HttpPriceGridSource {
    fn fetch_grid(&self, req: &GridRequest) -> Result<PriceGrid, GridFetchError> {
        // The backend endpoint only serves closes.
        if req.price_field != PriceField::Close {
            return Err(GridFetchError::UnsupportedPriceField(req.price_field));
        }

        let url = self.cfg.price_endpoint();
        let query = req.query_pairs();
        debug!(
            component = "price_source",
            event = "price.fetch.start",
            url = %url,
            anchor_ts = req.anchor_ts
        );

        let body = retry(&self.cfg, || self.fetcher.get_bytes(&url, &query))?;
        let response: PriceGridResponse =
            serde_json::from_slice(&body).map_err(|err| GridFetchError::Decode {
                url: url.clone(),
                message: err.to_string(),
            })?;
        let grid = PriceGrid::try_from(response)?;

        info!(
            component = "price_source",
            event = "price.fetch.finish",
            anchor_ts = req.anchor_ts,
            minutes = grid.len(),
            present_points = grid.present_points()
        );

        Ok(grid)
    }

    fn health(&self) -> SourceHealth {
        SourceHealth {
            endpoint: Some(self.cfg.price_endpoint()),
            ..SourceHealth::of_kind("price_api")
        }
    }
}

type QueryPairs = [(&'static str, String)];

trait HttpFetcher: Send + Sync {
    fn get_bytes(&self, url: &str, query: &QueryPairs) -> Result<Vec<u8>, GridFetchError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64) -> Result<Self, GridFetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| GridFetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }

    fn build_request(
        &self,
        url: &str,
        query: &QueryPairs,
    ) -> Result<reqwest::blocking::Request, GridFetchError> {
        self.client
            .get(url)
            .query(query)
            .build()
            .map_err(|err| GridFetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str, query: &QueryPairs) -> Result<Vec<u8>, GridFetchError> {
        let request = self.build_request(url, query)?;
        let response = self
            .client
            .execute(request)
            .map_err(|err| GridFetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GridFetchError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| GridFetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

fn retry<T>(
    cfg: &PriceApiConfig,
    mut f: impl FnMut() -> Result<T, GridFetchError>,
) -> Result<T, GridFetchError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let factor = 1u64 << shift;
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(factor);
                warn!(
                    component = "price_source",
                    event = "price.fetch.retry",
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockFetcher {
        responses: HashMap<String, Vec<u8>>,
        failures_before_success: usize,
        calls: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<Vec<(&'static str, String)>>>>,
    }

    impl MockFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.responses
                .insert(url.to_string(), body.as_bytes().to_vec());
            self
        }
    }

    impl HttpFetcher for MockFetcher {
        fn get_bytes(&self, url: &str, query: &QueryPairs) -> Result<Vec<u8>, GridFetchError> {
            self.queries.lock().unwrap().push(query.to_vec());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(GridFetchError::HttpRequest {
                    url: url.to_string(),
                    message: "simulated outage".to_string(),
                });
            }
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| GridFetchError::HttpRequest {
                    url: url.to_string(),
                    message: "missing mock response".to_string(),
                })
        }
    }

    fn cfg() -> PriceApiConfig {
        PriceApiConfig {
            base_url: "http://backend.test/".to_string(),
            retry_backoff_ms: 0,
            ..PriceApiConfig::default()
        }
    }

    const URL: &str = "http://backend.test/api/price";

    #[test]
    fn endpoint_joins_base_url_without_double_slash() {
        assert_eq!(cfg().price_endpoint(), URL);
    }

    #[test]
    fn request_query_is_url_encoded() {
        let fetcher = ReqwestBlockingFetcher::new(1_000).unwrap();
        let request = fetcher
            .build_request(
                URL,
                &[
                    ("start", "1735689630".to_string()),
                    ("q", "a&b=c d".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(request.url().query(), Some("start=1735689630&q=a%26b%3Dc+d"));
    }

    #[test]
    fn open_prices_are_refused_without_a_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = MockFetcher {
            calls: Arc::clone(&calls),
            ..MockFetcher::default()
        };
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(fetcher));

        let req = GridRequest::new(1_735_689_630, 2, 0).with_price_field(PriceField::Open);
        let err = source.fetch_grid(&req).unwrap_err();
        assert!(matches!(
            err,
            GridFetchError::UnsupportedPriceField(PriceField::Open)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn health_names_the_endpoint() {
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(MockFetcher::default()));
        let health = source.health();
        assert_eq!(health.kind, "price_api");
        assert_eq!(health.endpoint.as_deref(), Some(URL));
        assert_eq!(health.rows, None);
    }

    #[test]
    fn fetch_decodes_grid_with_nulls() {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let fetcher = MockFetcher {
            queries: Arc::clone(&queries),
            ..MockFetcher::default()
        }
        .with(
            URL,
            r#"{"minute_ts":[1735689600,1735689660,1735689720],"close":[100.0,null,102.0],"tweet_minute_ts":1735689600}"#,
        );
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(fetcher));

        let grid = source
            .fetch_grid(&GridRequest::new(1_735_689_630, 2, 0))
            .unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.close_at(1_735_689_660), None);
        assert_eq!(grid.tweet_minute_ts(), Some(1_735_689_600));
        assert_eq!(
            queries.lock().unwrap()[0],
            vec![
                ("start", "1735689630".to_string()),
                ("minutes", "2".to_string()),
                ("pre", "0".to_string()),
                ("full", "1".to_string()),
            ]
        );
    }

    #[test]
    fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = MockFetcher {
            failures_before_success: 2,
            calls: Arc::clone(&calls),
            ..MockFetcher::default()
        }
        .with(URL, r#"{"minute_ts":[],"close":[]}"#);
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(fetcher));

        let grid = source
            .fetch_grid(&GridRequest::new(1_735_689_630, 2, 0))
            .unwrap();
        assert!(grid.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = MockFetcher {
            failures_before_success: usize::MAX,
            calls: Arc::clone(&calls),
            ..MockFetcher::default()
        };
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(fetcher));

        let err = source
            .fetch_grid(&GridRequest::new(1_735_689_630, 2, 0))
            .unwrap_err();
        assert!(matches!(err, GridFetchError::HttpRequest { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn malformed_grid_is_rejected() {
        let fetcher = MockFetcher::default().with(
            URL,
            r#"{"minute_ts":[1735689600,1735689660],"close":[100.0]}"#,
        );
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(fetcher));

        let err = source
            .fetch_grid(&GridRequest::new(1_735_689_630, 2, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            GridFetchError::InvalidGrid(GridError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn non_json_body_is_a_decode_error() {
        let fetcher = MockFetcher::default().with(URL, "<html>oops</html>");
        let source = HttpPriceGridSource::with_fetcher(cfg(), Box::new(fetcher));

        let err = source
            .fetch_grid(&GridRequest::new(1_735_689_630, 2, 0))
            .unwrap_err();
        assert!(matches!(err, GridFetchError::Decode { .. }));
    }
}
