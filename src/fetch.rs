//! Fetching inputs: reference files, boundary data, time-series queries
//!
//! Every remote request runs under the client's timeout and is retried with
//! exponential backoff while the failure looks transient.

use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{GeoError, GeoResult};
use crate::models::{QueryResponse, Sample};

/// Retry policy for a single fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1)).min(64)
    }
}

/// Where a static input lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    File(PathBuf),
    Url(String),
}

impl DataLocation {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            DataLocation::Url(raw.to_string())
        } else {
            DataLocation::File(PathBuf::from(raw))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DataLocation::File(path) => path.display().to_string(),
            DataLocation::Url(url) => url.clone(),
        }
    }
}

impl std::str::FromStr for DataLocation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DataLocation::parse(s))
    }
}

/// Time-series source: a ready-made response (query URL or saved file), or
/// a database base URL that still needs `db` and `q`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    Direct(DataLocation),
    Influx {
        base_url: String,
        database: String,
        query: String,
    },
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(request_timeout: Duration, retry: RetryPolicy) -> GeoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("geo_experience/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| GeoError::Fetch {
                url: "<client>".to_string(),
                source,
            })?;
        Ok(Self { client, retry })
    }

    /// Raw bytes from a file or URL.
    pub async fn bytes(&self, location: &DataLocation) -> GeoResult<Vec<u8>> {
        match location {
            DataLocation::File(path) => tokio::fs::read(path).await.map_err(|source| GeoError::Io {
                path: path.clone(),
                source,
            }),
            DataLocation::Url(url) => self.get_with_retry(url, &[]).await,
        }
    }

    pub async fn json<T: DeserializeOwned>(&self, location: &DataLocation, what: &str) -> GeoResult<T> {
        let bytes = self.bytes(location).await?;
        serde_json::from_slice(&bytes).map_err(|source| GeoError::Parse {
            what: what.to_string(),
            source,
        })
    }

    /// Run the time-series query and flatten the matching series.
    ///
    /// A response without series is an empty result, not an error.
    pub async fn samples(&self, target: &QueryTarget, measurement: &str) -> GeoResult<Vec<Sample>> {
        let bytes = match target {
            QueryTarget::Direct(location) => self.bytes(location).await?,
            QueryTarget::Influx {
                base_url,
                database,
                query,
            } => {
                let url = format!("{}/query", base_url.trim_end_matches('/'));
                self.get_with_retry(&url, &[("db", database.as_str()), ("q", query.as_str())])
                    .await?
            }
        };

        let response: QueryResponse =
            serde_json::from_slice(&bytes).map_err(|source| GeoError::Parse {
                what: "time-series response".to_string(),
                source,
            })?;

        match response.into_samples(measurement) {
            Ok(Some(samples)) => Ok(samples),
            Ok(None) => {
                debug!("time-series query returned no series");
                Ok(Vec::new())
            }
            Err(message) => Err(GeoError::Query(message)),
        }
    }

    async fn get_with_retry(&self, url: &str, query: &[(&str, &str)]) -> GeoResult<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.get_once(url, query).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(url, attempt, ?delay, error = %err, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_once(&self, url: &str, query: &[(&str, &str)]) -> GeoResult<Vec<u8>> {
        let fetch_err = |source: reqwest::Error| GeoError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(fetch_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(fetch_err)?;
        debug!(url, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SERIES: &str = r#"{"results": [{"statement_id": 0, "series": [
        {"name": "ttms_data", "tags": {"postcode": "90210", "deliveryservice": "vod"},
         "columns": ["time", "mean"], "values": [["2024-05-01T00:00:00Z", 1800.0]]}
    ]}]}"#;

    /// Serve `app` on an ephemeral local port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    /// Answers 503 for the first `failures` requests, then the series.
    fn flaky(failures: usize, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/query",
                get(
                    move |State(hits): State<Arc<AtomicUsize>>,
                          Query(params): Query<HashMap<String, String>>| async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        if params.get("db").map(String::as_str) != Some("latlon_stats") {
                            return (StatusCode::BAD_REQUEST, "missing db".to_string());
                        }
                        if n < failures {
                            (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string())
                        } else {
                            (StatusCode::OK, SERIES.to_string())
                        }
                    },
                ),
            )
            .with_state(hits)
    }

    fn influx(base_url: String) -> QueryTarget {
        QueryTarget::Influx {
            base_url,
            database: "latlon_stats".into(),
            query: "select mean(ttms) from ttms_data".into(),
        }
    }

    fn fetcher(attempts: u32) -> Fetcher {
        Fetcher::new(
            Duration::from_secs(2),
            RetryPolicy {
                attempts,
                base_delay: Duration::from_millis(5),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(30), Duration::from_millis(6400));
    }

    #[test]
    fn test_location_parse() {
        assert_eq!(
            DataLocation::parse("https://example.net/us-states.json"),
            DataLocation::Url("https://example.net/us-states.json".into())
        );
        assert_eq!(
            DataLocation::parse("data/us-states.json"),
            DataLocation::File(PathBuf::from("data/us-states.json"))
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let fetcher = Fetcher::new(Duration::from_secs(1), RetryPolicy::default()).unwrap();
        let err = fetcher
            .bytes(&DataLocation::File(PathBuf::from("/definitely/not/here.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::Io { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_json_from_file() {
        let dir = std::env::temp_dir().join(format!("geo_experience_fetch_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("boundaries.json");
        tokio::fs::write(&path, br#"{"type":"FeatureCollection","features":[]}"#)
            .await
            .unwrap();

        let fetcher = Fetcher::new(Duration::from_secs(1), RetryPolicy::default()).unwrap();
        let value: serde_json::Value = fetcher
            .json(&DataLocation::File(path), "boundaries")
            .await
            .unwrap();
        assert_eq!(value["type"], "FeatureCollection");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base_url = serve(flaky(2, hits.clone())).await;

        let samples = fetcher(3)
            .samples(&influx(base_url), "ttms_data")
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].postal_code, "90210");
        assert_eq!(samples[0].latency_ms, Some(1800.0));
    }

    #[tokio::test]
    async fn test_retries_stop_at_attempt_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base_url = serve(flaky(usize::MAX, hits.clone())).await;

        let err = fetcher(2)
            .samples(&influx(base_url), "ttms_data")
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::HttpStatus { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base_url = serve(flaky(0, hits.clone())).await;
        let target = QueryTarget::Influx {
            base_url,
            database: "other".into(),
            query: "select 1".into(),
        };

        let err = fetcher(3).samples(&target, "ttms_data").await.unwrap_err();
        assert!(matches!(err, GeoError::HttpStatus { status: 400, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
