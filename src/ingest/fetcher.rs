use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::latency::LatencyStats;
use crate::config::{SourceEndpoint, FETCH_RETRIES, FETCH_RETRY_DELAY_MS, FETCH_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::SourceId;

/// HTTP client for the per-source odds feeds.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    latency: Arc<LatencyStats>,
}

impl FeedFetcher {
    pub fn new(latency: Arc<LatencyStats>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, latency })
    }

    /// Fetches one feed, retrying with a fixed delay. Only successful attempts are timed.
    pub async fn fetch_feed(&self, endpoint: &SourceEndpoint) -> Result<Value> {
        let mut last_error = String::new();
        for attempt in 1..=FETCH_RETRIES {
            let started = Instant::now();
            match self.get_json(&endpoint.url).await {
                Ok(feed) => {
                    self.latency.record(started.elapsed());
                    debug!(
                        source = endpoint.id,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Feed fetched"
                    );
                    return Ok(feed);
                }
                Err(e) => {
                    warn!(source = endpoint.id, attempt, error = %e, "Feed fetch failed");
                    last_error = e.to_string();
                    if attempt < FETCH_RETRIES {
                        tokio::time::sleep(Duration::from_millis(FETCH_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        Err(AppError::Fetch(format!(
            "source {} failed after {FETCH_RETRIES} attempts: {last_error}",
            endpoint.id
        )))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }

    /// Fetches every feed concurrently. Any source still failing after its retries fails the
    /// whole call.
    pub async fn fetch_all(&self, endpoints: &[SourceEndpoint]) -> Result<BTreeMap<SourceId, Value>> {
        let results = join_all(
            endpoints
                .iter()
                .map(|e| async move { (e.id, self.fetch_feed(e).await) }),
        )
        .await;

        let mut feeds = BTreeMap::new();
        let mut first_error = None;
        for (source, result) in results {
            match result {
                Ok(feed) => {
                    feeds.insert(source, feed);
                }
                Err(e) => {
                    error!(source, error = %e, "Required source unavailable");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(feeds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_source_fails_the_cycle() {
        let latency = Arc::new(LatencyStats::new());
        let fetcher = FeedFetcher::new(Arc::clone(&latency)).unwrap();
        let endpoints = vec![SourceEndpoint { id: 1, url: "http://127.0.0.1:1/feed".to_string() }];

        let result = fetcher.fetch_all(&endpoints).await;
        assert!(matches!(result, Err(AppError::Fetch(_))));
        assert_eq!(latency.len(), 0);
    }

    #[tokio::test]
    async fn no_sources_is_an_empty_success() {
        let fetcher = FeedFetcher::new(Arc::new(LatencyStats::new())).unwrap();
        assert!(fetcher.fetch_all(&[]).await.unwrap().is_empty());
    }
}
