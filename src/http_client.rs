//! Thin authenticated HTTP client wrapping GraphQL verification/query calls
//! and the events/metrics ingest endpoints, with per-endpoint rate limiting
//! and a circuit breaker guarding each dependency independently.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::utils::compress_gzip;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn limiter_for(min_interval: Duration) -> Limiter {
    let per_second = (Duration::from_secs(1).as_millis() / min_interval.as_millis().max(1)).max(1) as u32;
    RateLimiter::direct(Quota::per_second(NonZeroU32::new(per_second).unwrap()))
}

pub struct HttpClient {
    client: Client,
    cfg: Arc<PipelineConfig>,
    events_breaker: CircuitBreaker,
    metrics_breaker: CircuitBreaker,
    graphql_breaker: CircuitBreaker,
    graphql_limiter: Limiter,
}

impl HttpClient {
    pub fn new(cfg: Arc<PipelineConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.collector_timeout)
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            events_breaker: CircuitBreaker::new("events-ingest", cfg.circuit.clone()),
            metrics_breaker: CircuitBreaker::new("metrics-ingest", cfg.circuit.clone()),
            graphql_breaker: CircuitBreaker::new("graphql", cfg.circuit.clone()),
            graphql_limiter: limiter_for(Duration::from_millis(100)),
            client,
            cfg,
        })
    }

    /// POST a gzip-compressed JSON array of UDM events. Max 1 MB per batch
    /// is the caller's responsibility (streamer enforces batch sizing).
    pub async fn post_events(&self, events: &[serde_json::Value]) -> Result<()> {
        let body = serde_json::to_vec(events)?;
        let compressed = compress_gzip(&body)?;
        let url = self.cfg.events_endpoint();
        let cfg = &self.cfg;
        let client = &self.client;
        self.events_breaker
            .call(|| async move {
                let resp = client
                    .post(&url)
                    .header("Api-Key", &cfg.api_key)
                    .header("Content-Encoding", "gzip")
                    .header("Content-Type", "application/json")
                    .body(compressed)
                    .send()
                    .await
                    .map_err(PipelineError::Http)?;
                check_status(resp.status(), "events ingest").await
            })
            .await
    }

    pub async fn post_metrics(&self, metrics: &[serde_json::Value]) -> Result<()> {
        let body = serde_json::json!({ "metrics": metrics });
        let bytes = serde_json::to_vec(&body)?;
        let compressed = compress_gzip(&bytes)?;
        let url = self.cfg.metrics_endpoint().to_string();
        let cfg = &self.cfg;
        let client = &self.client;
        self.metrics_breaker
            .call(|| async move {
                let resp = client
                    .post(&url)
                    .header("Api-Key", &cfg.api_key)
                    .header("Content-Encoding", "gzip")
                    .header("Content-Type", "application/json")
                    .body(compressed)
                    .send()
                    .await
                    .map_err(PipelineError::Http)?;
                check_status(resp.status(), "metrics ingest").await
            })
            .await
    }

    /// Run a GraphQL query (NRQL embedded as a string variable). Honors the
    /// per-endpoint minimum inter-request delay: requests beyond quota are
    /// queued, not rejected.
    pub async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: impl Serialize) -> Result<T> {
        self.graphql_limiter.until_ready().await;

        let url = self.cfg.graphql_endpoint();
        let cfg = &self.cfg;
        let client = &self.client;
        let payload = serde_json::json!({ "query": query, "variables": variables });

        self.graphql_breaker
            .call(|| async move {
                let resp = client
                    .post(url)
                    .header("Api-Key", &cfg.user_api_key)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(PipelineError::Http)?;
                let status = resp.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(PipelineError::AuthFailed(format!("graphql returned {status}")));
                }
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let retry_after = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    if let Some(secs) = retry_after {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                    }
                    return Err(PipelineError::RateLimited(format!("graphql rate limited, status {status}")));
                }
                if !status.is_success() {
                    return Err(PipelineError::BackendUnavailable(format!("graphql returned {status}")));
                }
                resp.json::<serde_json::Value>().await.map_err(PipelineError::Http)
            })
            .await
            .and_then(|v| serde_json::from_value(v).map_err(PipelineError::Serialization))
    }

    pub fn events_breaker(&self) -> &CircuitBreaker {
        &self.events_breaker
    }

    pub fn metrics_breaker(&self) -> &CircuitBreaker {
        &self.metrics_breaker
    }

    pub fn graphql_breaker(&self) -> &CircuitBreaker {
        &self.graphql_breaker
    }
}

async fn check_status(status: StatusCode, context: &str) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PipelineError::AuthFailed(format!("{context} returned {status}")));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PipelineError::RateLimited(format!("{context} rate limited, status {status}")));
    }
    if !status.is_success() {
        warn!(context, %status, "ingest call failed");
        return Err(PipelineError::BackendUnavailable(format!("{context} returned {status}")));
    }
    debug!(context, "ingest call succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_for_100ms_allows_ten_per_second() {
        let _limiter = limiter_for(Duration::from_millis(100));
    }
}
