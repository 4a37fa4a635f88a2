//! Query-backed collector: issues parameterized NRQL-shaped queries against
//! the backend's GraphQL endpoint and reshapes the response rows into
//! `RawSample`s.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::attribute::AttrValue;
use crate::collector::{Collector, RawSample, SampleEventType};
use crate::error::Result;
use crate::http_client::HttpClient;

const NRQL_TEMPLATE: &str = "SELECT * FROM {event_type} SINCE {since_minutes} MINUTES AGO";
const MAX_FETCH_RETRIES: u8 = 3;

#[derive(Deserialize)]
struct NrqlResponse {
    data: NrqlData,
}

#[derive(Deserialize)]
struct NrqlData {
    actor: NrqlActor,
}

#[derive(Deserialize)]
struct NrqlActor {
    account: NrqlAccount,
}

#[derive(Deserialize)]
struct NrqlAccount {
    nrql: NrqlResults,
}

#[derive(Deserialize)]
struct NrqlResults {
    results: Vec<serde_json::Map<String, serde_json::Value>>,
}

pub struct QueryCollector {
    http: Arc<HttpClient>,
    account_id: u64,
}

impl QueryCollector {
    pub fn new(http: Arc<HttpClient>, account_id: u64) -> Self {
        Self { http, account_id }
    }

    async fn fetch_event_type(&self, event_type: SampleEventType, since: Duration) -> Result<Vec<RawSample>> {
        let since_minutes = (since.as_secs() / 60).max(1);
        let nrql = NRQL_TEMPLATE.replace("{event_type}", event_type.as_str()).replace("{since_minutes}", &since_minutes.to_string());

        let query = r#"
            query($accountId: Int!, $nrql: Nrql!) {
                actor {
                    account(id: $accountId) {
                        nrql(query: $nrql) { results }
                    }
                }
            }
        "#;
        let variables = serde_json::json!({ "accountId": self.account_id, "nrql": nrql });

        let response: NrqlResponse = self.http.graphql(query, variables).await?;

        let now = Utc::now();
        let samples = response
            .data
            .actor
            .account
            .nrql
            .results
            .into_iter()
            .map(|row| row_to_sample(event_type, now, row))
            .collect();
        Ok(samples)
    }
}

fn row_to_sample(event_type: SampleEventType, now: chrono::DateTime<Utc>, row: serde_json::Map<String, serde_json::Value>) -> RawSample {
    let mut sample = RawSample::new(event_type, now);
    for (key, value) in row {
        let attr = match value {
            serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number).unwrap_or(AttrValue::Null),
            serde_json::Value::String(s) => AttrValue::Text(s),
            serde_json::Value::Bool(b) => AttrValue::Bool(b),
            serde_json::Value::Null => AttrValue::Null,
            other => AttrValue::Text(other.to_string()),
        };
        sample.attributes.insert(key, attr);
    }
    sample
}

#[async_trait]
impl Collector for QueryCollector {
    async fn fetch(&self, since: Duration) -> Result<Vec<RawSample>> {
        let mut all = Vec::new();
        for event_type in [
            SampleEventType::KafkaBrokerSample,
            SampleEventType::KafkaTopicSample,
            SampleEventType::KafkaConsumerSample,
            SampleEventType::KafkaOffsetSample,
        ] {
            let mut attempt = 0u8;
            loop {
                match self.fetch_event_type(event_type, since).await {
                    Ok(mut samples) => {
                        all.append(&mut samples);
                        break;
                    }
                    Err(e) if e.is_retryable() && attempt < MAX_FETCH_RETRIES => {
                        attempt += 1;
                        let delay = Duration::from_millis(500).saturating_mul(2u32.saturating_pow(attempt as u32 - 1)).min(Duration::from_secs(60));
                        warn!(event_type = event_type.as_str(), attempt, delay_ms = delay.as_millis() as u64, error = %e, "query collector fetch failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(all)
    }

    fn name(&self) -> &'static str {
        "query"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_to_sample_converts_scalar_types() {
        let mut row = serde_json::Map::new();
        row.insert("broker.bytesInPerSecond".to_string(), serde_json::json!(1234.5));
        row.insert("clusterName".to_string(), serde_json::json!("prod"));
        row.insert("missing".to_string(), serde_json::Value::Null);

        let sample = row_to_sample(SampleEventType::KafkaBrokerSample, Utc::now(), row);
        assert_eq!(sample.attributes.get("broker.bytesInPerSecond").unwrap().as_f64(), Some(1234.5));
        assert_eq!(sample.attributes.get("clusterName").unwrap().as_str(), Some("prod"));
        assert!(matches!(sample.attributes.get("missing"), Some(AttrValue::Null)));
    }
}
