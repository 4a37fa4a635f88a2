//! Collector contract: produce raw samples for a lookback window. Two
//! concrete adapters live in sibling modules — a query-backed collector
//! against a real backend, and a simulation collector for synthetic traffic.

pub mod query;
pub mod simulation;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::attribute::AttributeMap;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleEventType {
    KafkaBrokerSample,
    KafkaTopicSample,
    KafkaConsumerSample,
    KafkaOffsetSample,
}

impl SampleEventType {
    /// Collector-internal literal, used in NRQL `FROM` clauses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleEventType::KafkaBrokerSample => "KafkaBrokerSample",
            SampleEventType::KafkaTopicSample => "KafkaTopicSample",
            SampleEventType::KafkaConsumerSample => "KafkaConsumerSample",
            SampleEventType::KafkaOffsetSample => "KafkaOffsetSample",
        }
    }

    /// UDM shape name this sample type normalizes into. Distinct from
    /// `as_str`: the input literal never leaks into an emitted event.
    pub fn udm_event_type(&self) -> &'static str {
        match self {
            SampleEventType::KafkaBrokerSample => "MessageQueueBrokerSample",
            SampleEventType::KafkaTopicSample => "MessageQueueTopicSample",
            SampleEventType::KafkaConsumerSample => "MessageQueueConsumerSample",
            SampleEventType::KafkaOffsetSample => "MessageQueueOffsetSample",
        }
    }
}

/// An untyped attribute bag with a required event type, emitted by a collector
/// and consumed by the transformer. Not restartable within a tick: a fresh
/// `fetch` call is issued every orchestrator tick.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub event_type: SampleEventType,
    pub collected_at: DateTime<Utc>,
    pub attributes: AttributeMap,
}

impl RawSample {
    pub fn new(event_type: SampleEventType, collected_at: DateTime<Utc>) -> Self {
        Self { event_type, collected_at, attributes: AttributeMap::new() }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Fetch samples observed in the window `[now - since, now]`, bounded by
    /// a per-call timeout. Finite: the returned vector is fully materialized
    /// before this call resolves, there is no further streaming.
    async fn fetch(&self, since: Duration) -> Result<Vec<RawSample>>;

    fn name(&self) -> &'static str;
}
