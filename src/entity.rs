//! Typed entities modeled as a tagged variant with a shared header plus
//! per-variant payload. Shared behavior is exposed through small trait
//! capabilities (`HasGolden`, `HasLifecycle`, `Healthy`) instead of a
//! base-entity inheritance chain.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::error::{PipelineError, Result};

static CLUSTER_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Cluster,
    Broker,
    Topic,
    Queue,
    ConsumerGroup,
}

impl EntityType {
    pub fn as_guid_prefix(&self) -> &'static str {
        match self {
            EntityType::Cluster => "MESSAGE_QUEUE_CLUSTER",
            EntityType::Broker => "MESSAGE_QUEUE_BROKER",
            EntityType::Topic => "MESSAGE_QUEUE_TOPIC",
            EntityType::Queue => "MESSAGE_QUEUE_QUEUE",
            EntityType::ConsumerGroup => "MESSAGE_QUEUE_CONSUMER_GROUP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Kafka,
    RabbitMq,
    Sqs,
    AzureServiceBus,
    GooglePubSub,
    Generic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Kafka => "kafka",
            Provider::RabbitMq => "rabbitmq",
            Provider::Sqs => "sqs",
            Provider::AzureServiceBus => "azure-servicebus",
            Provider::GooglePubSub => "google-pubsub",
            Provider::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoldenMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Fields shared by every entity, regardless of variant.
#[derive(Debug, Clone)]
pub struct EntityHeader {
    pub entity_type: EntityType,
    pub guid: String,
    pub name: String,
    pub provider: Provider,
    pub account_id: u64,
    pub tags: HashMap<String, String>,
    pub golden_metrics: Vec<GoldenMetric>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Compatibility alias for `guid`. `guid` is canonical; this field is
    /// preserved only because external contracts read `entityGuid`.
    pub entity_guid: String,
}

#[derive(Debug, Clone)]
pub struct ClusterPayload {
    pub cluster_name: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrokerPayload {
    pub broker_id: u32,
    pub hostname: String,
    pub cluster_name: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TopicPayload {
    pub topic: String,
    pub cluster_name: String,
    pub partition_count: u32,
    pub replication_factor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Standard,
    Fifo,
    Priority,
    Dlq,
}

#[derive(Debug, Clone)]
pub struct QueuePayload {
    pub queue_name: String,
    pub region: Option<String>,
    pub queue_type: QueueType,
}

#[derive(Debug, Clone)]
pub struct ConsumerGroupPayload {
    pub consumer_group_id: String,
    pub cluster_name: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum EntityPayload {
    Cluster(ClusterPayload),
    Broker(BrokerPayload),
    Topic(TopicPayload),
    Queue(QueuePayload),
    ConsumerGroup(ConsumerGroupPayload),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub header: EntityHeader,
    pub payload: EntityPayload,
    /// Ticks since last observed. Reset to 0 on every upsert; the registry
    /// evicts once this crosses the configured absence threshold.
    pub absent_ticks: u32,
}

/// Entities that publish a fixed ordered set of golden metrics.
pub trait HasGolden {
    fn golden_metrics(&self) -> &[GoldenMetric];
}

impl HasGolden for Entity {
    fn golden_metrics(&self) -> &[GoldenMetric] {
        &self.header.golden_metrics
    }
}

/// Entities with a create/update/evict lifecycle driven by tick presence.
pub trait HasLifecycle {
    fn mark_observed(&mut self);
    fn mark_absent(&mut self);
    fn is_evictable(&self, max_absent_ticks: u32) -> bool;
}

impl HasLifecycle for Entity {
    fn mark_observed(&mut self) {
        self.absent_ticks = 0;
        self.header.updated_at = Utc::now();
    }

    fn mark_absent(&mut self) {
        self.absent_ticks += 1;
    }

    fn is_evictable(&self, max_absent_ticks: u32) -> bool {
        self.absent_ticks >= max_absent_ticks
    }
}

/// A stable numeric health contract, replacing duck-typed `isHealthy()`.
pub trait Healthy {
    fn health_score(&self) -> f64;
    fn is_healthy(&self) -> bool {
        self.health_score() >= 80.0
    }
}

pub fn guid_for(entity_type: EntityType, account_id: u64, provider: Provider, hierarchical_ids: &[&str]) -> String {
    let mut parts = vec![entity_type.as_guid_prefix().to_string(), account_id.to_string(), provider.as_str().to_string()];
    parts.extend(hierarchical_ids.iter().filter(|s| !s.is_empty()).map(|s| s.to_string()));
    parts.join("|")
}

fn new_header(entity_type: EntityType, guid: String, name: String, provider: Provider, account_id: u64) -> EntityHeader {
    let now = Utc::now();
    EntityHeader {
        entity_type,
        guid: guid.clone(),
        name,
        provider,
        account_id,
        tags: HashMap::new(),
        golden_metrics: Vec::new(),
        metadata: HashMap::new(),
        created_at: now,
        updated_at: now,
        entity_guid: guid,
    }
}

pub fn create_cluster(account_id: u64, provider: Provider, cluster_name: &str, region: Option<String>) -> Result<Entity> {
    if !CLUSTER_NAME_RE.is_match(cluster_name) {
        return Err(PipelineError::validation(format!("invalid cluster name: {cluster_name}")));
    }
    let guid = guid_for(EntityType::Cluster, account_id, provider, &[cluster_name]);
    Ok(Entity {
        header: new_header(EntityType::Cluster, guid, cluster_name.to_string(), provider, account_id),
        payload: EntityPayload::Cluster(ClusterPayload { cluster_name: cluster_name.to_string(), region }),
        absent_ticks: 0,
    })
}

pub fn create_broker(account_id: u64, provider: Provider, broker_id: u32, hostname: &str, cluster_name: &str, port: u16) -> Result<Entity> {
    if port == 0 {
        return Err(PipelineError::validation("port must be within [1, 65535]"));
    }
    if hostname.trim().is_empty() {
        return Err(PipelineError::validation("hostname is required"));
    }
    let guid = guid_for(EntityType::Broker, account_id, provider, &[cluster_name, &broker_id.to_string()]);
    Ok(Entity {
        header: new_header(EntityType::Broker, guid, format!("{cluster_name}-broker-{broker_id}"), provider, account_id),
        payload: EntityPayload::Broker(BrokerPayload { broker_id, hostname: hostname.to_string(), cluster_name: cluster_name.to_string(), port }),
        absent_ticks: 0,
    })
}

pub fn create_topic(account_id: u64, provider: Provider, topic: &str, cluster_name: &str, partition_count: u32, replication_factor: u32) -> Result<Entity> {
    if topic.is_empty() || topic.len() > 255 {
        return Err(PipelineError::validation("topic name must be 1..=255 chars"));
    }
    if partition_count == 0 {
        return Err(PipelineError::validation("partitionCount must be >= 1"));
    }
    if replication_factor == 0 {
        return Err(PipelineError::validation("replicationFactor must be >= 1"));
    }
    let guid = guid_for(EntityType::Topic, account_id, provider, &[cluster_name, topic]);
    Ok(Entity {
        header: new_header(EntityType::Topic, guid, topic.to_string(), provider, account_id),
        payload: EntityPayload::Topic(TopicPayload { topic: topic.to_string(), cluster_name: cluster_name.to_string(), partition_count, replication_factor }),
        absent_ticks: 0,
    })
}

pub fn create_queue(account_id: u64, provider: Provider, queue_name: &str, region: Option<String>, queue_type: QueueType) -> Result<Entity> {
    if queue_type == QueueType::Fifo && !queue_name.ends_with(".fifo") {
        return Err(PipelineError::validation("FIFO queue name must end with .fifo"));
    }
    let guid = guid_for(EntityType::Queue, account_id, provider, &[queue_name]);
    Ok(Entity {
        header: new_header(EntityType::Queue, guid, queue_name.to_string(), provider, account_id),
        payload: EntityPayload::Queue(QueuePayload { queue_name: queue_name.to_string(), region, queue_type }),
        absent_ticks: 0,
    })
}

pub fn create_consumer_group(account_id: u64, provider: Provider, consumer_group_id: &str, cluster_name: &str, topics: Vec<String>) -> Result<Entity> {
    if consumer_group_id.trim().is_empty() {
        return Err(PipelineError::validation("consumerGroupId is required"));
    }
    let guid = guid_for(EntityType::ConsumerGroup, account_id, provider, &[cluster_name, consumer_group_id]);
    Ok(Entity {
        header: new_header(EntityType::ConsumerGroup, guid, consumer_group_id.to_string(), provider, account_id),
        payload: EntityPayload::ConsumerGroup(ConsumerGroupPayload { consumer_group_id: consumer_group_id.to_string(), cluster_name: cluster_name.to_string(), topics }),
        absent_ticks: 0,
    })
}

impl Healthy for Entity {
    fn health_score(&self) -> f64 {
        self.header
            .golden_metrics
            .iter()
            .find(|m| m.name == "health.score")
            .map(|m| m.value)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_format_matches_pipe_separated_scheme() {
        let guid = guid_for(EntityType::Cluster, 12345, Provider::Kafka, &["prod"]);
        assert_eq!(guid, "MESSAGE_QUEUE_CLUSTER|12345|kafka|prod");
    }

    #[test]
    fn guid_omits_empty_parts() {
        let guid = guid_for(EntityType::Cluster, 12345, Provider::Kafka, &[""]);
        assert_eq!(guid, "MESSAGE_QUEUE_CLUSTER|12345|kafka");
    }

    #[test]
    fn guid_is_deterministic_for_equal_identity() {
        let a = guid_for(EntityType::Broker, 1, Provider::Kafka, &["c1", "7"]);
        let b = guid_for(EntityType::Broker, 1, Provider::Kafka, &["c1", "7"]);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_zero_partition_count() {
        let result = create_topic(1, Provider::Kafka, "orders", "c1", 0, 1);
        assert!(matches!(result, Err(PipelineError::ValidationFailed(_))));
    }

    #[test]
    fn rejects_fifo_queue_without_suffix() {
        let result = create_queue(1, Provider::Sqs, "orders", None, QueueType::Fifo);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_fifo_queue_with_suffix() {
        let result = create_queue(1, Provider::Sqs, "orders.fifo", None, QueueType::Fifo);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_port_zero() {
        let result = create_broker(1, Provider::Kafka, 1, "host", "c1", 0);
        assert!(result.is_err());
    }
}
