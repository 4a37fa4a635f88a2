//! Version-tolerant field mapping from raw samples to UDM events. Pure
//! function: no I/O, no shared state. Enforces name normalization, numeric
//! coercion, unit derivation, and per-entity health-score computation.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

use crate::attribute::AttrValue;
use crate::collector::{RawSample, SampleEventType};
use crate::error::{PipelineError, Result};

const MAX_METRIC_MAGNITUDE: f64 = 1e15;

/// A flat UDM event: `eventType`, `entityGuid`, `timestamp`, `provider`,
/// `clusterName`, identity fields, and a flat numeric-metric mapping.
#[derive(Debug, Clone, Serialize)]
pub struct UdmEvent {
    #[serde(rename = "eventType")]
    pub event_type: &'static str,
    #[serde(rename = "entityGuid")]
    pub entity_guid: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub provider: String,
    #[serde(rename = "clusterName", skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(flatten)]
    pub identity: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub metrics: HashMap<String, f64>,
}

struct FieldMapping {
    canonical: &'static str,
    primary: &'static str,
    fallbacks: &'static [&'static str],
    /// Whether this metric participates in the [0, 1e15] rate/count range
    /// check and non-negativity check.
    non_negative_rate: bool,
}

const BROKER_FIELDS: &[FieldMapping] = &[
    FieldMapping { canonical: "throughput.in.bytesPerSecond", primary: "broker.bytesInPerSecond", fallbacks: &["broker_bytesInPerSecond", "bytesInPerSecond", "kafka.server.BrokerTopicMetrics.BytesInPerSec", "net.bytesInPerSec"], non_negative_rate: true },
    FieldMapping { canonical: "throughput.out.bytesPerSecond", primary: "broker.bytesOutPerSecond", fallbacks: &["broker_bytesOutPerSecond", "bytesOutPerSecond", "kafka.server.BrokerTopicMetrics.BytesOutPerSec", "net.bytesOutPerSec"], non_negative_rate: true },
    FieldMapping { canonical: "throughput.in.messagesPerSecond", primary: "broker.messagesInPerSecond", fallbacks: &["broker_messagesInPerSecond", "messagesInPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "throughput.out.messagesPerSecond", primary: "broker.messagesOutPerSecond", fallbacks: &["broker_messagesOutPerSecond", "messagesOutPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "cpu.percent", primary: "broker.cpuPercent", fallbacks: &["broker_cpuPercent", "cpuPercent"], non_negative_rate: false },
    FieldMapping { canonical: "memory.percent", primary: "broker.memoryPercent", fallbacks: &["broker_memoryPercent", "memoryPercent"], non_negative_rate: false },
    FieldMapping { canonical: "request.latency.ms", primary: "broker.requestLatencyMs", fallbacks: &["broker_requestLatencyMs", "requestLatencyMs"], non_negative_rate: false },
    FieldMapping { canonical: "request.produce.latency.ms", primary: "broker.produceRequestLatencyMs", fallbacks: &["broker_produceRequestLatencyMs"], non_negative_rate: false },
    FieldMapping { canonical: "request.fetch.latency.ms", primary: "broker.fetchRequestLatencyMs", fallbacks: &["broker_fetchRequestLatencyMs"], non_negative_rate: false },
    FieldMapping { canonical: "request.handler.idle.percent", primary: "broker.requestHandlerAvgIdlePercent", fallbacks: &["requestHandlerAvgIdlePercent"], non_negative_rate: false },
    FieldMapping { canonical: "network.handler.idle.percent", primary: "broker.networkProcessorAvgIdlePercent", fallbacks: &["networkProcessorAvgIdlePercent"], non_negative_rate: false },
    FieldMapping { canonical: "partition.count", primary: "broker.partitionCount", fallbacks: &["partitionCount"], non_negative_rate: true },
    FieldMapping { canonical: "partition.leader.count", primary: "broker.leaderPartitionCount", fallbacks: &["leaderPartitionCount"], non_negative_rate: true },
    FieldMapping { canonical: "partition.underReplicated.count", primary: "broker.underReplicatedPartitionCount", fallbacks: &["underReplicatedPartitionCount"], non_negative_rate: true },
    FieldMapping { canonical: "partition.offline.count", primary: "broker.offlinePartitionsCount", fallbacks: &["offlinePartitionsCount"], non_negative_rate: true },
    FieldMapping { canonical: "isr.shrinks.rate", primary: "broker.isrShrinksPerSecond", fallbacks: &["isrShrinksPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "isr.expands.rate", primary: "broker.isrExpandsPerSecond", fallbacks: &["isrExpandsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "replication.bytesInPerSecond", primary: "broker.replicationBytesInPerSecond", fallbacks: &["replicationBytesInPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "replication.bytesOutPerSecond", primary: "broker.replicationBytesOutPerSecond", fallbacks: &["replicationBytesOutPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "log.flush.rate", primary: "broker.logFlushRate", fallbacks: &["logFlushRate"], non_negative_rate: true },
    FieldMapping { canonical: "log.flush.latency.ms", primary: "broker.logFlushLatencyMs", fallbacks: &["logFlushLatencyMs"], non_negative_rate: false },
    FieldMapping { canonical: "error.rate", primary: "broker.errorsPerSecond", fallbacks: &["errorsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "request.produce.rate", primary: "broker.produceRequestsPerSecond", fallbacks: &["produceRequestsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "request.fetch.rate", primary: "broker.fetchRequestsPerSecond", fallbacks: &["fetchRequestsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "connections.count", primary: "broker.connectionCount", fallbacks: &["connectionCount"], non_negative_rate: true },
    FieldMapping { canonical: "gc.pause.ms", primary: "broker.gcPauseMs", fallbacks: &["gcPauseMs"], non_negative_rate: false },
    FieldMapping { canonical: "disk.used.bytes", primary: "broker.diskUsedBytes", fallbacks: &["diskUsedBytes"], non_negative_rate: true },
];

const TOPIC_FIELDS: &[FieldMapping] = &[
    FieldMapping { canonical: "throughput.in.bytesPerSecond", primary: "topic.bytesInPerSec", fallbacks: &["topic_bytesInPerSec", "bytesInPerSec"], non_negative_rate: true },
    FieldMapping { canonical: "throughput.out.bytesPerSecond", primary: "topic.bytesOutPerSec", fallbacks: &["topic_bytesOutPerSec", "bytesOutPerSec"], non_negative_rate: true },
    FieldMapping { canonical: "throughput.in.messagesPerSecond", primary: "topic.messagesInPerSec", fallbacks: &["messagesInPerSec"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.lag", primary: "consumer.totalLag", fallbacks: &["consumer_totalLag", "totalLag"], non_negative_rate: true },
    FieldMapping { canonical: "partition.count", primary: "partitionCount", fallbacks: &[], non_negative_rate: false },
    FieldMapping { canonical: "replication.factor", primary: "replicationFactor", fallbacks: &[], non_negative_rate: false },
    FieldMapping { canonical: "error.rate", primary: "topic.errorsPerSecond", fallbacks: &["errorsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "request.produce.rate", primary: "topic.produceRequestsPerSecond", fallbacks: &["produceRequestsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "request.fetch.rate", primary: "topic.fetchRequestsPerSecond", fallbacks: &["fetchRequestsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "retention.bytes", primary: "topic.retentionBytes", fallbacks: &["retentionBytes"], non_negative_rate: true },
    FieldMapping { canonical: "retention.ms", primary: "topic.retentionMs", fallbacks: &["retentionMs"], non_negative_rate: true },
    FieldMapping { canonical: "size.bytes", primary: "topic.sizeBytes", fallbacks: &["sizeBytes"], non_negative_rate: true },
    FieldMapping { canonical: "partition.underReplicated.count", primary: "topic.underReplicatedPartitions", fallbacks: &["underReplicatedPartitions"], non_negative_rate: true },
    FieldMapping { canonical: "replica.minInSync", primary: "topic.minInSyncReplicas", fallbacks: &["minInSyncReplicas"], non_negative_rate: true },
    FieldMapping { canonical: "producer.count", primary: "topic.producerCount", fallbacks: &["producerCount"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.count", primary: "topic.consumerCount", fallbacks: &["consumerCount"], non_negative_rate: true },
    FieldMapping { canonical: "compaction.rate", primary: "topic.logCompactionRate", fallbacks: &["logCompactionRate"], non_negative_rate: true },
    FieldMapping { canonical: "purgatory.produce.size", primary: "topic.produceRequestPurgatorySize", fallbacks: &["produceRequestPurgatorySize"], non_negative_rate: true },
    FieldMapping { canonical: "purgatory.fetch.size", primary: "topic.fetchRequestPurgatorySize", fallbacks: &["fetchRequestPurgatorySize"], non_negative_rate: true },
    FieldMapping { canonical: "bytesRejected.rate", primary: "topic.bytesRejectedPerSec", fallbacks: &["bytesRejectedPerSec"], non_negative_rate: true },
    FieldMapping { canonical: "message.conversion.rate", primary: "topic.messageConversionsPerSec", fallbacks: &["messageConversionsPerSec"], non_negative_rate: true },
];

const CONSUMER_FIELDS: &[FieldMapping] = &[
    FieldMapping { canonical: "consumer.totalLag", primary: "consumer.totalLag", fallbacks: &["consumer_totalLag", "totalLag"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.maxLag", primary: "consumer.maxLag", fallbacks: &["consumer_maxLag", "maxLag"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.avgLag", primary: "consumer.avgLag", fallbacks: &["consumer_avgLag", "avgLag"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.memberCount", primary: "consumer.memberCount", fallbacks: &["consumer_memberCount", "memberCount"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.messageConsumptionRate", primary: "consumer.messageConsumptionRate", fallbacks: &["consumer_messageConsumptionRate"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.rebalanceRate", primary: "consumer.rebalanceRatePerHour", fallbacks: &["rebalanceRatePerHour"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.bytesConsumedRate", primary: "consumer.bytesConsumedPerSecond", fallbacks: &["bytesConsumedPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.recordsConsumedRate", primary: "consumer.recordsConsumedPerSecond", fallbacks: &["recordsConsumedPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.fetchRate", primary: "consumer.fetchRequestsPerSecond", fallbacks: &["fetchRequestsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.fetchLatency.ms", primary: "consumer.fetchLatencyAvgMs", fallbacks: &["fetchLatencyAvgMs"], non_negative_rate: false },
    FieldMapping { canonical: "consumer.commitRate", primary: "consumer.offsetCommitsPerSecond", fallbacks: &["offsetCommitsPerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.commitLatency.ms", primary: "consumer.commitLatencyAvgMs", fallbacks: &["commitLatencyAvgMs"], non_negative_rate: false },
    FieldMapping { canonical: "consumer.assignedPartitions", primary: "consumer.assignedPartitionCount", fallbacks: &["assignedPartitionCount"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.joinRate", primary: "consumer.joinRatePerHour", fallbacks: &["joinRatePerHour"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.syncRate", primary: "consumer.syncRatePerHour", fallbacks: &["syncRatePerHour"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.heartbeatRate", primary: "consumer.heartbeatRatePerSecond", fallbacks: &["heartbeatRatePerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.pollRate", primary: "consumer.pollRatePerSecond", fallbacks: &["pollRatePerSecond"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.recordsLagMax", primary: "consumer.recordsLagMax", fallbacks: &["recordsLagMax"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.fetchSizeAvg.bytes", primary: "consumer.fetchSizeAvgBytes", fallbacks: &["fetchSizeAvgBytes"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.fetchSizeMax.bytes", primary: "consumer.fetchSizeMaxBytes", fallbacks: &["fetchSizeMaxBytes"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.recordsPerRequestAvg", primary: "consumer.recordsPerRequestAvg", fallbacks: &["recordsPerRequestAvg"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.bytesPerRequestAvg", primary: "consumer.bytesPerRequestAvg", fallbacks: &["bytesPerRequestAvg"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.partitionsWithLag", primary: "consumer.partitionsWithLagCount", fallbacks: &["partitionsWithLagCount"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.consumptionIdleTime.ms", primary: "consumer.consumptionIdleTimeMs", fallbacks: &["consumptionIdleTimeMs"], non_negative_rate: true },
    FieldMapping { canonical: "consumer.queueTimeAvg.ms", primary: "consumer.queueTimeAvgMs", fallbacks: &["queueTimeAvgMs"], non_negative_rate: false },
    FieldMapping { canonical: "consumer.requestRate", primary: "consumer.requestRatePerSecond", fallbacks: &["requestRatePerSecond"], non_negative_rate: true },
];

const OFFSET_FIELDS: &[FieldMapping] = &[
    FieldMapping { canonical: "offset.lag", primary: "offset.lag", fallbacks: &["offset_lag", "lag"], non_negative_rate: true },
    FieldMapping { canonical: "partition.id", primary: "partition", fallbacks: &[], non_negative_rate: false },
    FieldMapping { canonical: "offset.consumerOffset", primary: "offset.consumerOffset", fallbacks: &["consumerOffset"], non_negative_rate: true },
    FieldMapping { canonical: "offset.logEndOffset", primary: "offset.logEndOffset", fallbacks: &["logEndOffset", "producerOffset"], non_negative_rate: true },
    FieldMapping { canonical: "offset.commitRate", primary: "offset.commitsPerSecond", fallbacks: &["offset_commitsPerSecond"], non_negative_rate: true },
];

pub struct Transformer {
    pub invalid_metric_count: std::sync::atomic::AtomicU64,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self { invalid_metric_count: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn normalize(&self, sample: &RawSample, entity_guid: String, provider: &str) -> Result<UdmEvent> {
        let fields = match sample.event_type {
            SampleEventType::KafkaBrokerSample => BROKER_FIELDS,
            SampleEventType::KafkaTopicSample => TOPIC_FIELDS,
            SampleEventType::KafkaConsumerSample => CONSUMER_FIELDS,
            SampleEventType::KafkaOffsetSample => OFFSET_FIELDS,
        };

        let mut metrics = HashMap::new();
        for mapping in fields {
            if let Some(attr) = sample.attributes.get_fallback(mapping.primary, mapping.fallbacks) {
                match self.coerce(mapping, attr) {
                    Some(value) => {
                        if value != 0.0 && !value.is_nan() {
                            metrics.insert(mapping.canonical.to_string(), value);
                        }
                    }
                    None => {
                        self.invalid_metric_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            }
        }

        apply_derived_metrics(&mut metrics);
        apply_byte_unit_mirrors(&mut metrics);

        let cluster_name = sample.attributes.get_str_fallback("clusterName", &["cluster_name"]);

        let mut identity: HashMap<String, serde_json::Value> = HashMap::new();
        for key in ["brokerId", "hostname", "port", "topic", "partitionCount", "replicationFactor", "consumerGroupId", "topics", "partition", "queueName", "queueType"] {
            if let Some(attr) = sample.attributes.get(key) {
                if let Some(v) = attr_to_json(attr) {
                    identity.insert(key.to_string(), v);
                }
            }
        }

        Ok(UdmEvent {
            event_type: sample.event_type.udm_event_type(),
            entity_guid,
            timestamp: sample.collected_at,
            provider: provider.to_string(),
            cluster_name,
            identity,
            metrics,
        })
    }

    /// Parse, range-check, and sign-check one metric field. Returns `None`
    /// (and bumps the invalid-metric counter) for NaN/non-finite values or
    /// out-of-range values; those are dropped with surrounding metrics
    /// unaffected.
    fn coerce(&self, mapping: &FieldMapping, attr: &AttrValue) -> Option<f64> {
        let value = attr.as_f64()?;
        if !value.is_finite() {
            return None;
        }
        if mapping.non_negative_rate {
            if value < 0.0 || value.abs() > MAX_METRIC_MAGNITUDE {
                return None;
            }
        }
        Some(value)
    }
}

fn attr_to_json(attr: &AttrValue) -> Option<serde_json::Value> {
    match attr {
        AttrValue::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
        AttrValue::Text(s) => Some(serde_json::Value::String(s.clone())),
        AttrValue::Bool(b) => Some(serde_json::Value::Bool(*b)),
        AttrValue::Timestamp(t) => Some(serde_json::Value::String(t.to_rfc3339())),
        AttrValue::Null => None,
    }
}

fn apply_derived_metrics(metrics: &mut HashMap<String, f64>) {
    if let (Some(&inbound), Some(&outbound)) = (metrics.get("throughput.in.bytesPerSecond"), metrics.get("throughput.out.bytesPerSecond")) {
        metrics.insert("throughput.total".to_string(), inbound + outbound);
    }
}

/// Any `*.bytes*` field gets a parallel `.mb` / `.gb` mirror.
fn apply_byte_unit_mirrors(metrics: &mut HashMap<String, f64>) {
    let byte_fields: Vec<(String, f64)> = metrics
        .iter()
        .filter(|(k, _)| k.contains("bytes"))
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    for (key, value) in byte_fields {
        let mb_key = key.replace("bytes", "mb");
        let gb_key = key.replace("bytes", "gb");
        metrics.insert(mb_key, value / (1024.0 * 1024.0));
        metrics.insert(gb_key, value / (1024.0 * 1024.0 * 1024.0));
    }
}

/// Cluster health rule: healthScore >= 80 ∧ errorRate < 5 ∧ availability >= 95.
pub fn cluster_health_score(error_rate: f64, availability: f64) -> f64 {
    if error_rate < 5.0 && availability >= 95.0 {
        (100.0 - error_rate).min(100.0).max(0.0)
    } else {
        (availability - error_rate).clamp(0.0, 79.0)
    }
}

/// Broker health rule: cpu < 80 ∧ mem < 80 ∧ latency < 100ms.
pub fn broker_is_healthy(cpu_percent: f64, memory_percent: f64, latency_ms: f64) -> bool {
    cpu_percent < 80.0 && memory_percent < 80.0 && latency_ms < 100.0
}

/// Topic health rule: lag <= lagThreshold ∧ errorRate <= 5 ∧ in/out imbalance <= imbalanceThresholdPct.
pub fn topic_is_healthy(lag: f64, error_rate: f64, throughput_in: f64, throughput_out: f64, lag_threshold: f64, imbalance_threshold_pct: f64) -> bool {
    if lag > lag_threshold || error_rate > 5.0 {
        return false;
    }
    if throughput_in <= 0.0 {
        return true;
    }
    let imbalance_pct = ((throughput_in - throughput_out).abs() / throughput_in) * 100.0;
    imbalance_pct <= imbalance_threshold_pct
}

/// Consumer group health rule: members > 0 ∧ maxLag < lagThreshold.
pub fn consumer_group_is_healthy(member_count: f64, max_lag: f64, lag_threshold: f64) -> bool {
    member_count > 0.0 && max_lag < lag_threshold
}

/// Queue health rule: depth <= typeThreshold ∧ processingTime <= 5000ms ∧
/// out/in >= 10% once inbound throughput is nonzero.
pub fn queue_is_healthy(depth: f64, processing_time_ms: f64, throughput_in: f64, throughput_out: f64, depth_threshold: f64) -> bool {
    if depth > depth_threshold || processing_time_ms > 5000.0 {
        return false;
    }
    if throughput_in <= 0.0 {
        return true;
    }
    throughput_out / throughput_in >= 0.10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrValue;
    use crate::collector::RawSample;

    fn broker_sample_with(key: &str, value: AttrValue) -> RawSample {
        let mut sample = RawSample::new(SampleEventType::KafkaBrokerSample, Utc::now());
        sample.attributes.insert("clusterName", AttrValue::Text("c1".to_string()));
        sample.attributes.insert(key, value);
        sample
    }

    #[test]
    fn schema_drift_uses_deepest_fallback() {
        let sample = broker_sample_with("net.bytesInPerSec", AttrValue::Number(1500.0));
        let transformer = Transformer::new();
        let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();
        assert_eq!(event.metrics.get("throughput.in.bytesPerSecond"), Some(&1500.0));
        assert_eq!(transformer.invalid_metric_count.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn non_numeric_string_metric_is_dropped_and_counted() {
        let sample = broker_sample_with("broker.messagesInPerSecond", AttrValue::Text("not a number".to_string()));
        let transformer = Transformer::new();
        let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();
        assert!(!event.metrics.contains_key("throughput.in.messagesPerSecond"));
        assert_eq!(transformer.invalid_metric_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn nan_and_infinite_metrics_are_dropped() {
        let sample = broker_sample_with("broker.bytesInPerSecond", AttrValue::Number(f64::NAN));
        let transformer = Transformer::new();
        let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();
        assert!(!event.metrics.contains_key("throughput.in.bytesPerSecond"));
        assert_eq!(transformer.invalid_metric_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn derived_throughput_total_sums_in_and_out() {
        let mut sample = RawSample::new(SampleEventType::KafkaBrokerSample, Utc::now());
        sample.attributes.insert("broker.bytesInPerSecond", AttrValue::Number(100.0));
        sample.attributes.insert("broker.bytesOutPerSecond", AttrValue::Number(50.0));
        let transformer = Transformer::new();
        let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();
        assert_eq!(event.metrics.get("throughput.total"), Some(&150.0));
    }

    #[test]
    fn byte_metrics_get_mb_and_gb_mirrors() {
        let mut sample = RawSample::new(SampleEventType::KafkaBrokerSample, Utc::now());
        sample.attributes.insert("broker.bytesInPerSecond", AttrValue::Number(1024.0 * 1024.0));
        let transformer = Transformer::new();
        let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();
        let mirror_key = "throughput.in.bytesPerSecond".replace("bytes", "mb");
        assert!((event.metrics.get(&mirror_key).copied().unwrap() - 1.0).abs() < 0.001);
    }

    #[test]
    fn topic_imbalance_threshold_is_configurable() {
        assert!(topic_is_healthy(100.0, 0.0, 1000.0, 600.0, 10_000.0, 50.0));
        assert!(!topic_is_healthy(100.0, 0.0, 1000.0, 400.0, 10_000.0, 50.0));
    }
}
