//! Pipeline Orchestrator: ticks the collector → transformer → registry →
//! streamer flow, runs verification on demand, owns process lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::attribute::AttributeMap;
use crate::collector::{Collector, RawSample, SampleEventType};
use crate::config::PipelineConfig;
use crate::entity::{self, Entity, GoldenMetric, Provider};
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::registry::Registry;
use crate::relationship::{RelationshipManager, RelationshipType};
use crate::streamer::Streamer;
use crate::transformer::{self, Transformer, UdmEvent};
use crate::verification::{VerificationEngine, VerificationReport};
use crate::worker_pool::{Priority, Processor, TaskSpec, WorkerPool};

/// Per-cluster accumulator built from the per-sample task results of one
/// tick, used to derive cluster-level golden metrics once every sample in
/// the tick has been processed.
#[derive(Default)]
struct ClusterAgg {
    throughput_in: f64,
    throughput_out: f64,
    error_rate_sum: f64,
    sample_count: u32,
    healthy_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Init = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for OrchestratorState {
    fn from(v: u8) -> Self {
        match v {
            1 => OrchestratorState::Running,
            2 => OrchestratorState::Draining,
            3 => OrchestratorState::Stopped,
            _ => OrchestratorState::Init,
        }
    }
}

pub struct Orchestrator {
    cfg: Arc<PipelineConfig>,
    collector: Arc<dyn Collector>,
    transformer: Arc<Transformer>,
    registry: Arc<Registry>,
    relationships: Arc<RelationshipManager>,
    streamer: Arc<Streamer>,
    verification: Option<Arc<VerificationEngine>>,
    metrics: Arc<MetricsCollector>,
    worker_pool: Arc<WorkerPool>,
    last_verification: Arc<parking_lot::RwLock<Option<VerificationReport>>>,
    shutdown_timed_out: std::sync::atomic::AtomicBool,
    state: AtomicU8,
    tick_count: AtomicU32,
    tick_in_flight: std::sync::atomic::AtomicBool,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        collector: Arc<dyn Collector>,
        registry: Arc<Registry>,
        relationships: Arc<RelationshipManager>,
        streamer: Arc<Streamer>,
        verification: Option<Arc<VerificationEngine>>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let worker_pool = Arc::new(WorkerPool::new(cfg.worker_pool_size));
        Self {
            worker_pool,
            transformer: Arc::new(Transformer::new()),
            last_verification: Arc::new(parking_lot::RwLock::new(None)),
            shutdown_timed_out: std::sync::atomic::AtomicBool::new(false),
            cfg,
            collector,
            registry,
            relationships,
            streamer,
            verification,
            metrics,
            state: AtomicU8::new(OrchestratorState::Init as u8),
            tick_count: AtomicU32::new(0),
            tick_in_flight: std::sync::atomic::AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        OrchestratorState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: OrchestratorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the most recently completed out-of-band verification run,
    /// if any verification has run yet.
    pub fn last_verification(&self) -> Option<VerificationReport> {
        self.last_verification.read().clone()
    }

    /// True if the final streamer drain during shutdown hit its timeout
    /// before the buffered events/metrics were fully flushed.
    pub fn shutdown_timed_out(&self) -> bool {
        self.shutdown_timed_out.load(Ordering::Acquire)
    }

    /// Runs the tick loop until cancelled. Tick scheduling is
    /// non-overlapping: a tick that runs long delays the next one rather
    /// than firing concurrently; `tick.skipped` counts ticks that arrived
    /// while the previous tick was still active.
    pub async fn run(self: Arc<Self>) {
        self.set_state(OrchestratorState::Running);
        let mut interval = tokio::time::interval(self.cfg.tick_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if self.tick_in_flight.swap(true, Ordering::AcqRel) {
                        self.metrics.ticks_skipped.inc();
                        warn!("tick arrived while previous tick still active, skipping");
                        continue;
                    }
                    let result = self.run_tick().await;
                    self.tick_in_flight.store(false, Ordering::Release);
                    if let Err(e) = result {
                        self.metrics.ticks_failed.inc();
                        warn!(error = %e, "tick failed");
                    }
                }
            }
        }

        self.set_state(OrchestratorState::Draining);
        let drained = self.streamer.shutdown(self.cfg.shutdown_timeout).await;
        self.shutdown_timed_out.store(!drained, Ordering::Release);
        self.worker_pool.shutdown(self.cfg.shutdown_timeout).await;
        self.set_state(OrchestratorState::Stopped);
    }

    /// Runs one collect → normalize → synthesize → stream pass. Per-sample
    /// processing is the only concurrent work in the pipeline: each sample is
    /// dispatched as a task onto the worker pool, and this method waits for
    /// every task's result before aggregating cluster-level golden metrics.
    /// Public so integration tests can drive a real tick end to end.
    pub async fn run_tick(&self) -> Result<()> {
        let timer = self.metrics.tick_duration_seconds.start_timer();
        self.metrics.ticks_total.inc();

        let since = self.cfg.tick_interval.saturating_mul(2).min(Duration::from_secs(5 * 60));
        let samples = tokio::time::timeout(self.cfg.collector_timeout, self.collector.fetch(since)).await.map_err(|_| crate::error::PipelineError::Timeout(self.cfg.collector_timeout))??;

        let mut receivers = Vec::with_capacity(samples.len());
        for (idx, sample) in samples.iter().cloned().enumerate() {
            let transformer = self.transformer.clone();
            let registry = self.registry.clone();
            let streamer = self.streamer.clone();
            let metrics = self.metrics.clone();
            let cfg = self.cfg.clone();
            let processor: Processor = Arc::new(move || {
                let transformer = transformer.clone();
                let registry = registry.clone();
                let streamer = streamer.clone();
                let metrics = metrics.clone();
                let cfg = cfg.clone();
                let sample = sample.clone();
                Box::pin(async move { process_sample(&transformer, &registry, &streamer, &metrics, &cfg, &sample) })
            });
            let rx = self
                .worker_pool
                .submit(TaskSpec {
                    id: idx as u64,
                    processor,
                    timeout: self.cfg.collector_timeout,
                    retry_attempts: 0,
                    retry_delay: Duration::from_millis(50),
                    priority: Priority::Normal,
                })
                .await;
            receivers.push(rx);
        }

        let mut observed = HashSet::new();
        let mut cluster_aggs: std::collections::HashMap<String, ClusterAgg> = std::collections::HashMap::new();

        for rx in receivers {
            match rx.await {
                Ok(Ok(value)) => {
                    if let Some(guid) = value.get("guid").and_then(|v| v.as_str()) {
                        observed.insert(guid.to_string());
                    }
                    if let Some(cluster_name) = value.get("clusterName").and_then(|v| v.as_str()) {
                        if !cluster_name.is_empty() {
                            let agg = cluster_aggs.entry(cluster_name.to_string()).or_default();
                            agg.throughput_in += value.get("throughputIn").and_then(|v| v.as_f64()).unwrap_or(0.0);
                            agg.throughput_out += value.get("throughputOut").and_then(|v| v.as_f64()).unwrap_or(0.0);
                            agg.error_rate_sum += value.get("errorRate").and_then(|v| v.as_f64()).unwrap_or(0.0);
                            agg.sample_count += 1;
                            if value.get("healthy").and_then(|v| v.as_bool()) == Some(true) {
                                agg.healthy_count += 1;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "sample processing failed");
                    self.metrics.invalid_metrics_total.inc();
                }
                Err(_) => {
                    warn!("sample processing task dropped its result");
                }
            }
        }

        for (cluster_name, agg) in &cluster_aggs {
            let cluster_guid = crate::entity::guid_for(crate::entity::EntityType::Cluster, self.cfg.account_id, Provider::Kafka, &[cluster_name.as_str()]);
            observed.insert(cluster_guid.clone());

            let error_rate = agg.error_rate_sum / agg.sample_count.max(1) as f64;
            let availability = (agg.healthy_count as f64 / agg.sample_count.max(1) as f64) * 100.0;
            let health_score = transformer::cluster_health_score(error_rate, availability);
            let throughput_total = agg.throughput_in + agg.throughput_out;
            let now = chrono::Utc::now();

            if let Ok(mut cluster) = entity::create_cluster(self.cfg.account_id, Provider::Kafka, cluster_name, None) {
                cluster.header.golden_metrics = vec![
                    GoldenMetric { name: "health.score".to_string(), value: health_score, unit: "score".to_string(), timestamp: now },
                    GoldenMetric { name: "throughput.total".to_string(), value: throughput_total, unit: "bytesPerSecond".to_string(), timestamp: now },
                    GoldenMetric { name: "error.rate".to_string(), value: error_rate, unit: "percent".to_string(), timestamp: now },
                    GoldenMetric { name: "availability".to_string(), value: availability, unit: "percent".to_string(), timestamp: now },
                ];
                self.registry.upsert(cluster);
            }

            let catchall = UdmEvent {
                event_type: "MessageQueue",
                entity_guid: cluster_guid,
                timestamp: now,
                provider: "kafka".to_string(),
                cluster_name: Some(cluster_name.clone()),
                identity: std::collections::HashMap::new(),
                metrics: std::collections::HashMap::from([
                    ("health.score".to_string(), health_score),
                    ("throughput.total".to_string(), throughput_total),
                    ("error.rate".to_string(), error_rate),
                    ("availability".to_string(), availability),
                ]),
            };
            self.metrics.events_enqueued.with_label_values(&[catchall.event_type]).inc();
            match serde_json::to_value(&catchall) {
                Ok(payload) => {
                    if let Err(e) = self.streamer.enqueue_event(payload) {
                        warn!(error = %e, "failed to enqueue cluster event");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize cluster event"),
            }
        }

        self.reconcile_cluster_containment(&samples);

        self.registry.age_and_evict(&observed, 3);
        self.metrics.entities_registered.set(self.registry.len() as i64);

        self.streamer.flush_if_due().await;

        let tick = self.tick_count.fetch_add(1, Ordering::AcqRel) + 1;
        if tick % self.cfg.verification_every_n_ticks.max(1) == 0 {
            if let Some(engine) = &self.verification {
                let engine = engine.clone();
                let suite = self.cfg.verification_suite.clone();
                let slot = self.last_verification.clone();
                tokio::spawn(async move {
                    let report = engine.run(Some(&suite)).await;
                    info!(verdict = ?report.verdict, "out-of-band verification completed");
                    *slot.write() = Some(report);
                });
            }
        }

        timer.observe_duration();
        Ok(())
    }

    /// Reconciles CONTAINS edges from identity fields present in this
    /// tick's samples (cluster → broker/topic containment). `coordinator.id`
    /// linkage (COORDINATED_BY) is intentionally not modeled: no collector
    /// currently surfaces a consumer-group coordinator identity, so the edge
    /// stays absent rather than being synthesized from nothing.
    fn reconcile_cluster_containment(&self, samples: &[crate::collector::RawSample]) {
        for sample in samples {
            let Some(cluster_name) = sample.attributes.get_str_fallback("clusterName", &[]) else { continue };
            let cluster_guid = crate::entity::guid_for(crate::entity::EntityType::Cluster, self.cfg.account_id, Provider::Kafka, &[&cluster_name]);
            if !self.registry.contains(&cluster_guid) {
                continue;
            }
            let parts = identity_parts(sample.event_type, &cluster_name, &sample.attributes);
            let part_refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let member_guid = crate::entity::guid_for(entity_type_for(sample.event_type), self.cfg.account_id, Provider::Kafka, &part_refs);
            if self.registry.contains(&member_guid) {
                let _ = self.relationships.add_relationship(&cluster_guid, &member_guid, RelationshipType::Contains, Default::default());
            }
        }
    }
}

/// Processes one sample end to end (normalize, synthesize its entity, enqueue
/// its event) and returns a small JSON summary used to fold it into the
/// owning cluster's golden metrics once every sample in the tick has run.
/// Runs inside a worker-pool task; takes borrowed `Arc` contents rather than
/// `&Orchestrator` since the task future must be `'static`.
fn process_sample(transformer: &Transformer, registry: &Registry, streamer: &Streamer, metrics: &MetricsCollector, cfg: &PipelineConfig, sample: &RawSample) -> Result<serde_json::Value> {
    let cluster_name = sample.attributes.get_str_fallback("clusterName", &[]).unwrap_or_default();
    let parts = identity_parts(sample.event_type, &cluster_name, &sample.attributes);
    let part_refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    let guid = crate::entity::guid_for(entity_type_for(sample.event_type), cfg.account_id, Provider::Kafka, &part_refs);

    let event = transformer.normalize(sample, guid.clone(), "kafka")?;
    metrics.events_enqueued.with_label_values(&[event.event_type]).inc();

    let (golden, healthy) = golden_metrics_for(cfg, sample.event_type, &event.metrics);

    if !cluster_name.is_empty() {
        if let Ok(cluster) = entity::create_cluster(cfg.account_id, Provider::Kafka, &cluster_name, None) {
            registry.upsert(cluster);
        }
    }

    match synthesize_entity(cfg, sample.event_type, &cluster_name, sample, golden) {
        Ok(Some(entity)) => {
            registry.upsert(entity);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "entity synthesis skipped for sample"),
    }

    let throughput_in = event.metrics.get("throughput.in.bytesPerSecond").copied().unwrap_or(0.0);
    let throughput_out = event.metrics.get("throughput.out.bytesPerSecond").copied().unwrap_or(0.0);
    let error_rate = event.metrics.get("error.rate").copied().unwrap_or(0.0);

    let payload = serde_json::to_value(&event).map_err(crate::error::PipelineError::Serialization)?;
    if let Err(e) = streamer.enqueue_event(payload) {
        warn!(error = %e, "failed to enqueue event");
    }

    Ok(serde_json::json!({
        "guid": guid,
        "clusterName": cluster_name,
        "throughputIn": throughput_in,
        "throughputOut": throughput_out,
        "errorRate": error_rate,
        "healthy": healthy,
    }))
}

/// Builds the entity for one sample's identity, attaching the golden metrics
/// already computed for it. Returns `Ok(None)` when the sample carries no
/// cluster identity at all; identity validation failures (e.g. a topic
/// sample with no topic name) are surfaced to the caller to log and skip.
fn synthesize_entity(cfg: &PipelineConfig, event_type: SampleEventType, cluster_name: &str, sample: &RawSample, golden: Vec<GoldenMetric>) -> Result<Option<Entity>> {
    if cluster_name.is_empty() {
        return Ok(None);
    }
    let attrs = &sample.attributes;

    let mut entity = match event_type {
        SampleEventType::KafkaBrokerSample => {
            let broker_id = attrs.get_number_fallback("brokerId", &[]).unwrap_or(0.0) as u32;
            let hostname = attrs.get_str_fallback("hostname", &[]).unwrap_or_else(|| format!("{cluster_name}-broker-{broker_id}"));
            let port = attrs.get_number_fallback("port", &[]).unwrap_or(9092.0) as u16;
            entity::create_broker(cfg.account_id, Provider::Kafka, broker_id, &hostname, cluster_name, port)?
        }
        SampleEventType::KafkaTopicSample => {
            let Some(topic) = attrs.get_str_fallback("topic", &[]) else { return Ok(None) };
            let partitions = (attrs.get_number_fallback("partitionCount", &[]).unwrap_or(1.0).max(1.0)) as u32;
            let replication = (attrs.get_number_fallback("replicationFactor", &[]).unwrap_or(1.0).max(1.0)) as u32;
            entity::create_topic(cfg.account_id, Provider::Kafka, &topic, cluster_name, partitions, replication)?
        }
        SampleEventType::KafkaConsumerSample | SampleEventType::KafkaOffsetSample => {
            let Some(group_id) = attrs.get_str_fallback("consumerGroupId", &[]) else { return Ok(None) };
            let topics = attrs
                .get_str_fallback("topics", &[])
                .or_else(|| attrs.get_str_fallback("topic", &[]))
                .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            entity::create_consumer_group(cfg.account_id, Provider::Kafka, &group_id, cluster_name, topics)?
        }
    };

    entity.header.golden_metrics = golden;
    Ok(Some(entity))
}

/// Carries the per-entity-type golden metrics plus a `health.score` derived
/// from the corresponding health rule in [`transformer`], parameterized by
/// the configured lag/imbalance thresholds. The returned `bool` is the
/// underlying health verdict, folded into cluster-level availability.
fn golden_metrics_for(cfg: &PipelineConfig, event_type: SampleEventType, metrics: &std::collections::HashMap<String, f64>) -> (Vec<GoldenMetric>, bool) {
    let now = chrono::Utc::now();
    let mut golden = Vec::new();
    let mut push = |name: &str, value: f64, unit: &str| {
        golden.push(GoldenMetric { name: name.to_string(), value, unit: unit.to_string(), timestamp: now });
    };

    match event_type {
        SampleEventType::KafkaBrokerSample => {
            let cpu = metrics.get("cpu.percent").copied().unwrap_or(0.0);
            let mem = metrics.get("memory.percent").copied().unwrap_or(0.0);
            let latency = metrics.get("request.latency.ms").copied().unwrap_or(0.0);
            push("cpu.percent", cpu, "percent");
            push("memory.percent", mem, "percent");
            push("request.latency.ms", latency, "ms");
            push("throughput.total", metrics.get("throughput.total").copied().unwrap_or(0.0), "bytesPerSecond");
            let healthy = transformer::broker_is_healthy(cpu, mem, latency);
            push("health.score", if healthy { 100.0 } else { 40.0 }, "score");
            (golden, healthy)
        }
        SampleEventType::KafkaTopicSample => {
            let lag = metrics.get("consumer.lag").copied().unwrap_or(0.0);
            let throughput_in = metrics.get("throughput.in.bytesPerSecond").copied().unwrap_or(0.0);
            let throughput_out = metrics.get("throughput.out.bytesPerSecond").copied().unwrap_or(0.0);
            let error_rate = metrics.get("error.rate").copied().unwrap_or(0.0);
            push("consumer.lag", lag, "messages");
            push("throughput.total", metrics.get("throughput.total").copied().unwrap_or(0.0), "bytesPerSecond");
            push("error.rate", error_rate, "percent");
            let healthy = transformer::topic_is_healthy(lag, error_rate, throughput_in, throughput_out, cfg.lag_warn_threshold as f64, cfg.topic_imbalance_threshold_pct);
            push("health.score", if healthy { 100.0 } else { 40.0 }, "score");
            (golden, healthy)
        }
        SampleEventType::KafkaConsumerSample | SampleEventType::KafkaOffsetSample => {
            let total_lag = metrics.get("consumer.totalLag").copied().unwrap_or(0.0);
            let max_lag = metrics.get("consumer.maxLag").copied().unwrap_or(0.0);
            let avg_lag = metrics.get("consumer.avgLag").copied().unwrap_or(0.0);
            let members = metrics.get("consumer.memberCount").copied().unwrap_or(0.0);
            let consumption_rate = metrics.get("consumer.messageConsumptionRate").copied().unwrap_or(0.0);
            let rebalance_rate = metrics.get("consumer.rebalanceRate").copied().unwrap_or(0.0);
            push("consumer.totalLag", total_lag, "messages");
            push("consumer.maxLag", max_lag, "messages");
            push("consumer.avgLag", avg_lag, "messages");
            push("consumer.memberCount", members, "count");
            push("consumer.messageConsumptionRate", consumption_rate, "messagesPerSecond");
            push("consumer.rebalanceRate", rebalance_rate, "perHour");
            let healthy = transformer::consumer_group_is_healthy(members, max_lag, cfg.lag_crit_threshold as f64);
            push("health.score", if healthy { 100.0 } else { 40.0 }, "score");
            (golden, healthy)
        }
    }
}

/// Hierarchical GUID parts for a sample's entity, matching the identity the
/// corresponding `entity::create_*` constructor hashes into its own GUID.
fn identity_parts(event_type: SampleEventType, cluster_name: &str, attrs: &AttributeMap) -> Vec<String> {
    let mut parts = vec![cluster_name.to_string()];
    match event_type {
        SampleEventType::KafkaBrokerSample => {
            if let Some(id) = attrs.get_number_fallback("brokerId", &[]) {
                parts.push((id as u32).to_string());
            }
        }
        SampleEventType::KafkaTopicSample => {
            if let Some(topic) = attrs.get_str_fallback("topic", &[]) {
                parts.push(topic);
            }
        }
        SampleEventType::KafkaConsumerSample | SampleEventType::KafkaOffsetSample => {
            if let Some(group_id) = attrs.get_str_fallback("consumerGroupId", &[]) {
                parts.push(group_id);
            }
        }
    }
    parts
}

fn entity_type_for(event_type: crate::collector::SampleEventType) -> crate::entity::EntityType {
    use crate::collector::SampleEventType::*;
    match event_type {
        KafkaBrokerSample => crate::entity::EntityType::Broker,
        KafkaTopicSample => crate::entity::EntityType::Topic,
        KafkaConsumerSample | KafkaOffsetSample => crate::entity::EntityType::ConsumerGroup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrValue;

    #[test]
    fn state_transitions_follow_u8_encoding() {
        assert_eq!(OrchestratorState::from(0), OrchestratorState::Init);
        assert_eq!(OrchestratorState::from(1), OrchestratorState::Running);
        assert_eq!(OrchestratorState::from(2), OrchestratorState::Draining);
        assert_eq!(OrchestratorState::from(3), OrchestratorState::Stopped);
    }

    #[test]
    fn identity_parts_match_broker_constructor_guid() {
        let mut attrs = AttributeMap::new();
        attrs.insert("brokerId", AttrValue::Number(7.0));
        let parts = identity_parts(SampleEventType::KafkaBrokerSample, "prod", &attrs);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let via_identity = crate::entity::guid_for(crate::entity::EntityType::Broker, 1, Provider::Kafka, &refs);

        let broker = entity::create_broker(1, Provider::Kafka, 7, "host", "prod", 9092).unwrap();
        assert_eq!(via_identity, broker.header.guid);
    }
}
