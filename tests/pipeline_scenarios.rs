//! End-to-end scenario tests exercising the collector → transformer →
//! registry → relationship flow without a live backend.

use std::sync::Arc;
use std::time::Duration;

use udm_pipeline::attribute::AttrValue;
use udm_pipeline::collector::simulation::SimulationCollector;
use udm_pipeline::collector::{Collector, RawSample, SampleEventType};
use udm_pipeline::config::SimulationConfig;
use udm_pipeline::entity::{create_broker, create_cluster, guid_for, EntityType, Provider};
use udm_pipeline::metrics::MetricsCollector;
use udm_pipeline::orchestrator::Orchestrator;
use udm_pipeline::registry::Registry;
use udm_pipeline::relationship::{RelationshipManager, RelationshipType};
use udm_pipeline::transformer::Transformer;

#[tokio::test]
async fn single_broker_tick_produces_cluster_and_broker_with_containment() {
    let sim_cfg = SimulationConfig { cluster_count: 1, brokers_per_cluster: 1, topics_per_cluster: 0, anomaly_rate: 0.0, business_hours: false };
    let collector = SimulationCollector::new(sim_cfg, 12345, 1);
    let samples = collector.fetch(Duration::from_secs(300)).await.unwrap();
    assert_eq!(samples.len(), 1);

    let registry = Registry::new();
    let relationships = RelationshipManager::new();

    let cluster = create_cluster(12345, Provider::Kafka, "sim-cluster-0", None).unwrap();
    let cluster_guid = registry.upsert(cluster);

    let broker_sample = &samples[0];
    let broker_id = broker_sample.attributes.get("brokerId").and_then(AttrValue::as_f64).unwrap() as u32;
    let broker = create_broker(12345, Provider::Kafka, broker_id, "host", "sim-cluster-0", 9092).unwrap();
    let broker_guid = registry.upsert(broker);

    relationships.add_relationship(&cluster_guid, &broker_guid, RelationshipType::Contains, Default::default()).unwrap();

    assert_eq!(registry.len(), 2);
    let related = relationships.get_related(&cluster_guid, Some(RelationshipType::Contains), 1);
    assert!(related.iter().any(|e| e.other_guid == broker_guid));
    let inverse = relationships.get_related(&broker_guid, Some(RelationshipType::ContainedIn), 1);
    assert!(inverse.iter().any(|e| e.other_guid == cluster_guid));
}

#[tokio::test]
async fn orchestrator_run_tick_emits_expected_udm_shapes() {
    let mut cfg = udm_pipeline::config::PipelineConfig::default();
    cfg.account_id = 777;
    cfg.api_key = "k".to_string();
    cfg.user_api_key = "k".to_string();
    cfg.dry_run = true;
    cfg.simulation = SimulationConfig { cluster_count: 1, brokers_per_cluster: 2, topics_per_cluster: 1, anomaly_rate: 0.0, business_hours: false };
    let cfg = Arc::new(cfg);

    let http = Arc::new(udm_pipeline::http_client::HttpClient::new(cfg.clone()).unwrap());
    let collector: Arc<dyn Collector> = Arc::new(SimulationCollector::new(cfg.simulation.clone(), cfg.account_id, cfg.account_id));
    let registry = Arc::new(Registry::new());
    let relationships = Arc::new(RelationshipManager::new());
    let streamer = Arc::new(udm_pipeline::streamer::Streamer::new(http, cfg.batch_size, cfg.flush_interval, cfg.retry_attempts, cfg.max_buffer, cfg.dry_run));
    let metrics = Arc::new(MetricsCollector::new());

    let orchestrator = Orchestrator::new(cfg.clone(), collector, registry, relationships, streamer.clone(), None, metrics);
    orchestrator.run_tick().await.unwrap();

    let events = streamer.peek_events();
    assert!(!events.is_empty());

    let allowed = ["MessageQueueBrokerSample", "MessageQueueTopicSample", "MessageQueueConsumerSample", "MessageQueueOffsetSample", "MessageQueue"];
    for event in &events {
        let event_type = event.get("eventType").and_then(|v| v.as_str()).expect("eventType present");
        assert!(allowed.contains(&event_type), "unexpected event type: {event_type}");
    }
    assert!(events.iter().any(|e| e.get("eventType").and_then(|v| v.as_str()) == Some("MessageQueue")));
}

#[test]
fn schema_drift_falls_back_to_deepest_alias() {
    let mut sample = RawSample::new(SampleEventType::KafkaBrokerSample, chrono::Utc::now());
    sample.attributes.insert("clusterName", AttrValue::Text("c1".to_string()));
    sample.attributes.insert("broker.id", AttrValue::Number(3.0));
    sample.attributes.insert("net.bytesInPerSec", AttrValue::Number(1500.0));

    let transformer = Transformer::new();
    let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();

    assert_eq!(event.metrics.get("throughput.in.bytesPerSecond"), Some(&1500.0));
}

#[test]
fn non_numeric_metric_is_dropped_and_counted_without_failing_batch() {
    let mut sample = RawSample::new(SampleEventType::KafkaBrokerSample, chrono::Utc::now());
    sample.attributes.insert("clusterName", AttrValue::Text("c1".to_string()));
    sample.attributes.insert("broker.messagesInPerSecond", AttrValue::Text("not a number".to_string()));
    sample.attributes.insert("broker.cpuPercent", AttrValue::Number(42.0));

    let transformer = Transformer::new();
    let event = transformer.normalize(&sample, "guid".to_string(), "kafka").unwrap();

    assert!(!event.metrics.contains_key("throughput.in.messagesPerSecond"));
    assert_eq!(event.metrics.get("cpu.percent"), Some(&42.0));
    assert_eq!(transformer.invalid_metric_count.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn relationship_cycle_is_rejected_and_leaves_graph_unchanged() {
    let relationships = RelationshipManager::new();
    relationships.add_relationship("a", "b", RelationshipType::Contains, Default::default()).unwrap();
    relationships.add_relationship("b", "c", RelationshipType::Contains, Default::default()).unwrap();

    let before = relationships.get_related("a", None, 3).len();
    let result = relationships.add_relationship("c", "a", RelationshipType::Contains, Default::default());
    assert!(result.is_err());

    let after = relationships.get_related("a", None, 3).len();
    assert_eq!(before, after);
}

#[test]
fn guid_is_stable_across_repeated_calls_and_distinct_per_entity() {
    let cluster_guid = guid_for(EntityType::Cluster, 12345, Provider::Kafka, &["prod"]);
    assert_eq!(cluster_guid, "MESSAGE_QUEUE_CLUSTER|12345|kafka|prod");

    let broker_guid_a = guid_for(EntityType::Broker, 12345, Provider::Kafka, &["prod", "7"]);
    let broker_guid_b = guid_for(EntityType::Broker, 12345, Provider::Kafka, &["prod", "7"]);
    assert_eq!(broker_guid_a, broker_guid_b);
    assert_ne!(cluster_guid, broker_guid_a);
}

#[tokio::test]
async fn dry_run_config_suppresses_egress_end_to_end() {
    let mut cfg = udm_pipeline::config::PipelineConfig::default();
    cfg.account_id = 1;
    cfg.api_key = "k".to_string();
    cfg.user_api_key = "k".to_string();
    cfg.dry_run = true;
    let cfg = Arc::new(cfg);

    let http = Arc::new(udm_pipeline::http_client::HttpClient::new(cfg.clone()).unwrap());
    let streamer = udm_pipeline::streamer::Streamer::new(http, cfg.batch_size, cfg.flush_interval, cfg.retry_attempts, cfg.max_buffer, cfg.dry_run);

    streamer.enqueue_event(serde_json::json!({"eventType": "MessageQueue"})).unwrap();
    streamer.flush_events().await;

    assert_eq!(streamer.stats().events_flushed.load(std::sync::atomic::Ordering::Relaxed), 1);
}
