//! Simulation collector: produces synthetic Kafka telemetry from a
//! configurable topology (clusters × brokers × topics) using a seeded PRNG,
//! business-hour amplification, and anomaly injection. Used in `simulation`
//! and `hybrid` pipeline modes.

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;
use std::time::Duration;

use crate::attribute::{AttrValue, AttributeMap};
use crate::collector::{Collector, RawSample, SampleEventType};
use crate::config::SimulationConfig;
use crate::error::Result;

pub struct SimulationCollector {
    cfg: SimulationConfig,
    account_id: u64,
    rng: Mutex<ChaCha8Rng>,
}

impl SimulationCollector {
    pub fn new(cfg: SimulationConfig, account_id: u64, seed: u64) -> Self {
        Self { cfg, account_id, rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)) }
    }

    fn business_hour_multiplier(&self) -> f64 {
        if !self.cfg.business_hours {
            return 1.0;
        }
        let now = Utc::now();
        let weekday = now.weekday().num_days_from_monday(); // 0=Mon..6=Sun
        let hour = now.hour();
        if weekday < 5 && (9..17).contains(&hour) {
            1.5
        } else {
            1.0
        }
    }

    fn roll_anomaly(&self, rng: &mut ChaCha8Rng) -> bool {
        rng.gen::<f64>() < self.cfg.anomaly_rate
    }

    fn cluster_name(idx: u32) -> String {
        format!("sim-cluster-{idx}")
    }

    fn topic_name(cluster_idx: u32, topic_idx: u32) -> String {
        format!("sim-cluster-{cluster_idx}-topic-{topic_idx}")
    }

    fn broker_samples(&self, multiplier: f64) -> Vec<RawSample> {
        let mut rng = self.rng.lock().unwrap();
        let now = Utc::now();
        let mut out = Vec::new();

        for cluster_idx in 0..self.cfg.cluster_count {
            let cluster = Self::cluster_name(cluster_idx);
            for broker_idx in 0..self.cfg.brokers_per_cluster {
                let anomaly = self.roll_anomaly(&mut rng);
                let base_bytes_in: f64 = rng.gen_range(50_000.0..500_000.0) * multiplier;
                let base_bytes_out: f64 = rng.gen_range(40_000.0..450_000.0) * multiplier;
                let (cpu, latency) = if anomaly {
                    (rng.gen_range(85.0..99.0), rng.gen_range(150.0..800.0))
                } else {
                    (rng.gen_range(10.0..70.0), rng.gen_range(1.0..60.0))
                };

                let mut sample = RawSample::new(SampleEventType::KafkaBrokerSample, now);
                sample.attributes.insert("clusterName", AttrValue::Text(cluster.clone()));
                sample.attributes.insert("brokerId", AttrValue::Number(broker_idx as f64));
                sample.attributes.insert("hostname", AttrValue::Text(format!("{cluster}-broker-{broker_idx}.internal")));
                sample.attributes.insert("port", AttrValue::Number(9092.0));
                sample.attributes.insert("provider", AttrValue::Text("kafka".to_string()));
                sample.attributes.insert("accountId", AttrValue::Number(self.account_id as f64));
                sample.attributes.insert("broker.bytesInPerSecond", AttrValue::Number(base_bytes_in));
                sample.attributes.insert("broker.bytesOutPerSecond", AttrValue::Number(base_bytes_out));
                sample.attributes.insert("broker.cpuPercent", AttrValue::Number(cpu));
                sample.attributes.insert("broker.memoryPercent", AttrValue::Number(rng.gen_range(20.0..75.0)));
                sample.attributes.insert("broker.requestLatencyMs", AttrValue::Number(latency));
                out.push(sample);
            }
        }
        out
    }

    fn topic_samples(&self, multiplier: f64) -> Vec<RawSample> {
        let mut rng = self.rng.lock().unwrap();
        let now = Utc::now();
        let mut out = Vec::new();

        for cluster_idx in 0..self.cfg.cluster_count {
            let cluster = Self::cluster_name(cluster_idx);
            for topic_idx in 0..self.cfg.topics_per_cluster {
                let anomaly = self.roll_anomaly(&mut rng);
                let throughput_in = rng.gen_range(100.0..5_000.0) * multiplier;
                let throughput_out = if anomaly {
                    throughput_in * rng.gen_range(0.1..0.4) // simulate consumer lag / imbalance
                } else {
                    throughput_in * rng.gen_range(0.85..1.05)
                };
                let lag = if anomaly { rng.gen_range(10_000.0..200_000.0) } else { rng.gen_range(0.0..500.0) };

                let mut sample = RawSample::new(SampleEventType::KafkaTopicSample, now);
                sample.attributes.insert("clusterName", AttrValue::Text(cluster.clone()));
                sample.attributes.insert("topic", AttrValue::Text(Self::topic_name(cluster_idx, topic_idx)));
                sample.attributes.insert("partitionCount", AttrValue::Number(rng.gen_range(1.0..12.0).floor()));
                sample.attributes.insert("replicationFactor", AttrValue::Number(3.0));
                sample.attributes.insert("provider", AttrValue::Text("kafka".to_string()));
                sample.attributes.insert("accountId", AttrValue::Number(self.account_id as f64));
                sample.attributes.insert("topic.bytesInPerSec", AttrValue::Number(throughput_in));
                sample.attributes.insert("topic.bytesOutPerSec", AttrValue::Number(throughput_out));
                sample.attributes.insert("consumer.totalLag", AttrValue::Number(lag));
                out.push(sample);
            }
        }
        out
    }

    fn consumer_and_offset_samples(&self, multiplier: f64) -> Vec<RawSample> {
        let mut rng = self.rng.lock().unwrap();
        let now = Utc::now();
        let mut out = Vec::new();

        for cluster_idx in 0..self.cfg.cluster_count {
            let cluster = Self::cluster_name(cluster_idx);
            for topic_idx in 0..self.cfg.topics_per_cluster {
                let topic = Self::topic_name(cluster_idx, topic_idx);
                let anomaly = self.roll_anomaly(&mut rng);
                let max_lag = if anomaly { rng.gen_range(10_000.0..150_000.0) } else { rng.gen_range(0.0..2_000.0) };

                let mut consumer = RawSample::new(SampleEventType::KafkaConsumerSample, now);
                consumer.attributes.insert("clusterName", AttrValue::Text(cluster.clone()));
                consumer.attributes.insert("consumerGroupId", AttrValue::Text(format!("{topic}-group")));
                consumer.attributes.insert("topics", AttrValue::Text(topic.clone()));
                consumer.attributes.insert("provider", AttrValue::Text("kafka".to_string()));
                consumer.attributes.insert("accountId", AttrValue::Number(self.account_id as f64));
                consumer.attributes.insert("consumer.maxLag", AttrValue::Number(max_lag));
                consumer.attributes.insert("consumer.totalLag", AttrValue::Number(max_lag * rng.gen_range(1.0..3.0)));
                consumer.attributes.insert("consumer.memberCount", AttrValue::Number(rng.gen_range(1.0..8.0).floor()));
                consumer.attributes.insert("consumer.messageConsumptionRate", AttrValue::Number(rng.gen_range(10.0..500.0) * multiplier));
                out.push(consumer);

                let mut offset = RawSample::new(SampleEventType::KafkaOffsetSample, now);
                offset.attributes.insert("clusterName", AttrValue::Text(cluster.clone()));
                offset.attributes.insert("consumerGroupId", AttrValue::Text(format!("{topic}-group")));
                offset.attributes.insert("topic", AttrValue::Text(topic));
                offset.attributes.insert("partition", AttrValue::Number(rng.gen_range(0.0..12.0).floor()));
                offset.attributes.insert("provider", AttrValue::Text("kafka".to_string()));
                offset.attributes.insert("accountId", AttrValue::Number(self.account_id as f64));
                offset.attributes.insert("offset.lag", AttrValue::Number(max_lag));
                out.push(offset);
            }
        }
        out
    }
}

#[async_trait]
impl Collector for SimulationCollector {
    async fn fetch(&self, _since: Duration) -> Result<Vec<RawSample>> {
        let multiplier = self.business_hour_multiplier();
        let mut samples = self.broker_samples(multiplier);
        samples.extend(self.topic_samples(multiplier));
        samples.extend(self.consumer_and_offset_samples(multiplier));
        Ok(samples)
    }

    fn name(&self) -> &'static str {
        "simulation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SimulationConfig {
        SimulationConfig { cluster_count: 2, brokers_per_cluster: 3, topics_per_cluster: 4, anomaly_rate: 0.0, business_hours: false }
    }

    #[tokio::test]
    async fn produces_expected_sample_counts() {
        let collector = SimulationCollector::new(cfg(), 1, 42);
        let samples = collector.fetch(Duration::from_secs(300)).await.unwrap();

        let broker_count = samples.iter().filter(|s| s.event_type == SampleEventType::KafkaBrokerSample).count();
        let topic_count = samples.iter().filter(|s| s.event_type == SampleEventType::KafkaTopicSample).count();
        let consumer_count = samples.iter().filter(|s| s.event_type == SampleEventType::KafkaConsumerSample).count();
        let offset_count = samples.iter().filter(|s| s.event_type == SampleEventType::KafkaOffsetSample).count();

        assert_eq!(broker_count, 2 * 3);
        assert_eq!(topic_count, 2 * 4);
        assert_eq!(consumer_count, 2 * 4);
        assert_eq!(offset_count, 2 * 4);
    }

    #[tokio::test]
    async fn same_seed_is_deterministic() {
        let a = SimulationCollector::new(cfg(), 1, 7).fetch(Duration::from_secs(300)).await.unwrap();
        let b = SimulationCollector::new(cfg(), 1, 7).fetch(Duration::from_secs(300)).await.unwrap();

        let a_bytes = a[0].attributes.get("broker.bytesInPerSecond").unwrap().as_f64();
        let b_bytes = b[0].attributes.get("broker.bytesInPerSecond").unwrap().as_f64();
        assert_eq!(a_bytes, b_bytes);
    }

    #[tokio::test]
    async fn anomaly_rate_one_always_degrades_latency() {
        let mut c = cfg();
        c.anomaly_rate = 1.0;
        let collector = SimulationCollector::new(c, 1, 3);
        let samples = collector.fetch(Duration::from_secs(300)).await.unwrap();
        for sample in samples.iter().filter(|s| s.event_type == SampleEventType::KafkaBrokerSample) {
            let latency = sample.attributes.get("broker.requestLatencyMs").unwrap().as_f64().unwrap();
            assert!(latency >= 150.0);
        }
    }
}
