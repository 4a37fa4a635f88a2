//! The configuration record consumed by the pipeline.
//!
//! Loading this from a file or the environment is explicitly out of scope —
//! an external collaborator builds a [`PipelineConfig`] and hands it to
//! [`crate::orchestrator::Orchestrator::new`]. [`PipelineConfig::validate`]
//! performs the fail-fast checks that turn a malformed record into
//! `ConfigInvalid` before anything downstream touches it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Us,
    Eu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Simulation,
    Infrastructure,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub retry_timeout: Duration,
    pub volume_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            retry_timeout: Duration::from_secs(30),
            volume_threshold: 5,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub cluster_count: u32,
    pub brokers_per_cluster: u32,
    pub topics_per_cluster: u32,
    pub anomaly_rate: f64,
    pub business_hours: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cluster_count: 1,
            brokers_per_cluster: 3,
            topics_per_cluster: 5,
            anomaly_rate: 0.05,
            business_hours: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub account_id: u64,
    pub api_key: String,
    pub user_api_key: String,
    pub region: Region,
    pub mode: Mode,

    pub tick_interval: Duration,
    pub collector_timeout: Duration,
    pub since_window: Duration,

    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_attempts: u8,
    pub max_buffer: usize,
    pub shutdown_timeout: Duration,

    pub worker_pool_size: usize,

    pub simulation: SimulationConfig,

    pub lag_warn_threshold: u64,
    pub lag_crit_threshold: u64,
    pub topic_imbalance_threshold_pct: f64,

    pub circuit: CircuitBreakerConfig,

    pub verification_suite: Vec<String>,
    pub verification_every_n_ticks: u32,

    pub timestamp_skew: Duration,

    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            account_id: 0,
            api_key: String::new(),
            user_api_key: String::new(),
            region: Region::Us,
            mode: Mode::Simulation,
            tick_interval: Duration::from_secs(30),
            collector_timeout: Duration::from_secs(45),
            since_window: Duration::from_secs(5 * 60),
            batch_size: 100,
            flush_interval: Duration::from_secs(10),
            retry_attempts: 3,
            max_buffer: 10_000,
            shutdown_timeout: Duration::from_secs(30),
            worker_pool_size: num_cpus::get().max(2),
            simulation: SimulationConfig::default(),
            lag_warn_threshold: 10_000,
            lag_crit_threshold: 10_000,
            topic_imbalance_threshold_pct: 50.0,
            circuit: CircuitBreakerConfig::default(),
            verification_suite: vec!["master".to_string()],
            verification_every_n_ticks: 10,
            timestamp_skew: Duration::from_secs(15 * 60),
            dry_run: false,
        }
    }
}

impl PipelineConfig {
    /// Fail-fast validation. A malformed config is `ConfigInvalid` and
    /// aborts startup before any component is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.account_id == 0 {
            return Err(PipelineError::config("accountId is required"));
        }
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::config("apiKey is required"));
        }
        if self.user_api_key.trim().is_empty() {
            return Err(PipelineError::config("userApiKey is required"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batchSize must be > 0"));
        }
        if self.max_buffer < self.batch_size {
            return Err(PipelineError::config("maxBuffer must be >= batchSize"));
        }
        if self.worker_pool_size == 0 {
            return Err(PipelineError::config("workerPoolSize must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.simulation.anomaly_rate) {
            return Err(PipelineError::config("anomalyRate must be within [0,1]"));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(PipelineError::config("circuit.failureThreshold must be > 0"));
        }
        Ok(())
    }

    pub fn graphql_endpoint(&self) -> &'static str {
        match self.region {
            Region::Us => "https://api.newrelic.com/graphql",
            Region::Eu => "https://api.eu.newrelic.com/graphql",
        }
    }

    pub fn events_endpoint(&self) -> String {
        match self.region {
            Region::Us => format!("https://insights-collector.newrelic.com/v1/accounts/{}/events", self.account_id),
            Region::Eu => format!("https://insights-collector.eu01.nr-data.net/v1/accounts/{}/events", self.account_id),
        }
    }

    pub fn metrics_endpoint(&self) -> &'static str {
        match self.region {
            Region::Us => "https://metric-api.newrelic.com/metric/v1",
            Region::Eu => "https://metric-api.eu.newrelic.com/metric/v1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_invalid_without_identity() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        let mut cfg = PipelineConfig::default();
        cfg.account_id = 12345;
        cfg.api_key = "ingest-key".into();
        cfg.user_api_key = "query-key".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_anomaly_rate_out_of_range() {
        let mut cfg = PipelineConfig::default();
        cfg.account_id = 1;
        cfg.api_key = "k".into();
        cfg.user_api_key = "k".into();
        cfg.simulation.anomaly_rate = 1.5;
        assert!(matches!(cfg.validate(), Err(PipelineError::ConfigInvalid(_))));
    }
}
