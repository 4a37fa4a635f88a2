//! Thin binary entry point. Configuration loading (file/env/CLI parsing) is
//! out of scope for this crate — operators embedding the pipeline are
//! expected to construct a `PipelineConfig` themselves; this binary reads a
//! handful of environment variables just to have something runnable.

use std::sync::Arc;

use udm_pipeline::config::{Mode, PipelineConfig};
use udm_pipeline::error::PipelineError;
use udm_pipeline::verification::{master_predicate, VerificationEngine};

/// A lightweight actor/user probe used only to confirm the configured API
/// keys are accepted before the tick loop starts spending its retry budget
/// on every batch. Non-auth failures (network blips, a slow backend) are
/// logged and swallowed — only `AuthFailed` aborts startup.
async fn probe_auth(http: &udm_pipeline::http_client::HttpClient) -> Result<(), PipelineError> {
    match http.graphql::<serde_json::Value>("{ actor { user { id } } }", serde_json::json!({})).await {
        Ok(_) => Ok(()),
        Err(e @ PipelineError::AuthFailed(_)) => Err(e),
        Err(e) => {
            tracing::warn!(error.kind = e.kind(), error.message = %e, "startup auth probe failed non-fatally, continuing");
            Ok(())
        }
    }
}

fn config_from_env() -> Result<PipelineConfig, PipelineError> {
    let mut cfg = PipelineConfig::default();
    cfg.account_id = std::env::var("UDM_ACCOUNT_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PipelineError::config("UDM_ACCOUNT_ID must be set"))?;
    cfg.api_key = std::env::var("UDM_API_KEY").map_err(|_| PipelineError::config("UDM_API_KEY must be set"))?;
    cfg.user_api_key = std::env::var("UDM_USER_API_KEY").map_err(|_| PipelineError::config("UDM_USER_API_KEY must be set"))?;
    if std::env::var("UDM_MODE").as_deref() == Ok("infrastructure") {
        cfg.mode = Mode::Infrastructure;
    }
    cfg.dry_run = std::env::var("UDM_DRY_RUN").as_deref() == Ok("true");
    Ok(cfg)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cfg = match config_from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error.kind = e.kind(), error.message = %e, "invalid configuration");
            return std::process::ExitCode::from(2);
        }
    };

    if let Err(e) = cfg.validate() {
        tracing::error!(error.kind = e.kind(), error.message = %e, "invalid configuration");
        return std::process::ExitCode::from(2);
    }

    let cfg = Arc::new(cfg);
    let metrics = Arc::new(udm_pipeline::metrics::MetricsCollector::new());

    let http = match udm_pipeline::http_client::HttpClient::new(cfg.clone()) {
        Ok(http) => Arc::new(http),
        Err(e) => {
            tracing::error!(error.kind = e.kind(), error.message = %e, "failed to build http client");
            return std::process::ExitCode::from(2);
        }
    };

    if !cfg.dry_run {
        if let Err(e) = probe_auth(&http).await {
            tracing::error!(error.kind = e.kind(), error.message = %e, "backend rejected configured credentials");
            return std::process::ExitCode::from(3);
        }
    }

    let collector: Arc<dyn udm_pipeline::collector::Collector> = match cfg.mode {
        Mode::Simulation | Mode::Hybrid => Arc::new(udm_pipeline::collector::simulation::SimulationCollector::new(cfg.simulation.clone(), cfg.account_id, cfg.account_id)),
        Mode::Infrastructure => Arc::new(udm_pipeline::collector::query::QueryCollector::new(http.clone(), cfg.account_id)),
    };

    let registry = Arc::new(udm_pipeline::registry::Registry::new());
    let relationships = Arc::new(udm_pipeline::relationship::RelationshipManager::new());
    let streamer = Arc::new(udm_pipeline::streamer::Streamer::new(http.clone(), cfg.batch_size, cfg.flush_interval, cfg.retry_attempts, cfg.max_buffer, cfg.dry_run));

    let master = master_predicate("SELECT count(*) AS sampleCount FROM MessageQueueBrokerSample, MessageQueueTopicSample WHERE clusterName IS NOT NULL SINCE 10 MINUTES AGO".to_string());
    let verification = Arc::new(VerificationEngine::new(http.clone(), master, Vec::new()));

    let orchestrator = Arc::new(udm_pipeline::orchestrator::Orchestrator::new(cfg.clone(), collector, registry, relationships, streamer, Some(verification), metrics));

    let cancel = orchestrator.cancellation_token();
    let mut run_handle = tokio::spawn(orchestrator.clone().run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            cancel.cancel();
        }
        result = &mut run_handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "orchestrator task panicked");
            }
        }
    }

    if !run_handle.is_finished() {
        let _ = run_handle.await;
    }

    if orchestrator.shutdown_timed_out() {
        tracing::error!("shutdown timed out before buffered events/metrics fully drained");
        return std::process::ExitCode::from(4);
    }

    if let Some(report) = orchestrator.last_verification() {
        let code = report.exit_code();
        if code != 0 {
            tracing::error!(verdict = ?report.verdict, "critical verification failed");
            return std::process::ExitCode::from(code as u8);
        }
    }

    std::process::ExitCode::SUCCESS
}
