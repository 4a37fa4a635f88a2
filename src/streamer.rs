//! Batches UDM events and metrics onto independent channels, flushing on
//! size or interval, retrying with backoff, and tracking delivery stats.
//! At-least-once delivery: duplicate detection is left to the backend
//! (idempotent on GUID + timestamp).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{PipelineError, Result};
use crate::http_client::HttpClient;

pub type DeadLetterCallback = Arc<dyn Fn(Vec<serde_json::Value>) + Send + Sync>;

#[derive(Debug, Default)]
pub struct StreamerStats {
    pub events_enqueued: AtomicU64,
    pub events_flushed: AtomicU64,
    pub events_failed: AtomicU64,
    pub metrics_enqueued: AtomicU64,
    pub metrics_flushed: AtomicU64,
    pub metrics_failed: AtomicU64,
}

struct BufferedChannel {
    items: std::sync::Mutex<Vec<(serde_json::Value, Instant)>>,
}

impl BufferedChannel {
    fn new() -> Self {
        Self { items: std::sync::Mutex::new(Vec::new()) }
    }

    fn push(&self, item: serde_json::Value) -> usize {
        let mut guard = self.items.lock().unwrap();
        guard.push((item, Instant::now()));
        guard.len()
    }

    fn should_flush(&self, batch_size: usize, flush_interval: Duration) -> bool {
        let guard = self.items.lock().unwrap();
        if guard.is_empty() {
            return false;
        }
        guard.len() >= batch_size || guard.first().is_some_and(|(_, t)| t.elapsed() >= flush_interval)
    }

    fn drain(&self) -> Vec<serde_json::Value> {
        let mut guard = self.items.lock().unwrap();
        guard.drain(..).map(|(v, _)| v).collect()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Non-destructive view of buffered items, for tests and introspection.
    fn snapshot(&self) -> Vec<serde_json::Value> {
        self.items.lock().unwrap().iter().map(|(v, _)| v.clone()).collect()
    }
}

pub struct Streamer {
    http: Arc<HttpClient>,
    events: Arc<BufferedChannel>,
    metrics: Arc<BufferedChannel>,
    stats: Arc<StreamerStats>,
    batch_size: usize,
    flush_interval: Duration,
    retry_attempts: u8,
    max_buffer: usize,
    dead_letter: Option<DeadLetterCallback>,
    shutting_down: std::sync::atomic::AtomicBool,
    dry_run: bool,
}

impl Streamer {
    pub fn new(http: Arc<HttpClient>, batch_size: usize, flush_interval: Duration, retry_attempts: u8, max_buffer: usize, dry_run: bool) -> Self {
        Self {
            http,
            events: Arc::new(BufferedChannel::new()),
            metrics: Arc::new(BufferedChannel::new()),
            stats: Arc::new(StreamerStats::default()),
            batch_size,
            flush_interval,
            retry_attempts,
            max_buffer,
            dead_letter: None,
            shutting_down: std::sync::atomic::AtomicBool::new(false),
            dry_run,
        }
    }

    pub fn with_dead_letter(mut self, cb: DeadLetterCallback) -> Self {
        self.dead_letter = Some(cb);
        self
    }

    pub fn stats(&self) -> &StreamerStats {
        &self.stats
    }

    /// Buffered events not yet flushed, without draining them. For tests and
    /// diagnostics only.
    pub fn peek_events(&self) -> Vec<serde_json::Value> {
        self.events.snapshot()
    }

    /// Non-blocking unless the buffer is at capacity, in which case the
    /// caller is rejected with `BufferFull` (reject policy; block policy is
    /// left to a future caller-side retry loop).
    pub fn enqueue_event(&self, event: serde_json::Value) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PipelineError::Cancelled);
        }
        if self.events.len() >= self.max_buffer {
            return Err(PipelineError::BufferFull("events buffer full".to_string()));
        }
        self.events.push(event);
        self.stats.events_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn enqueue_metric(&self, metric: serde_json::Value) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PipelineError::Cancelled);
        }
        if self.metrics.len() >= self.max_buffer {
            return Err(PipelineError::BufferFull("metrics buffer full".to_string()));
        }
        self.metrics.push(metric);
        self.stats.metrics_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush whichever channel(s) have crossed their size/interval trigger.
    /// A flush with an empty buffer is a no-op.
    pub async fn flush_if_due(&self) {
        if self.events.should_flush(self.batch_size, self.flush_interval) {
            self.flush_events().await;
        }
        if self.metrics.should_flush(self.batch_size, self.flush_interval) {
            self.flush_metrics().await;
        }
    }

    pub async fn flush_events(&self) {
        let batch = self.events.drain();
        if batch.is_empty() {
            return;
        }
        if self.dry_run {
            debug!(count = batch.len(), "dry run: suppressing event egress");
            self.stats.events_flushed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            return;
        }
        if self.send_with_retry(&batch, |b| {
            let http = self.http.clone();
            let b = b.to_vec();
            async move { http.post_events(&b).await }
        }).await {
            self.stats.events_flushed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        } else {
            self.stats.events_failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            if let Some(cb) = &self.dead_letter {
                cb(batch);
            }
        }
    }

    pub async fn flush_metrics(&self) {
        let batch = self.metrics.drain();
        if batch.is_empty() {
            return;
        }
        if self.dry_run {
            debug!(count = batch.len(), "dry run: suppressing metric egress");
            self.stats.metrics_flushed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            return;
        }
        if self.send_with_retry(&batch, |b| {
            let http = self.http.clone();
            let b = b.to_vec();
            async move { http.post_metrics(&b).await }
        }).await {
            self.stats.metrics_flushed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        } else {
            self.stats.metrics_failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
            if let Some(cb) = &self.dead_letter {
                cb(batch);
            }
        }
    }

    /// Retry budget is per-batch: `retryDelay * 2^attempt`, capped at 60s.
    /// Exhaustion returns false; the caller surfaces the batch to the
    /// dead-letter callback.
    async fn send_with_retry<F, Fut>(&self, batch: &[serde_json::Value], send: F) -> bool
    where
        F: Fn(&[serde_json::Value]) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut attempt = 0u8;
        loop {
            match send(batch).await {
                Ok(()) => return true,
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    attempt += 1;
                    let delay = Duration::from_millis(500).saturating_mul(2u32.saturating_pow(attempt as u32 - 1)).min(Duration::from_secs(60));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "batch send failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(error = %e, batch_size = batch.len(), "batch send exhausted retries");
                    return false;
                }
            }
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Stops accepting new work, drains both channels respecting the retry
    /// budget, bounded by `shutdown_timeout`. Returns `true` if both channels
    /// drained before the timeout, `false` if the timeout was hit first.
    pub async fn shutdown(&self, shutdown_timeout: Duration) -> bool {
        self.begin_shutdown();
        tokio::time::timeout(shutdown_timeout, async {
            self.flush_events().await;
            self.flush_metrics().await;
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_http_client() -> Arc<HttpClient> {
        let mut cfg = crate::config::PipelineConfig::default();
        cfg.account_id = 1;
        cfg.api_key = "k".to_string();
        cfg.user_api_key = "k".to_string();
        Arc::new(HttpClient::new(Arc::new(cfg)).unwrap())
    }

    #[tokio::test]
    async fn dry_run_suppresses_egress_but_counts_flushed() {
        let streamer = Streamer::new(test_http_client(), 10, Duration::from_secs(10), 3, 100, true);
        streamer.enqueue_event(serde_json::json!({"eventType": "MessageQueue"})).unwrap();
        streamer.flush_events().await;
        assert_eq!(streamer.stats().events_flushed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn flush_with_empty_buffer_is_noop() {
        let streamer = Streamer::new(test_http_client(), 10, Duration::from_secs(10), 3, 100, true);
        streamer.flush_events().await;
        assert_eq!(streamer.stats().events_flushed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn buffer_full_rejects_enqueue() {
        let streamer = Streamer::new(test_http_client(), 10, Duration::from_secs(10), 3, 2, true);
        streamer.enqueue_event(serde_json::json!({})).unwrap();
        streamer.enqueue_event(serde_json::json!({})).unwrap();
        let result = streamer.enqueue_event(serde_json::json!({}));
        assert!(matches!(result, Err(PipelineError::BufferFull(_))));
    }

    #[tokio::test]
    async fn shutdown_rejects_further_enqueues() {
        let streamer = Streamer::new(test_http_client(), 10, Duration::from_secs(10), 3, 100, true);
        assert!(streamer.shutdown(Duration::from_secs(1)).await);
        let result = streamer.enqueue_event(serde_json::json!({}));
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
