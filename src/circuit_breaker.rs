//! Per-dependency circuit breaker, generalized from a ClickHouse-specific
//! breaker into a reusable primitive with configurable thresholds, a
//! success-threshold close requirement, and a volume floor below which
//! failures never trip the circuit.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::CircuitBreakerConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

struct Inner {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    calls_observed: AtomicU32,
    last_state_change: Mutex<Instant>,
}

/// `name` identifies the dependency for logging/metrics (events ingest,
/// metrics ingest, GraphQL verification — one breaker instance each).
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    inner: Arc<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            inner: Arc::new(Inner {
                state: AtomicU8::new(CircuitState::Closed as u8),
                consecutive_failures: AtomicU32::new(0),
                consecutive_successes: AtomicU32::new(0),
                calls_observed: AtomicU32::new(0),
                last_state_change: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        let current = CircuitState::from(self.inner.state.load(Ordering::Acquire));
        if current == CircuitState::Open {
            let last_change = *self.inner.last_state_change.lock().await;
            if last_change.elapsed() >= self.cfg.retry_timeout {
                self.transition_to(CircuitState::HalfOpen).await;
                return CircuitState::HalfOpen;
            }
        }
        current
    }

    pub fn is_healthy(&self) -> bool {
        CircuitState::from(self.inner.state.load(Ordering::Acquire)) != CircuitState::Open
    }

    /// Run `f` through the breaker. While OPEN, short-circuits immediately
    /// with `CircuitOpen` — no call is forwarded until `retry_timeout` has
    /// elapsed. While HALF_OPEN, a probe is allowed through but concurrent
    /// probes are not serialized beyond the atomics below — callers are
    /// expected to be the single streamer/http-client flush loop.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        match self.state().await {
            CircuitState::Open => Err(PipelineError::CircuitOpen(self.name.clone())),
            CircuitState::HalfOpen | CircuitState::Closed => {
                self.inner.calls_observed.fetch_add(1, Ordering::AcqRel);
                match f().await {
                    Ok(v) => {
                        self.record_success().await;
                        Ok(v)
                    }
                    Err(e) => {
                        if e.counts_as_failure() {
                            self.record_failure().await;
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    async fn record_success(&self) {
        let state = CircuitState::from(self.inner.state.load(Ordering::Acquire));
        match state {
            CircuitState::HalfOpen => {
                let successes = self.inner.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.cfg.success_threshold {
                    self.close().await;
                }
            }
            CircuitState::Closed => {
                self.inner.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let state = CircuitState::from(self.inner.state.load(Ordering::Acquire));
        match state {
            CircuitState::HalfOpen => {
                // Any failure while probing reopens immediately.
                self.open().await;
            }
            CircuitState::Closed => {
                let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                let volume = self.inner.calls_observed.load(Ordering::Acquire);
                if failures >= self.cfg.failure_threshold && volume >= self.cfg.volume_threshold {
                    self.open().await;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn open(&self) {
        self.transition_to(CircuitState::Open).await;
        self.inner.consecutive_successes.store(0, Ordering::Release);
    }

    async fn close(&self) {
        self.transition_to(CircuitState::Closed).await;
        self.inner.consecutive_failures.store(0, Ordering::Release);
        self.inner.consecutive_successes.store(0, Ordering::Release);
        self.inner.calls_observed.store(0, Ordering::Release);
    }

    async fn transition_to(&self, state: CircuitState) {
        self.inner.state.store(state as u8, Ordering::Release);
        *self.inner.last_state_change.lock().await = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            retry_timeout: Duration::from_millis(50),
            volume_threshold: 3,
            timeout: Duration::from_secs(1),
        }
    }

    async fn failing_call() -> Result<(), PipelineError> {
        Err(PipelineError::BackendUnavailable("boom".into()))
    }

    async fn ok_call() -> Result<(), PipelineError> {
        Ok(())
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures_above_volume_floor() {
        let cb = CircuitBreaker::new("events", cfg());
        for _ in 0..3 {
            let _ = cb.call(|| failing_call()).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        // 4th call short-circuits without invoking the HTTP layer.
        let result = cb.call(|| ok_call()).await;
        assert!(matches!(result, Err(PipelineError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn volume_floor_prevents_premature_open() {
        let mut c = cfg();
        c.failure_threshold = 1;
        c.volume_threshold = 10;
        let cb = CircuitBreaker::new("events", c);
        let _ = cb.call(|| failing_call()).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_requires_consecutive_successes_to_close() {
        let cb = CircuitBreaker::new("events", cfg());
        for _ in 0..3 {
            let _ = cb.call(|| failing_call()).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        // One successful probe does not close the circuit.
        let _ = cb.call(|| ok_call()).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        let _ = cb.call(|| ok_call()).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("events", cfg());
        for _ in 0..3 {
            let _ = cb.call(|| failing_call()).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        let _ = cb.call(|| failing_call()).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
