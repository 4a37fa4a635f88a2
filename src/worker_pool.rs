//! Bounded-concurrency worker pool: a fixed number of tasks draining a
//! priority-aware queue, with per-task retry/backoff and per-pool metrics.
//! Worker pools are the only place in the crate where concurrent task
//! execution happens — everything else is synchronized explicitly.

use std::collections::BinaryHeap;
use std::cmp::Ordering as CmpOrdering;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use tracing::{debug, warn};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal = 0,
    High = 1,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, PipelineError>> + Send>>;
pub type Processor = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

pub struct TaskSpec {
    pub id: u64,
    pub processor: Processor,
    pub timeout: Duration,
    pub retry_attempts: u8,
    pub retry_delay: Duration,
    pub priority: Priority,
}

struct QueuedTask {
    spec: TaskSpec,
    responder: oneshot::Sender<Result<serde_json::Value, PipelineError>>,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.spec.priority == other.spec.priority && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first; within a priority, earlier sequence number
        // (FIFO) first — so reverse seq for a max-heap to behave as min-heap
        // on sequence.
        self.spec.priority.cmp(&other.spec.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub queued: AtomicUsize,
    pub active: AtomicUsize,
    pub completed: AtomicU64,
    pub errored: AtomicU64,
    pub total_processing_ms: AtomicU64,
    pub peak_concurrency: AtomicUsize,
}

impl PoolMetrics {
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            total_processing_ms: self.total_processing_ms.load(Ordering::Relaxed),
            peak_concurrency: self.peak_concurrency.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolMetricsSnapshot {
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    pub errored: u64,
    pub total_processing_ms: u64,
    pub peak_concurrency: usize,
}

struct SharedQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    next_seq: AtomicU64,
    shutting_down: std::sync::atomic::AtomicBool,
}

pub struct WorkerPool {
    queue: Arc<SharedQueue>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<PoolMetrics>,
    workers: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let queue = Arc::new(SharedQueue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        });
        let semaphore = Arc::new(Semaphore::new(size));
        let metrics = Arc::new(PoolMetrics::default());

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let queue = queue.clone();
            let semaphore = semaphore.clone();
            let metrics = metrics.clone();
            workers.push(tokio::spawn(Self::worker_loop(worker_id, queue, semaphore, metrics)));
        }

        Self { queue, semaphore, metrics, workers: std::sync::Mutex::new(workers) }
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Submit a task; the returned future resolves with the processor's
    /// result once retries are exhausted or it succeeds.
    pub async fn submit(&self, spec: TaskSpec) -> oneshot::Receiver<Result<serde_json::Value, PipelineError>> {
        let (tx, rx) = oneshot::channel();
        let seq = self.queue.next_seq.fetch_add(1, Ordering::Relaxed);
        let task = QueuedTask { spec, responder: tx, seq };
        {
            let mut heap = self.queue.heap.lock().await;
            heap.push(task);
            self.metrics.queued.store(heap.len(), Ordering::Relaxed);
        }
        self.queue.notify.notify_one();
        rx
    }

    async fn worker_loop(_worker_id: usize, queue: Arc<SharedQueue>, semaphore: Arc<Semaphore>, metrics: Arc<PoolMetrics>) {
        loop {
            let task = loop {
                {
                    let mut heap = queue.heap.lock().await;
                    if let Some(t) = heap.pop() {
                        metrics.queued.store(heap.len(), Ordering::Relaxed);
                        break Some(t);
                    }
                }
                if queue.shutting_down.load(Ordering::Relaxed) {
                    return;
                }
                queue.notify.notified().await;
                if queue.shutting_down.load(Ordering::Relaxed) {
                    // Drain whatever remains before exiting.
                    let mut heap = queue.heap.lock().await;
                    if heap.is_empty() {
                        return;
                    }
                    if let Some(t) = heap.pop() {
                        break Some(t);
                    }
                }
            };
            let Some(task) = task else { return };

            let _permit = match semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let active = metrics.active.fetch_add(1, Ordering::Relaxed) + 1;
            metrics.peak_concurrency.fetch_max(active, Ordering::Relaxed);

            let start = std::time::Instant::now();
            let result = Self::run_with_retry(&task.spec).await;
            metrics.active.fetch_sub(1, Ordering::Relaxed);
            metrics.total_processing_ms.fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);

            match &result {
                Ok(_) => {
                    metrics.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    metrics.errored.fetch_add(1, Ordering::Relaxed);
                }
            }

            let _ = task.responder.send(result);
        }
    }

    async fn run_with_retry(spec: &TaskSpec) -> Result<serde_json::Value, PipelineError> {
        let mut attempt = 0u8;
        loop {
            let fut = (spec.processor)();
            let outcome = tokio::time::timeout(spec.timeout, fut).await;
            match outcome {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) if e.is_retryable() && attempt < spec.retry_attempts => {
                    attempt += 1;
                    let delay = spec.retry_delay.saturating_mul(2u32.saturating_pow(attempt as u32 - 1));
                    let delay = delay.min(Duration::from_secs(60));
                    debug!(task_id = spec.id, attempt, delay_ms = delay.as_millis() as u64, "worker pool retrying task");
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempt < spec.retry_attempts => {
                    attempt += 1;
                    warn!(task_id = spec.id, attempt, "worker pool task timed out, retrying");
                    tokio::time::sleep(spec.retry_delay).await;
                }
                Err(_) => return Err(PipelineError::Timeout(spec.timeout)),
            }
        }
    }

    /// Wait up to `t` for the queue to drain, then cancel queued work and
    /// stop workers. Safe to call through a shared reference (e.g. an
    /// `Arc<WorkerPool>`) since it no longer consumes the pool.
    pub async fn shutdown(&self, t: Duration) {
        self.queue.shutting_down.store(true, Ordering::Relaxed);
        self.queue.notify.notify_waiters();

        let _ = tokio::time::timeout(t, async {
            loop {
                if self.queue.heap.lock().await.is_empty() && self.metrics.active.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        // Reject anything left queued.
        let mut heap = self.queue.heap.lock().await;
        while let Some(task) = heap.pop() {
            let _ = task.responder.send(Err(PipelineError::Cancelled));
        }
        drop(heap);

        for handle in self.workers.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn ok_processor() -> Processor {
        Arc::new(|| Box::pin(async { Ok(serde_json::json!({"ok": true})) }))
    }

    #[tokio::test]
    async fn executes_submitted_task() {
        let pool = WorkerPool::new(2);
        let rx = pool
            .submit(TaskSpec {
                id: 1,
                processor: ok_processor(),
                timeout: Duration::from_secs(1),
                retry_attempts: 0,
                retry_delay: Duration::from_millis(1),
                priority: Priority::Normal,
            })
            .await;
        let result = rx.await.unwrap();
        assert!(result.is_ok());
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn high_priority_runs_before_normal() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Saturate the single worker first so both submissions queue up.
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate2 = gate.clone();
        let blocker: Processor = Arc::new(move || {
            let gate = gate2.clone();
            Box::pin(async move {
                gate.notified().await;
                Ok(serde_json::json!(null))
            })
        });
        let _blocking_rx = pool
            .submit(TaskSpec { id: 0, processor: blocker, timeout: Duration::from_secs(5), retry_attempts: 0, retry_delay: Duration::from_millis(1), priority: Priority::Normal })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let order_a = order.clone();
        let normal: Processor = Arc::new(move || {
            let order = order_a.clone();
            Box::pin(async move {
                order.lock().await.push("normal");
                Ok(serde_json::json!(null))
            })
        });
        let order_b = order.clone();
        let high: Processor = Arc::new(move || {
            let order = order_b.clone();
            Box::pin(async move {
                order.lock().await.push("high");
                Ok(serde_json::json!(null))
            })
        });

        let _n = pool.submit(TaskSpec { id: 1, processor: normal, timeout: Duration::from_secs(1), retry_attempts: 0, retry_delay: Duration::from_millis(1), priority: Priority::Normal }).await;
        let _h = pool.submit(TaskSpec { id: 2, processor: high, timeout: Duration::from_secs(1), retry_attempts: 0, retry_delay: Duration::from_millis(1), priority: Priority::High }).await;

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let observed = order.lock().await.clone();
        assert_eq!(observed, vec!["high", "normal"]);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn retries_until_exhausted_then_errors() {
        let pool = WorkerPool::new(1);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_c = attempts.clone();
        let processor: Processor = Arc::new(move || {
            let attempts = attempts_c.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::BackendUnavailable("down".into()))
            })
        });
        let rx = pool
            .submit(TaskSpec { id: 1, processor, timeout: Duration::from_secs(1), retry_attempts: 2, retry_delay: Duration::from_millis(1), priority: Priority::Normal })
            .await;
        let result = rx.await.unwrap();
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        pool.shutdown(Duration::from_secs(1)).await;
    }
}
