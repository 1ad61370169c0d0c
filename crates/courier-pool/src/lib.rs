//! Per-tenant bounded worker pools.
//!
//! # Purpose
//! Each tenant gets an isolated pool: its own bounded FIFO queue and its own
//! group of worker tasks. One tenant saturating its queue or burning its
//! workers on a slow endpoint cannot consume capacity belonging to another
//! tenant.
//!
//! # Execution model
//! A pool is a bounded `mpsc` queue of type-erased jobs plus an elastic set
//! of worker tasks between `core_workers` and `max_workers`. Workers share
//! the receiver behind an async mutex; surplus workers retire after
//! `idle_keep_alive` without work. Every executed job observes the logical
//! name of the worker running it (`Partner-<tenant>-Worker-<n>`), which flows
//! into outcome records and operational assertions.
//!
//! # Load shedding
//! When the queue is full, the submitter executes the job synchronously on
//! its own context (caller-runs). This backpressures the producer without
//! dropping messages.
//!
//! # Caller responsibility
//! Re-entrant submission is permitted, but a job that blocks on another
//! submission for the *same* tenant while holding the tenant's only worker
//! can deadlock itself. Pipelines must run as a single job.
pub mod registry;

pub use registry::{PoolConfigSource, PoolRegistry, StaticPoolConfig};

use courier_core::{Error, TenantConfig};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Sizing parameters for one tenant pool, extracted from `TenantConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub idle_keep_alive: Duration,
}

impl From<&TenantConfig> for PoolConfig {
    fn from(cfg: &TenantConfig) -> Self {
        Self {
            core_workers: cfg.core_workers,
            max_workers: cfg.max_workers.max(cfg.core_workers),
            queue_capacity: cfg.queue_capacity.max(1),
            idle_keep_alive: cfg.idle_keep_alive(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&TenantConfig::default())
    }
}

/// Point-in-time view of one tenant pool.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub business_unit: String,
    pub active_count: usize,
    pub pool_size: usize,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub queue_depth: usize,
    pub completed_count: u64,
    pub shutting_down: bool,
}

type Job = Box<dyn FnOnce(String) -> BoxFuture<'static, ()> + Send + 'static>;

/// Future handed back by `submit`, resolving with the task's outcome.
///
/// A submission whose job is discarded during shutdown resolves with
/// `ShuttingDown`; nothing is silently dropped.
pub struct Submission<T> {
    tenant_id: String,
    inner: SubmissionInner<T>,
}

enum SubmissionInner<T> {
    Rejected(Option<Error>),
    Pending(oneshot::Receiver<Result<T, Error>>),
}

impl<T> Submission<T> {
    fn rejected(tenant_id: &str, err: Error) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            inner: SubmissionInner::Rejected(Some(err)),
        }
    }

    fn pending(tenant_id: &str, rx: oneshot::Receiver<Result<T, Error>>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            inner: SubmissionInner::Pending(rx),
        }
    }
}

impl<T> Future for Submission<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            SubmissionInner::Rejected(err) => {
                Poll::Ready(Err(err.take().expect("submission polled after completion")))
            }
            SubmissionInner::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // The job was dropped without running: the pool was cancelled
                // or drained out from under it.
                Poll::Ready(Err(_)) => {
                    Poll::Ready(Err(Error::ShuttingDown(this.tenant_id.clone())))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

struct PoolShared {
    active: AtomicUsize,
    workers: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    shutting_down: AtomicBool,
    next_worker: AtomicUsize,
    cancel: CancellationToken,
    handles: Mutex<VecDeque<JoinHandle<()>>>,
}

/// One tenant's pool. Created through the registry; independent in queue,
/// workers, and failure accounting from every other tenant.
pub struct TenantPool {
    tenant_id: String,
    cfg: PoolConfig,
    tx: mpsc::Sender<Job>,
    rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    shared: Arc<PoolShared>,
}

impl TenantPool {
    pub fn new(tenant_id: &str, cfg: PoolConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity);
        let pool = Arc::new(Self {
            tenant_id: tenant_id.to_string(),
            cfg,
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            shared: Arc::new(PoolShared {
                active: AtomicUsize::new(0),
                workers: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                next_worker: AtomicUsize::new(1),
                cancel: CancellationToken::new(),
                handles: Mutex::new(VecDeque::new()),
            }),
        });
        for _ in 0..pool.cfg.core_workers {
            pool.spawn_worker(None);
        }
        tracing::info!(
            tenant = %pool.tenant_id,
            core = pool.cfg.core_workers,
            max = pool.cfg.max_workers,
            queue = pool.cfg.queue_capacity,
            "tenant pool created"
        );
        pool
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Schedules `task` on this pool. The task receives the logical name of
    /// the worker executing it.
    ///
    /// Queue-full submissions run the task inline on the calling context
    /// before returning; the submission still resolves with the outcome.
    pub async fn submit<T, F, Fut>(&self, task: F) -> Submission<T>
    where
        T: Send + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Submission::rejected(
                &self.tenant_id,
                Error::ShuttingDown(self.tenant_id.clone()),
            );
        }
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move |worker: String| {
            Box::pin(async move {
                let outcome = task(worker).await;
                let _ = result_tx.send(outcome);
            })
        });
        match self.tx.try_send(job) {
            Ok(()) => {
                self.shared.queued.fetch_add(1, Ordering::SeqCst);
                self.maybe_grow();
                Submission::pending(&self.tenant_id, result_rx)
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                // Caller-runs fallback: execute on the submitter. Deliberate
                // load shedding that backpressures the producer instead of
                // dropping the message.
                let lane = format!("Partner-{}-Caller", self.tenant_id);
                tracing::debug!(tenant = %self.tenant_id, "queue full, caller-runs fallback");
                job(lane).await;
                self.shared.completed.fetch_add(1, Ordering::SeqCst);
                Submission::pending(&self.tenant_id, result_rx)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Submission::rejected(
                &self.tenant_id,
                Error::ShuttingDown(self.tenant_id.clone()),
            ),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            business_unit: self.tenant_id.clone(),
            active_count: self.shared.active.load(Ordering::SeqCst),
            pool_size: self.shared.workers.load(Ordering::SeqCst),
            core_pool_size: self.cfg.core_workers,
            maximum_pool_size: self.cfg.max_workers,
            queue_depth: self.shared.queued.load(Ordering::SeqCst),
            completed_count: self.shared.completed.load(Ordering::SeqCst),
            shutting_down: self.shared.shutting_down.load(Ordering::SeqCst),
        }
    }

    /// Drains queued work for up to `grace`, then cancels whatever is left.
    /// Jobs that never ran resolve their submissions with `ShuttingDown`.
    pub async fn shutdown(&self, grace: Duration) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(tenant = %self.tenant_id, grace_ms = grace.as_millis() as u64, "pool draining");
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.shared.queued.load(Ordering::SeqCst) == 0
                && self.shared.active.load(Ordering::SeqCst) == 0
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.shared.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.shared.handles.lock().expect("pool handles lock");
            guard.drain(..).collect()
        };
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        // Fail queued jobs that never ran; dropping the job drops its result
        // channel, which resolves the submission as ShuttingDown.
        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok(job) = rx.try_recv() {
            drop(job);
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
        }
        self.shared.active.store(0, Ordering::SeqCst);
        self.shared.workers.store(0, Ordering::SeqCst);
        tracing::info!(tenant = %self.tenant_id, "pool shut down");
    }

    fn spawn_worker(&self, keep_alive: Option<Duration>) {
        let n = self.shared.next_worker.fetch_add(1, Ordering::SeqCst);
        let name = courier_core::worker_name(&self.tenant_id, n);
        self.shared.workers.fetch_add(1, Ordering::SeqCst);
        let rx = Arc::clone(&self.rx);
        let shared = Arc::clone(&self.shared);
        let cancel = self.shared.cancel.clone();
        let handle = tokio::spawn(worker_loop(name, rx, shared, keep_alive, cancel));
        let mut guard = self.shared.handles.lock().expect("pool handles lock");
        guard.push_back(handle);
        // Completed handles accumulate slowly as surplus workers retire.
        guard.retain(|h| !h.is_finished());
    }

    // Spawns a surplus worker when the backlog exceeds what the current
    // worker group can absorb, up to `max_workers`.
    fn maybe_grow(&self) {
        let workers = self.shared.workers.load(Ordering::SeqCst);
        if workers >= self.cfg.max_workers {
            return;
        }
        let active = self.shared.active.load(Ordering::SeqCst);
        let queued = self.shared.queued.load(Ordering::SeqCst);
        if queued + active > workers {
            self.spawn_worker(Some(self.cfg.idle_keep_alive));
        }
    }
}

async fn worker_loop(
    name: String,
    rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    shared: Arc<PoolShared>,
    keep_alive: Option<Duration>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker = %name, "worker started");
    loop {
        let job = {
            let mut guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                guard = rx.lock() => guard,
            };
            match keep_alive {
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    job = guard.recv() => job,
                },
                Some(idle) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    timed = tokio::time::timeout(idle, guard.recv()) => match timed {
                        Ok(job) => job,
                        // Surplus worker idled out.
                        Err(_) => break,
                    },
                },
            }
        };
        let Some(job) = job else { break };
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::SeqCst);
        job(name.clone()).await;
        shared.active.fetch_sub(1, Ordering::SeqCst);
        shared.completed.fetch_add(1, Ordering::SeqCst);
    }
    shared.workers.fetch_sub(1, Ordering::SeqCst);
    tracing::debug!(worker = %name, "worker stopped");
}
