/*!
 * Job dispatcher.
 *
 * A fixed set of workers pulls jobs from one unbounded channel, so
 * `submit` never blocks. Each job runs in its own task so a panicking job
 * cannot take a worker down. Task-level retries are timer tasks owned by the
 * dispatcher: they do not hold a worker while they wait, and `shutdown`
 * cancels the ones that have not fired yet.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Job, JobOutcome, TaskPipeline};

/// Something that can run a job to an outcome
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run `job` once
    async fn run(&self, job: Job) -> JobOutcome;
}

#[async_trait]
impl JobRunner for TaskPipeline {
    async fn run(&self, job: Job) -> JobOutcome {
        TaskPipeline::run(self, job).await
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Jobs accepted by `submit`, re-submissions included
    pub submitted: usize,
    /// Jobs refused because shutdown had begun
    pub rejected: usize,
    /// Runs that completed
    pub completed: usize,
    /// Runs that ended in a terminal failure (or a panic)
    pub abandoned: usize,
    /// Re-submissions scheduled
    pub retries_scheduled: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    rejected: AtomicUsize,
    completed: AtomicUsize,
    abandoned: AtomicUsize,
    retries_scheduled: AtomicUsize,
    // Runs that returned, whatever the outcome
    finished: AtomicUsize,
}

struct DispatcherInner {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    shutting_down: AtomicBool,
    pending_retries: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_retry_id: AtomicU64,
    counters: Counters,
}

impl DispatcherInner {
    fn submit(&self, job: Job) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!("[{}] Rejected: dispatcher is shutting down", job.task_id);
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            warn!("[{}] Rejected: dispatcher is closed", job.task_id);
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return false;
        };

        let task_id = job.task_id.clone();
        match sender.send(job) {
            Ok(()) => {
                debug!("[{}] Queued", task_id);
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(_) => {
                warn!("[{}] Rejected: job queue is closed", task_id);
                self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, job: Job, delay: Duration) {
        // Checked under the lock `shutdown` drains, so no timer outlives the drain
        let mut pending = self.pending_retries.lock();
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!("[{}] Retry dropped: dispatcher is shutting down", job.task_id);
            return;
        }

        let id = self.next_retry_id.fetch_add(1, Ordering::SeqCst);
        self.counters.retries_scheduled.fetch_add(1, Ordering::SeqCst);
        info!(
            "[{}] Re-submitting in {:.1}s (retry {})",
            job.task_id,
            delay.as_secs_f64(),
            job.retry_count
        );

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Submit first: the job stays visible to `is_idle` throughout
            inner.submit(job);
            inner.pending_retries.lock().remove(&id);
        });
        pending.insert(id, handle);
    }

    fn record(self: &Arc<Self>, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed { .. } => {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
            }
            JobOutcome::Abandoned { .. } => {
                self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
            }
            JobOutcome::Retry { job, delay } => self.schedule_retry(job, delay),
        }
    }
}

/// Bounded pool of workers running jobs
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker_count", &self.worker_count)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Dispatcher {
    /// Start `worker_count` workers running jobs with `runner`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R: JobRunner>(runner: Arc<R>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let inner = Arc::new(DispatcherInner {
            sender: Mutex::new(Some(sender)),
            shutting_down: AtomicBool::new(false),
            pending_retries: Mutex::new(HashMap::new()),
            next_retry_id: AtomicU64::new(0),
            counters: Counters::default(),
        });

        let workers = (0..worker_count)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let runner = Arc::clone(&runner);
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    debug!("Worker {} started", worker_id);
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else {
                            break;
                        };

                        let task_id = job.task_id.clone();
                        let runner = Arc::clone(&runner);
                        match tokio::spawn(async move { runner.run(job).await }).await {
                            Ok(outcome) => inner.record(outcome),
                            Err(e) => {
                                error!("[{}] Job crashed on worker {}: {}", task_id, worker_id, e);
                                inner.counters.abandoned.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        inner.counters.finished.fetch_add(1, Ordering::SeqCst);
                    }
                    debug!("Worker {} stopped", worker_id);
                })
            })
            .collect();

        info!("Dispatcher started with {} workers", worker_count);

        Self {
            inner,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Queue a job. Returns `false` once shutdown has begun.
    pub fn submit(&self, job: Job) -> bool {
        self.inner.submit(job)
    }

    /// Stop accepting jobs, cancel pending retries and wait for queued and running jobs.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Dispatcher shutdown already in progress");
            return;
        }

        let cancelled: Vec<JoinHandle<()>> = self.inner.pending_retries.lock().drain().map(|(_, h)| h).collect();
        if !cancelled.is_empty() {
            warn!("Cancelling {} pending retries", cancelled.len());
        }
        for handle in cancelled {
            handle.abort();
        }

        // Closing the channel lets workers drain what is queued and exit
        self.inner.sender.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        info!("Waiting for {} workers to finish", workers.len());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Worker terminated abnormally: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Dispatcher stopped: {} completed, {} abandoned, {} rejected",
            stats.completed, stats.abandoned, stats.rejected
        );
    }

    /// Whether `shutdown` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of retries waiting on their timer
    pub fn pending_retry_count(&self) -> usize {
        self.inner.pending_retries.lock().len()
    }

    /// Whether nothing is queued, running or waiting on a retry timer
    pub fn is_idle(&self) -> bool {
        let c = &self.inner.counters;
        let before = (c.submitted.load(Ordering::SeqCst), c.finished.load(Ordering::SeqCst));
        let pending = self.pending_retry_count();
        let after = (c.submitted.load(Ordering::SeqCst), c.finished.load(Ordering::SeqCst));

        // A run finishing or a timer firing between the reads changes the counters
        before == after && before.0 == before.1 && pending == 0
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatcherStats {
        let c = &self.inner.counters;
        DispatcherStats {
            submitted: c.submitted.load(Ordering::SeqCst),
            rejected: c.rejected.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
            abandoned: c.abandoned.load(Ordering::SeqCst),
            retries_scheduled: c.retries_scheduled.load(Ordering::SeqCst),
        }
    }
}
