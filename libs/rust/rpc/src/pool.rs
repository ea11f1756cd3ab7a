use crate::{
    config::{PriorityWorkers, RpcConfig},
    error::{ChainError, ConfigError, Result},
};
use futures::{FutureExt, future::BoxFuture};
use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    sync::{Notify, mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    fn slot(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, bool> + Send>;
type ProgressCallback = Arc<dyn Fn(&ProgressState) + Send + Sync>;

struct QueuedRequest {
    id: u64,
    label: String,
    priority: Priority,
    enqueued_at: Instant,
    job: Job,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    pub total_submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub percentage: f64,
    pub active_labels: Vec<String>,
}

impl ProgressState {
    pub fn outstanding(&self) -> u64 {
        self.total_submitted - self.completed - self.failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub is_active: bool,
    pub current_label: Option<String>,
    pub completed_count: u64,
    pub queue_length: usize,
    pub last_request_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolStatus {
    pub per_worker_queue_lengths: Vec<usize>,
    pub active_worker_count: usize,
    pub total_processed: u64,
    pub progress: ProgressState,
    pub workers: Vec<WorkerSnapshot>,
}

#[derive(Default)]
struct Counters {
    total_submitted: u64,
    completed: u64,
    failed: u64,
    active_labels: Vec<String>,
}

impl Counters {
    fn snapshot(&self) -> ProgressState {
        let finished = self.completed + self.failed;
        let percentage = if self.total_submitted == 0 {
            0.0
        } else {
            finished as f64 / self.total_submitted as f64 * 100.0
        };
        ProgressState {
            total_submitted: self.total_submitted,
            completed: self.completed,
            failed: self.failed,
            percentage,
            active_labels: self.active_labels.clone(),
        }
    }
}

struct WorkerSlot {
    sender: mpsc::UnboundedSender<QueuedRequest>,
    snapshot: Mutex<WorkerSnapshot>,
}

struct Shared {
    workers: Vec<WorkerSlot>,
    partition: PriorityWorkers,
    cursors: Mutex<[usize; 3]>,
    counters: Mutex<Counters>,
    subscribers: Mutex<Vec<(u64, ProgressCallback)>>,
    next_request_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    idle: Notify,
}

impl Shared {
    fn update_worker(&self, index: usize, update: impl FnOnce(&mut WorkerSnapshot)) {
        let mut snapshot = self.workers[index]
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut snapshot);
    }

    fn update_counters(&self, update: impl FnOnce(&mut Counters)) -> ProgressState {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut counters);
        counters.snapshot()
    }

    fn progress(&self) -> ProgressState {
        self.update_counters(|_| {})
    }

    /// Callbacks run outside every pool lock so they may call back into the pool.
    fn broadcast(&self, progress: &ProgressState) {
        let callbacks: Vec<ProgressCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(progress);
        }
    }

    fn status(&self) -> PoolStatus {
        let workers: Vec<WorkerSnapshot> = self
            .workers
            .iter()
            .map(|slot| {
                slot.snapshot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone()
            })
            .collect();
        let progress = self.progress();
        PoolStatus {
            per_worker_queue_lengths: workers.iter().map(|w| w.queue_length).collect(),
            active_worker_count: workers.iter().filter(|w| w.is_active).count(),
            total_processed: progress.completed + progress.failed,
            progress,
            workers,
        }
    }

    fn pick_worker(&self, priority: Priority) -> usize {
        let candidates = self.partition.workers_for(priority);
        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cursor = &mut cursors[priority.slot()];
        let index = candidates[*cursor % candidates.len()];
        *cursor = cursor.wrapping_add(1);
        index
    }
}

/// Fixed set of request workers statically partitioned by priority class.
///
/// Each worker task owns its queue: submissions arrive over a channel and are
/// inserted in priority order by the worker itself. Retries are not the
/// pool's business; compose a [`crate::RetryExecutor`] inside the submitted
/// closure instead.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(config: &RpcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = Self::with_partition(
            config.worker_count,
            config.priority_workers.clone(),
            config.worker_request_interval(),
        )?;
        Ok(pool.with_progress_reporter(config.progress_update_interval()))
    }

    pub fn with_partition(
        worker_count: usize,
        partition: PriorityWorkers,
        request_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if worker_count == 0 {
            return Err(ConfigError::Zero("worker_count"));
        }
        let candidate = RpcConfig {
            worker_count,
            priority_workers: partition.clone(),
            ..RpcConfig::default()
        };
        candidate.validate()?;

        let mut receivers = Vec::with_capacity(worker_count);
        let workers = (0..worker_count)
            .map(|id| {
                let (sender, receiver) = mpsc::unbounded_channel();
                receivers.push(receiver);
                WorkerSlot {
                    sender,
                    snapshot: Mutex::new(WorkerSnapshot {
                        id,
                        ..WorkerSnapshot::default()
                    }),
                }
            })
            .collect();

        let shared = Arc::new(Shared {
            workers,
            partition,
            cursors: Mutex::new([0; 3]),
            counters: Mutex::new(Counters::default()),
            subscribers: Mutex::new(Vec::new()),
            next_request_id: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(0),
            idle: Notify::new(),
        });

        let handles = receivers
            .into_iter()
            .enumerate()
            .map(|(index, receiver)| {
                tokio::spawn(run_worker(
                    index,
                    shared.clone(),
                    receiver,
                    request_interval,
                ))
            })
            .collect();

        info!(worker_count, "Started rpc worker pool");
        Ok(Self { shared, handles })
    }

    fn with_progress_reporter(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            let shared = Arc::downgrade(&self.shared);
            self.handles
                .push(tokio::spawn(report_progress(shared, interval)));
        }
        self
    }

    /// Queues `request` on a worker reserved for `priority`. The request is
    /// enqueued before this returns; awaiting the handle yields the
    /// request's own outcome.
    pub fn submit<T, F, Fut>(
        &self,
        label: impl Into<String>,
        priority: Priority,
        request: F,
    ) -> PendingResponse<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let (response_sender, response_receiver) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let result = request().await;
                let succeeded = result.is_ok();
                let _ = response_sender.send(result);
                succeeded
            }
            .boxed()
        });

        let index = self.shared.pick_worker(priority);
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let queued = QueuedRequest {
            id,
            label: label.clone(),
            priority,
            enqueued_at: Instant::now(),
            job,
        };

        let progress = self.shared.update_counters(|c| c.total_submitted += 1);
        self.shared.update_worker(index, |w| w.queue_length += 1);

        if self.shared.workers[index].sender.send(queued).is_err() {
            warn!(label, worker = index, "Worker is gone, dropping request");
            self.shared.update_worker(index, |w| {
                w.queue_length = w.queue_length.saturating_sub(1)
            });
            self.shared
                .update_counters(|c| c.total_submitted -= 1);
            return PendingResponse { receiver: None };
        }

        debug!(label, id, %priority, worker = index, "Request queued");
        self.shared.broadcast(&progress);
        PendingResponse {
            receiver: Some(response_receiver),
        }
    }

    /// Registers a progress observer; it is removed when the returned handle drops.
    pub fn subscribe_progress(
        &self,
        callback: impl Fn(&ProgressState) + Send + Sync + 'static,
    ) -> ProgressSubscription {
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(callback)));
        ProgressSubscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn progress(&self) -> ProgressState {
        self.shared.progress()
    }

    pub fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.progress().outstanding() == 0
    }

    /// Forgets finished work so the next batch reports its own percentage.
    pub fn reset_progress(&self) {
        let progress = self.shared.update_counters(|c| {
            c.total_submitted -= c.completed + c.failed;
            c.completed = 0;
            c.failed = 0;
        });
        self.shared.broadcast(&progress);
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.shared.workers.len())
            .field("partition", &self.shared.partition)
            .finish()
    }
}

/// Resolves with the submitted request's outcome.
#[must_use = "the response is only observable by awaiting it"]
pub struct PendingResponse<T> {
    receiver: Option<oneshot::Receiver<Result<T>>>,
}

impl<T> Future for PendingResponse<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.as_mut() {
            Some(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(ChainError::PoolClosed))),
            None => Poll::Ready(Err(ChainError::PoolClosed)),
        }
    }
}

pub struct ProgressSubscription {
    id: u64,
    shared: Weak<Shared>,
}

impl ProgressSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

fn insert_by_priority(queue: &mut VecDeque<QueuedRequest>, request: QueuedRequest) {
    let position = queue
        .iter()
        .position(|queued| queued.priority > request.priority)
        .unwrap_or(queue.len());
    queue.insert(position, request);
}

#[instrument(name = "rpc_worker", skip(shared, receiver, request_interval))]
async fn run_worker(
    index: usize,
    shared: Arc<Shared>,
    mut receiver: mpsc::UnboundedReceiver<QueuedRequest>,
    request_interval: Duration,
) {
    let mut queue = VecDeque::new();
    let mut last_request_at: Option<Instant> = None;

    loop {
        while let Ok(request) = receiver.try_recv() {
            insert_by_priority(&mut queue, request);
        }

        let Some(request) = queue.pop_front() else {
            match receiver.recv().await {
                Some(request) => {
                    insert_by_priority(&mut queue, request);
                    continue;
                }
                None => break,
            }
        };

        let QueuedRequest {
            id,
            label,
            priority,
            enqueued_at,
            job,
        } = request;

        shared.update_worker(index, |w| {
            w.queue_length = w.queue_length.saturating_sub(1);
            w.is_active = true;
            w.current_label = Some(label.clone());
        });
        let progress = shared.update_counters(|c| c.active_labels.push(label.clone()));
        shared.broadcast(&progress);

        if let Some(last) = last_request_at {
            let since_last = last.elapsed();
            if since_last < request_interval {
                sleep(request_interval - since_last).await;
            }
        }
        let started_at = Instant::now();
        last_request_at = Some(started_at);

        debug!(
            id,
            label,
            %priority,
            waited_ms = started_at.duration_since(enqueued_at).as_millis() as u64,
            "Request started"
        );

        let succeeded = match AssertUnwindSafe(job()).catch_unwind().await {
            Ok(succeeded) => succeeded,
            Err(_) => {
                error!(id, label, "Request panicked");
                false
            }
        };

        shared.update_worker(index, |w| {
            w.is_active = false;
            w.current_label = None;
            w.completed_count += 1;
            w.last_request_at = Some(started_at);
        });
        let progress = shared.update_counters(|c| {
            if succeeded {
                c.completed += 1;
            } else {
                c.failed += 1;
            }
            if let Some(position) = c.active_labels.iter().position(|l| *l == label) {
                c.active_labels.remove(position);
            }
        });
        debug!(
            id,
            label,
            succeeded,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Request settled"
        );
        shared.broadcast(&progress);

        if progress.outstanding() == 0 {
            shared.idle.notify_waiters();
        }
    }
}

async fn report_progress(shared: Weak<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let status = shared.status();
        if status.progress.outstanding() > 0 {
            info!(
                queued = ?status.per_worker_queue_lengths,
                active_workers = status.active_worker_count,
                completed = status.progress.completed,
                failed = status.progress.failed,
                total = status.progress.total_submitted,
                percentage = format!("{:.1}", status.progress.percentage),
                "Rpc queue progress"
            );
        }
    }
}
