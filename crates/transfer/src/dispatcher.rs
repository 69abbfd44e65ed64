//! Bounded-concurrency chunk dispatch.
//!
//! A fixed pool of logical workers pulls tasks from a shared queue in index
//! order. Each pulled task runs as its own tokio task registered in an
//! [`InFlightRegistry`], so cancellation can abort every outstanding
//! transfer at once. A worker only pulls the next task after its current
//! one finished, which bounds in-flight transfers by the pool size.
//!
//! Once the run's cancellation token fires, no task is pulled or started and
//! no completion is recorded, even before the supervisor observes it.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DEFAULT_MAX_CONCURRENCY;
use crate::progress::{ChunkProgress, ProgressAggregator};
use crate::types::Chunk;

/// Error type returned by a [`ChunkSender`].
pub type SendError = Box<dyn std::error::Error + Send + Sync>;

/// One pending chunk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTransferTask {
    pub chunk: Chunk,
    /// Server-side chunk key, `{hash}-{index}`.
    pub key: String,
}

impl ChunkTransferTask {
    pub fn index(&self) -> usize {
        self.chunk.index
    }
}

/// Performs the transfer of a single chunk.
///
/// The dispatcher owns scheduling; implementations only move bytes and
/// report progress through the given [`ChunkProgress`].
pub trait ChunkSender: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        task: &'a ChunkTransferTask,
        progress: ChunkProgress,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>>;
}

/// Outcome of a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Indices of chunks confirmed delivered, in completion order.
    pub completed: Vec<usize>,
}

/// Why a dispatch run did not complete every task.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("chunk {index} failed: {reason}")]
    Failed {
        index: usize,
        reason: String,
        report: DispatchReport,
    },

    #[error("dispatch aborted")]
    Aborted { report: DispatchReport },
}

impl DispatchError {
    /// Chunks delivered before the run stopped.
    pub fn report(&self) -> &DispatchReport {
        match self {
            DispatchError::Failed { report, .. } | DispatchError::Aborted { report } => report,
        }
    }
}

// ---------------------------------------------------------------------------
// InFlightRegistry
// ---------------------------------------------------------------------------

/// Abort handles of the transfers currently in flight, by chunk index.
#[derive(Default)]
pub struct InFlightRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    handles: HashMap<usize, AbortHandle>,
    closed: bool,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running transfer. Once the registry is closed the
    /// transfer is aborted immediately instead.
    pub fn insert(&self, index: usize, handle: AbortHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            handle.abort();
        } else {
            inner.handles.insert(index, handle);
        }
    }

    pub fn remove(&self, index: usize) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.handles.remove(&index);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handles
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the registry and aborts every registered transfer.
    ///
    /// Handles are moved out under the lock and aborted after it is
    /// released, so transfers finishing concurrently never observe a
    /// half-cleared registry. Returns the number of transfers aborted.
    pub fn abort_all(&self) -> usize {
        let snapshot: Vec<(usize, AbortHandle)> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.closed = true;
            inner.handles.drain().collect()
        };
        for (index, handle) in &snapshot {
            debug!(index, "aborting in-flight transfer");
            handle.abort();
        }
        snapshot.len()
    }
}

// ---------------------------------------------------------------------------
// TransferDispatcher
// ---------------------------------------------------------------------------

/// Runs chunk transfers with at most `max_concurrency` in flight.
#[derive(Debug, Clone)]
pub struct TransferDispatcher {
    max_concurrency: usize,
}

impl Default for TransferDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

struct Shared<S> {
    queue: Mutex<VecDeque<ChunkTransferTask>>,
    sender: Arc<S>,
    progress: Arc<ProgressAggregator>,
    registry: InFlightRegistry,
    cancel: CancellationToken,
    halted: AtomicBool,
    completed: Mutex<Vec<usize>>,
    failure: Mutex<Option<(usize, String)>>,
}

impl<S> Shared<S> {
    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.halted.load(Ordering::SeqCst)
    }

    fn next_task(&self) -> Option<ChunkTransferTask> {
        if self.stopped() {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn record_completion(&self, index: usize) {
        self.progress.complete(index);
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(index);
    }

    fn record_failure(&self, index: usize, reason: String) {
        self.halted.store(true, Ordering::SeqCst);
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        if failure.is_none() {
            *failure = Some((index, reason));
        }
    }

    fn report(&self) -> DispatchReport {
        DispatchReport {
            completed: self
                .completed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

impl TransferDispatcher {
    /// Creates a dispatcher; a limit of 0 is treated as 1.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Transfers every task through `sender`.
    ///
    /// Tasks are started in the given order; completions may arrive in any
    /// order and are marked 100% in `progress`. Resolves once:
    /// - `Ok` after every task completed;
    /// - [`DispatchError::Failed`] after the first failure, once the tasks
    ///   already in flight have finished (no new task starts after a
    ///   failure, and failed tasks are not retried);
    /// - [`DispatchError::Aborted`] as soon as `cancel` fires, after
    ///   aborting every in-flight transfer. Transfers that finish after the
    ///   token fired are not counted as completed.
    pub async fn run<S: ChunkSender>(
        &self,
        tasks: Vec<ChunkTransferTask>,
        sender: Arc<S>,
        progress: Arc<ProgressAggregator>,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Aborted {
                report: DispatchReport::default(),
            });
        }
        if tasks.is_empty() {
            return Ok(DispatchReport::default());
        }

        let total = tasks.len();
        let worker_count = self.max_concurrency.min(total);
        let shared = Arc::new(Shared {
            queue: Mutex::new(tasks.into()),
            sender,
            progress,
            registry: InFlightRegistry::new(),
            cancel: cancel.clone(),
            halted: AtomicBool::new(false),
            completed: Mutex::new(Vec::with_capacity(total)),
            failure: Mutex::new(None),
        });

        debug!(tasks = total, workers = worker_count, "dispatch started");

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            workers.spawn(work(Arc::clone(&shared)));
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                joined = workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Some(Err(_)) => {}
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            shared.halted.store(true, Ordering::SeqCst);
            let aborted = shared.registry.abort_all();
            workers.shutdown().await;
            let report = shared.report();
            info!(aborted, completed = report.completed.len(), "dispatch aborted");
            return Err(DispatchError::Aborted { report });
        }

        let report = shared.report();
        let failure = shared
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match failure {
            Some((index, reason)) => Err(DispatchError::Failed {
                index,
                reason,
                report,
            }),
            None => {
                debug!(completed = report.completed.len(), "dispatch finished");
                Ok(report)
            }
        }
    }
}

/// One logical worker: pull, transfer, release, repeat.
async fn work<S: ChunkSender>(shared: Arc<Shared<S>>) {
    while let Some(task) = shared.next_task() {
        let index = task.index();
        let sender = Arc::clone(&shared.sender);
        let progress = ChunkProgress::new(index, Arc::clone(&shared.progress));
        let cancel = shared.cancel.clone();

        debug!(index, key = %task.key, "dispatching chunk");
        let transfer = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = sender.send(&task, progress) => Some(sent.map_err(|e| e.to_string())),
            }
        });
        shared.registry.insert(index, transfer.abort_handle());
        if shared.cancel.is_cancelled() {
            transfer.abort();
            shared.registry.remove(index);
            return;
        }

        let outcome = transfer.await;
        shared.registry.remove(index);
        if shared.cancel.is_cancelled() {
            debug!(index, "dispatch cancelled, result discarded");
            return;
        }

        match outcome {
            Ok(Some(Ok(()))) => {
                debug!(index, "chunk delivered");
                shared.record_completion(index);
            }
            Ok(Some(Err(reason))) => {
                warn!(index, %reason, "chunk transfer failed");
                shared.record_failure(index, reason);
                return;
            }
            Ok(None) => return,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                let reason = format!("transfer task panicked: {e}");
                warn!(index, %reason, "chunk transfer failed");
                shared.record_failure(index, reason);
                return;
            }
        }
    }
}
