//! Upload session state machine.
//!
//! A [`SessionController`] owns one selected file and drives it through
//! hashing, verification, chunk transfer and merge. Operations take `&self`
//! so the controller can be shared (for example pausing from a signal
//! handler while `start` is running on another task).
//!
//! Every `start`, `resume` and `retry_merge` call runs an *attempt* with its
//! own cancellation token. `pause`, `cancel` and file selection stop the
//! current attempt; a stopped attempt never changes the session state again.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chunkup_protocol::{ChunkRef, MergeRequest, VerifyRequest, VerifyResponse};
use chunkup_transfer::{
    Chunk, ChunkProgress, ChunkSender, ChunkSnapshot, ChunkTransferTask, DispatchError,
    FileHandle, FileIdentity, HashCoordinator, LocalFile, ProgressAggregator, ProgressListener,
    SendError, TransferDispatcher, TransferError, split,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ChunkTransport, ChunkUpload, MergeClient, VerificationClient};
use crate::error::UploadError;
use crate::types::{SessionEvent, SessionOutcome, SessionState, UploadConfig};

const EVENT_CAPACITY: usize = 256;

struct SelectedFile {
    name: String,
    handle: Arc<dyn FileHandle>,
}

#[derive(Clone)]
struct Attempt {
    id: Uuid,
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stop(&self, pause: bool) {
        if pause {
            self.paused.store(true, Ordering::SeqCst);
        }
        self.cancel.cancel();
    }

    /// Outcome reported by an attempt that was stopped from outside.
    fn interrupted(&self) -> SessionOutcome {
        if self.paused.load(Ordering::SeqCst) {
            SessionOutcome::Paused
        } else {
            SessionOutcome::Cancelled
        }
    }
}

/// What an attempt needs once the session lock is released.
struct AttemptRun {
    attempt: Attempt,
    filename: String,
    file: Arc<dyn FileHandle>,
    chunks: Vec<Chunk>,
    identity: FileIdentity,
    progress: Arc<ProgressAggregator>,
}

impl AttemptRun {
    fn verify_request(&self) -> VerifyRequest {
        VerifyRequest {
            filename: self.filename.clone(),
            file_hash: self.identity.to_string(),
        }
    }
}

struct Inner {
    state: SessionState,
    file: Option<SelectedFile>,
    chunks: Vec<Chunk>,
    identity: Option<FileIdentity>,
    progress: Arc<ProgressAggregator>,
    attempt: Option<Attempt>,
    /// Set when the last attempt failed at the merge step.
    merge_pending: bool,
}

/// Drives one file through a resumable chunked upload.
pub struct SessionController {
    config: UploadConfig,
    verifier: Arc<dyn VerificationClient>,
    transport: Arc<dyn ChunkTransport>,
    merger: Arc<dyn MergeClient>,
    hasher: HashCoordinator,
    dispatcher: TransferDispatcher,
    inner: Mutex<Inner>,
    hash_percentage: AtomicU8,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
}

impl SessionController {
    /// Creates an idle session with no file selected.
    pub fn new(
        config: UploadConfig,
        verifier: Arc<dyn VerificationClient>,
        transport: Arc<dyn ChunkTransport>,
        merger: Arc<dyn MergeClient>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            hasher: HashCoordinator::for_algorithm(config.hash_algorithm),
            dispatcher: TransferDispatcher::new(config.max_concurrency),
            config,
            verifier,
            transport,
            merger,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                file: None,
                chunks: Vec::new(),
                identity: None,
                progress: Arc::new(ProgressAggregator::empty()),
                attempt: None,
                merge_pending: false,
            }),
            hash_percentage: AtomicU8::new(0),
            state_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Replaces the hash coordinator built from the configured algorithm.
    pub fn with_hasher(mut self, hasher: HashCoordinator) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Watches state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Content hash of the selected file, once computed.
    pub fn identity(&self) -> Option<FileIdentity> {
        self.lock().identity.clone()
    }

    pub fn filename(&self) -> Option<String> {
        self.lock().file.as_ref().map(|f| f.name.clone())
    }

    pub fn hash_percentage(&self) -> u8 {
        self.hash_percentage.load(Ordering::Acquire)
    }

    /// File-level upload percentage.
    pub fn overall_percentage(&self) -> u8 {
        let inner = self.lock();
        if inner.state == SessionState::Completed {
            100
        } else {
            inner.progress.overall_percentage()
        }
    }

    /// Per-chunk percentages, in index order.
    pub fn chunk_progress(&self) -> Vec<ChunkSnapshot> {
        self.lock().progress.snapshot()
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Selects the file to upload.
    ///
    /// Stops any running attempt and resets the session to `Idle`.
    pub fn select_file(&self, name: impl Into<String>, handle: Arc<dyn FileHandle>) {
        let name = name.into();
        let mut inner = self.lock();
        self.reset_locked(&mut inner);
        info!(filename = %name, size = handle.size(), "file selected");
        inner.file = Some(SelectedFile { name, handle });
    }

    /// Opens and selects a file on disk.
    pub fn select_path(&self, path: &Path) -> Result<(), UploadError> {
        let file = LocalFile::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.select_file(name, Arc::new(file));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Uploads the selected file from scratch.
    ///
    /// Allowed from `Idle`, `Completed` and `Failed`. Chunks the server
    /// already holds are skipped, so starting again after a failed transfer
    /// only sends what is missing.
    pub async fn start(&self) -> Result<SessionOutcome, UploadError> {
        let (attempt, filename, file, chunks) = {
            let mut inner = self.lock();
            if !matches!(
                inner.state,
                SessionState::Idle | SessionState::Completed | SessionState::Failed
            ) {
                return Err(UploadError::InvalidState {
                    action: "start",
                    state: inner.state,
                });
            }
            let Some(selected) = &inner.file else {
                return Err(UploadError::NoFileSelected);
            };
            let filename = selected.name.clone();
            let file = Arc::clone(&selected.handle);

            let attempt = Attempt::new();
            inner.attempt = Some(attempt.clone());
            inner.identity = None;
            inner.merge_pending = false;
            inner.progress = Arc::new(ProgressAggregator::empty());
            self.hash_percentage.store(0, Ordering::Release);

            inner.chunks = match split(file.size(), self.config.chunk_size) {
                Ok(chunks) => chunks,
                Err(e) => {
                    inner.attempt = None;
                    return Err(self.fail_locked(&mut inner, UploadError::Io(e)));
                }
            };

            info!(
                attempt = %attempt.id,
                filename = %filename,
                size = file.size(),
                chunks = inner.chunks.len(),
                "upload started"
            );
            self.transition(&mut inner, SessionState::Hashing);
            (attempt, filename, file, inner.chunks.clone())
        };

        let identity = match self
            .hasher
            .compute_identity(Arc::clone(&file), chunks.clone(), &attempt.cancel, |p| {
                self.on_hash_progress(p)
            })
            .await
        {
            Ok(identity) => identity,
            Err(TransferError::Aborted) => return Ok(attempt.interrupted()),
            Err(e) => return self.fail(&attempt, UploadError::Hashing(e.to_string())),
        };

        let run = {
            let mut inner = self.lock();
            if !is_current(&inner, &attempt) {
                return Ok(attempt.interrupted());
            }
            let progress = Arc::new(
                ProgressAggregator::new(&identity, file.size(), &chunks)
                    .with_listener(self.progress_listener()),
            );
            inner.identity = Some(identity.clone());
            inner.progress = Arc::clone(&progress);
            self.transition(&mut inner, SessionState::AwaitingVerification);
            AttemptRun {
                attempt,
                filename,
                file,
                chunks,
                identity,
                progress,
            }
        };

        self.verify_and_transfer(run).await
    }

    /// Pauses a running transfer.
    ///
    /// In-flight chunk transfers are aborted at once; chunk records and the
    /// file hash are kept for [`resume`](Self::resume).
    pub fn pause(&self) -> Result<(), UploadError> {
        let mut inner = self.lock();
        if inner.state != SessionState::Transferring {
            return Err(UploadError::InvalidState {
                action: "pause",
                state: inner.state,
            });
        }
        if let Some(attempt) = inner.attempt.take() {
            attempt.stop(true);
            info!(attempt = %attempt.id, "upload paused");
        }
        self.transition(&mut inner, SessionState::Paused);
        Ok(())
    }

    /// Continues a paused upload.
    ///
    /// Asks the server again which chunks it holds and sends only the rest.
    pub async fn resume(&self) -> Result<SessionOutcome, UploadError> {
        let run = {
            let mut inner = self.lock();
            if inner.state != SessionState::Paused {
                return Err(UploadError::InvalidState {
                    action: "resume",
                    state: inner.state,
                });
            }
            let run = self.run_from(&inner)?;
            inner.attempt = Some(run.attempt.clone());
            info!(attempt = %run.attempt.id, file_hash = %run.identity, "upload resumed");
            self.transition(&mut inner, SessionState::Transferring);
            run
        };

        self.verify_and_transfer(run).await
    }

    /// Abandons the current attempt and returns to `Idle`.
    ///
    /// The selected file is kept; its hash and chunk records are discarded.
    /// A no-op when already idle.
    pub fn cancel(&self) -> Result<(), UploadError> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return Err(UploadError::InvalidState {
                action: "cancel",
                state: inner.state,
            });
        }
        if inner.state != SessionState::Idle {
            info!(state = %inner.state, "upload cancelled");
        }
        self.reset_locked(&mut inner);
        Ok(())
    }

    /// Repeats the merge request after it failed.
    pub async fn retry_merge(&self) -> Result<SessionOutcome, UploadError> {
        let run = {
            let mut inner = self.lock();
            if inner.state != SessionState::Failed || !inner.merge_pending {
                return Err(UploadError::InvalidState {
                    action: "retry merge",
                    state: inner.state,
                });
            }
            let run = self.run_from(&inner)?;
            inner.attempt = Some(run.attempt.clone());
            inner.merge_pending = false;
            info!(attempt = %run.attempt.id, file_hash = %run.identity, "retrying merge");
            self.transition(&mut inner, SessionState::Transferring);
            run
        };

        self.merge(run).await
    }

    // -----------------------------------------------------------------------
    // Attempt steps
    // -----------------------------------------------------------------------

    /// New attempt over the already hashed file.
    fn run_from(&self, inner: &Inner) -> Result<AttemptRun, UploadError> {
        let (Some(selected), Some(identity)) = (&inner.file, &inner.identity) else {
            return Err(UploadError::NoFileSelected);
        };
        Ok(AttemptRun {
            attempt: Attempt::new(),
            filename: selected.name.clone(),
            file: Arc::clone(&selected.handle),
            chunks: inner.chunks.clone(),
            identity: identity.clone(),
            progress: Arc::clone(&inner.progress),
        })
    }

    async fn verify_and_transfer(&self, run: AttemptRun) -> Result<SessionOutcome, UploadError> {
        debug!(file_hash = %run.identity, "verifying with server");
        let verify = self.verifier.verify(run.verify_request());
        let response = match guarded(&run.attempt, verify).await {
            None => return Ok(run.attempt.interrupted()),
            Some(Ok(response)) => response,
            Some(Err(e)) => return self.fail(&run.attempt, UploadError::Verification(e)),
        };

        if !response.should_upload {
            let mut inner = self.lock();
            if !is_current(&inner, &run.attempt) {
                return Ok(run.attempt.interrupted());
            }
            self.emit(SessionEvent::Verified {
                file_hash: run.identity.to_string(),
                should_upload: false,
                uploaded: run.chunks.len(),
            });
            for chunk in &run.chunks {
                run.progress.complete(chunk.index);
            }
            info!(file_hash = %run.identity, "server already holds the file");
            self.complete_locked(&mut inner, &run.identity, true);
            return Ok(SessionOutcome::Deduplicated);
        }

        self.transfer(run, response).await
    }

    async fn transfer(
        &self,
        run: AttemptRun,
        response: VerifyResponse,
    ) -> Result<SessionOutcome, UploadError> {
        let chunk_count = run.chunks.len();
        let (uploaded, tasks) = {
            let mut inner = self.lock();
            if !is_current(&inner, &run.attempt) {
                return Ok(run.attempt.interrupted());
            }

            let uploaded = resolve_uploaded(&response.uploaded_list, &run.identity, chunk_count);
            self.emit(SessionEvent::Verified {
                file_hash: run.identity.to_string(),
                should_upload: true,
                uploaded: uploaded.len(),
            });

            let mut tasks = Vec::with_capacity(chunk_count - uploaded.len());
            for chunk in &run.chunks {
                if uploaded.contains(&chunk.index) {
                    run.progress.complete(chunk.index);
                } else {
                    run.progress.reset(chunk.index);
                    tasks.push(ChunkTransferTask {
                        chunk: *chunk,
                        key: run.identity.chunk_key(chunk.index),
                    });
                }
            }
            self.transition(&mut inner, SessionState::Transferring);
            (uploaded, tasks)
        };

        info!(
            file_hash = %run.identity,
            pending = tasks.len(),
            uploaded = uploaded.len(),
            "transferring chunks"
        );

        let sender = Arc::new(SessionSender {
            transport: Arc::clone(&self.transport),
            file: Arc::clone(&run.file),
            file_hash: run.identity.to_string(),
            filename: run.filename.clone(),
        });
        let result = self
            .dispatcher
            .run(tasks, sender, Arc::clone(&run.progress), &run.attempt.cancel)
            .await;

        match result {
            Ok(report) => {
                let delivered = uploaded.len() + report.completed.len();
                if delivered != chunk_count {
                    let index = (0..chunk_count)
                        .find(|&i| run.progress.percentage(i) != Some(100))
                        .unwrap_or(0);
                    let reason = format!("{delivered} of {chunk_count} chunks confirmed");
                    return self.fail(&run.attempt, UploadError::Transfer { index, reason });
                }
            }
            Err(DispatchError::Aborted { .. }) => return Ok(run.attempt.interrupted()),
            Err(DispatchError::Failed { index, reason, .. }) => {
                return self.fail(&run.attempt, UploadError::Transfer { index, reason });
            }
        }

        self.merge(run).await
    }

    async fn merge(&self, run: AttemptRun) -> Result<SessionOutcome, UploadError> {
        let request = MergeRequest {
            size: self.config.chunk_size,
            file_hash: run.identity.to_string(),
            filename: run.filename.clone(),
        };
        debug!(file_hash = %run.identity, "requesting merge");

        match guarded(&run.attempt, self.merger.merge(request)).await {
            None => Ok(run.attempt.interrupted()),
            Some(Ok(())) => {
                let mut inner = self.lock();
                if !is_current(&inner, &run.attempt) {
                    return Ok(run.attempt.interrupted());
                }
                info!(file_hash = %run.identity, filename = %run.filename, "upload completed");
                self.complete_locked(&mut inner, &run.identity, false);
                Ok(SessionOutcome::Completed)
            }
            Some(Err(e)) => self.fail(&run.attempt, UploadError::Merge(e)),
        }
    }

    // -----------------------------------------------------------------------
    // State helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, inner: &mut Inner, state: SessionState) {
        if inner.state == state {
            return;
        }
        info!(from = %inner.state, to = %state, "session state changed");
        inner.state = state;
        self.state_tx.send_replace(state);
        self.emit(SessionEvent::StateChanged { state });
    }

    fn emit(&self, event: SessionEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("session event dropped");
        }
    }

    fn on_hash_progress(&self, percentage: u8) {
        self.hash_percentage.store(percentage, Ordering::Release);
        self.emit(SessionEvent::HashProgress { percentage });
    }

    fn progress_listener(&self) -> ProgressListener {
        let tx = self.events_tx.clone();
        Box::new(move |update| {
            let _ = tx.try_send(SessionEvent::ChunkProgress {
                index: update.index,
                percentage: update.chunk_percentage,
                overall: update.overall,
            });
        })
    }

    fn reset_locked(&self, inner: &mut Inner) {
        if let Some(attempt) = inner.attempt.take() {
            attempt.stop(false);
        }
        inner.chunks.clear();
        inner.identity = None;
        inner.progress = Arc::new(ProgressAggregator::empty());
        inner.merge_pending = false;
        self.hash_percentage.store(0, Ordering::Release);
        self.transition(inner, SessionState::Idle);
    }

    fn complete_locked(&self, inner: &mut Inner, identity: &FileIdentity, deduplicated: bool) {
        inner.attempt = None;
        self.transition(inner, SessionState::Completed);
        self.emit(SessionEvent::Completed {
            file_hash: identity.to_string(),
            deduplicated,
        });
    }

    /// Moves the session to `Failed` unless `attempt` was superseded.
    fn fail(&self, attempt: &Attempt, error: UploadError) -> Result<SessionOutcome, UploadError> {
        let mut inner = self.lock();
        if !is_current(&inner, attempt) {
            debug!(error = %error, "ignoring failure of a stopped attempt");
            return Ok(attempt.interrupted());
        }
        inner.attempt = None;
        attempt.cancel.cancel();
        Err(self.fail_locked(&mut inner, error))
    }

    fn fail_locked(&self, inner: &mut Inner, error: UploadError) -> UploadError {
        inner.merge_pending = matches!(error, UploadError::Merge(_));
        warn!(error = %error, "upload failed");
        self.transition(inner, SessionState::Failed);
        self.emit(SessionEvent::Failed {
            error: error.to_string(),
        });
        error
    }
}

fn is_current(inner: &Inner, attempt: &Attempt) -> bool {
    inner.attempt.as_ref().is_some_and(|a| a.id == attempt.id)
}

/// Runs `fut` unless the attempt is stopped first.
async fn guarded<T>(attempt: &Attempt, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = attempt.cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Maps a verify response's `uploadedList` onto chunk indices.
fn resolve_uploaded(
    list: &[ChunkRef],
    identity: &FileIdentity,
    chunk_count: usize,
) -> HashSet<usize> {
    list.iter()
        .filter_map(|entry| {
            let index = entry.resolve(identity.as_str(), chunk_count);
            if index.is_none() {
                warn!(?entry, "ignoring unknown uploaded chunk");
            }
            index
        })
        .collect()
}

/// Reads a chunk off the selected file and hands it to the transport.
struct SessionSender {
    transport: Arc<dyn ChunkTransport>,
    file: Arc<dyn FileHandle>,
    file_hash: String,
    filename: String,
}

impl ChunkSender for SessionSender {
    fn send<'a>(
        &'a self,
        task: &'a ChunkTransferTask,
        progress: ChunkProgress,
    ) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>> {
        Box::pin(async move {
            let file = Arc::clone(&self.file);
            let chunk = task.chunk;
            let payload = tokio::task::spawn_blocking(move || chunk.read(file.as_ref())).await??;

            let upload = ChunkUpload {
                index: chunk.index,
                key: task.key.clone(),
                file_hash: self.file_hash.clone(),
                filename: self.filename.clone(),
                payload,
            };
            self.transport.transfer_chunk(upload, progress).await?;
            Ok(())
        })
    }
}
