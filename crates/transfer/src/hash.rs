//! Content hashing off the async executor.
//!
//! A [`HashWorker`] digests the chunk sequence on a blocking thread and
//! reports through a [`HashEventSink`]: zero or more progress events, then
//! exactly one digest. [`HashCoordinator`] owns the worker's lifecycle,
//! turns its events into a monotonic percentage and resolves a single
//! [`FileIdentity`].

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::Digest;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;
use crate::file::FileHandle;
use crate::types::{Chunk, FileIdentity};

/// Message emitted by a hash worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashEvent {
    /// Percentage of the chunk sequence digested so far.
    Progress(u8),
    /// Final hex digest. Terminal.
    Digest(String),
}

/// Channel a worker reports through.
pub struct HashEventSink {
    tx: mpsc::UnboundedSender<HashEvent>,
}

impl HashEventSink {
    /// Reports progress. Returns `false` once the coordinator has detached,
    /// in which case the worker should stop.
    pub fn progress(&self, percentage: u8) -> bool {
        self.tx.send(HashEvent::Progress(percentage)).is_ok()
    }

    /// Reports the final digest, consuming the sink.
    pub fn digest(self, hex_digest: String) {
        let _ = self.tx.send(HashEvent::Digest(hex_digest));
    }
}

/// Computes a digest over the ordered chunk sequence.
///
/// Runs on a blocking thread; implementations may do synchronous I/O.
pub trait HashWorker: Send + Sync + 'static {
    fn run(
        &self,
        file: &dyn FileHandle,
        chunks: &[Chunk],
        events: HashEventSink,
    ) -> Result<(), TransferError>;
}

// ---------------------------------------------------------------------------
// DigestWorker
// ---------------------------------------------------------------------------

/// Incremental digest over chunk contents using any RustCrypto hasher.
pub struct DigestWorker<D> {
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestWorker<D> {
    pub fn new() -> Self {
        Self {
            _digest: PhantomData,
        }
    }
}

impl<D> Default for DigestWorker<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// MD5 over the chunk sequence.
pub type Md5Worker = DigestWorker<md5::Md5>;

/// SHA-256 over the chunk sequence.
pub type Sha256Worker = DigestWorker<sha2::Sha256>;

impl<D> HashWorker for DigestWorker<D>
where
    D: Digest + 'static,
{
    fn run(
        &self,
        file: &dyn FileHandle,
        chunks: &[Chunk],
        events: HashEventSink,
    ) -> Result<(), TransferError> {
        let mut hasher = D::new();
        let total = chunks.len();

        if total == 0 && !events.progress(100) {
            return Err(TransferError::Aborted);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let data = chunk.read(file)?;
            hasher.update(&data);

            let percentage = ((i + 1) * 100 / total) as u8;
            if !events.progress(percentage) {
                return Err(TransferError::Aborted);
            }
        }

        events.digest(hex::encode(hasher.finalize()));
        Ok(())
    }
}

/// Digest algorithms shipped with the crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Returns a worker computing this digest.
    pub fn worker(self) -> Arc<dyn HashWorker> {
        match self {
            HashAlgorithm::Md5 => Arc::new(Md5Worker::new()),
            HashAlgorithm::Sha256 => Arc::new(Sha256Worker::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// HashCoordinator
// ---------------------------------------------------------------------------

/// Drives a [`HashWorker`] and resolves the file identity.
#[derive(Clone)]
pub struct HashCoordinator {
    worker: Arc<dyn HashWorker>,
}

impl HashCoordinator {
    pub fn new(worker: Arc<dyn HashWorker>) -> Self {
        Self { worker }
    }

    pub fn for_algorithm(algorithm: HashAlgorithm) -> Self {
        Self::new(algorithm.worker())
    }

    /// Hashes `chunks` of `file` and resolves the file identity.
    ///
    /// `on_progress` receives a non-decreasing percentage in `0..=100`; 100
    /// is always delivered before a successful return. Cancelling `cancel`
    /// resolves [`TransferError::Aborted`] at once and detaches the worker,
    /// which stops at its next progress report.
    pub async fn compute_identity<F>(
        &self,
        file: Arc<dyn FileHandle>,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<FileIdentity, TransferError>
    where
        F: FnMut(u8),
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = Arc::clone(&self.worker);
        let chunk_count = chunks.len();
        let mut job = tokio::task::spawn_blocking(move || {
            worker.run(file.as_ref(), &chunks, HashEventSink { tx })
        });

        debug!(chunks = chunk_count, "hash worker started");

        let mut last = 0u8;
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    rx.close();
                    debug!("hash worker detached");
                    return Err(TransferError::Aborted);
                }
                event = rx.recv() => event,
            };

            match event {
                Some(HashEvent::Progress(p)) => {
                    let p = p.min(100);
                    if p > last {
                        last = p;
                        on_progress(p);
                    }
                }
                Some(HashEvent::Digest(digest)) => {
                    rx.close();
                    if last < 100 {
                        on_progress(100);
                    }
                    let identity = FileIdentity::new(digest);
                    debug!(file_hash = %identity, "hash computed");
                    return Ok(identity);
                }
                None => {
                    // The worker dropped its sink without a digest.
                    let reason = match (&mut job).await {
                        Ok(Err(e)) => e.to_string(),
                        Ok(Ok(())) => "worker finished without a digest".to_string(),
                        Err(e) => format!("worker panicked: {e}"),
                    };
                    warn!(%reason, "hash worker failed");
                    return Err(TransferError::Hash(reason));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::split_file;
    use crate::file::MemoryFile;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sample_file(len: usize) -> Arc<dyn FileHandle> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        Arc::new(MemoryFile::new(data))
    }

    async fn identity_of(
        coordinator: &HashCoordinator,
        file: Arc<dyn FileHandle>,
        chunk_size: u64,
    ) -> (FileIdentity, Vec<u8>) {
        let chunks = split_file(file.as_ref(), chunk_size).unwrap();
        let mut seen = Vec::new();
        let id = coordinator
            .compute_identity(file, chunks, &CancellationToken::new(), |p| seen.push(p))
            .await
            .unwrap();
        (id, seen)
    }

    #[tokio::test]
    async fn md5_matches_whole_file_digest() {
        let file = sample_file(1000);
        let whole = file.read_range(0, 1000).unwrap();
        let expected = hex::encode(md5::Md5::digest(&whole));

        let coordinator = HashCoordinator::for_algorithm(HashAlgorithm::Md5);
        let (id, _) = identity_of(&coordinator, file, 64).await;
        assert_eq!(id.as_str(), expected);
    }

    #[tokio::test]
    async fn identity_independent_of_chunk_size() {
        let coordinator = HashCoordinator::for_algorithm(HashAlgorithm::Sha256);
        let (a, _) = identity_of(&coordinator, sample_file(5000), 7).await;
        let (b, _) = identity_of(&coordinator, sample_file(5000), 4096).await;
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let coordinator = HashCoordinator::for_algorithm(HashAlgorithm::Md5);
        let (_, seen) = identity_of(&coordinator, sample_file(1000), 30).await;
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn empty_file_hashes_empty_input() {
        let coordinator = HashCoordinator::for_algorithm(HashAlgorithm::Md5);
        let (id, seen) = identity_of(&coordinator, sample_file(0), 10).await;
        assert_eq!(id.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(seen, vec![100]);
    }

    /// Emits a scripted event sequence.
    struct ScriptedWorker {
        events: Vec<HashEvent>,
        result: Mutex<Option<Result<(), TransferError>>>,
    }

    impl ScriptedWorker {
        fn new(events: Vec<HashEvent>, result: Result<(), TransferError>) -> Self {
            Self {
                events,
                result: Mutex::new(Some(result)),
            }
        }
    }

    impl HashWorker for ScriptedWorker {
        fn run(
            &self,
            _file: &dyn FileHandle,
            _chunks: &[Chunk],
            events: HashEventSink,
        ) -> Result<(), TransferError> {
            for event in &self.events {
                match event {
                    HashEvent::Progress(p) => {
                        events.progress(*p);
                    }
                    HashEvent::Digest(d) => {
                        events.tx.send(HashEvent::Digest(d.clone())).ok();
                    }
                }
            }
            self.result.lock().unwrap().take().unwrap()
        }
    }

    async fn run_scripted(
        worker: ScriptedWorker,
    ) -> (Result<FileIdentity, TransferError>, Vec<u8>) {
        let coordinator = HashCoordinator::new(Arc::new(worker));
        let mut seen = Vec::new();
        let result = coordinator
            .compute_identity(sample_file(0), Vec::new(), &CancellationToken::new(), |p| {
                seen.push(p)
            })
            .await;
        (result, seen)
    }

    #[tokio::test]
    async fn out_of_order_progress_is_clamped_and_deduplicated() {
        let worker = ScriptedWorker::new(
            vec![
                HashEvent::Progress(10),
                HashEvent::Progress(5),
                HashEvent::Progress(10),
                HashEvent::Progress(250),
                HashEvent::Digest("ABC".into()),
            ],
            Ok(()),
        );
        let (result, seen) = run_scripted(worker).await;
        assert_eq!(result.unwrap().as_str(), "abc");
        assert_eq!(seen, vec![10, 100]);
    }

    #[tokio::test]
    async fn only_first_digest_resolves() {
        let worker = ScriptedWorker::new(
            vec![
                HashEvent::Digest("first".into()),
                HashEvent::Digest("second".into()),
            ],
            Ok(()),
        );
        let (result, seen) = run_scripted(worker).await;
        assert_eq!(result.unwrap().as_str(), "first");
        assert_eq!(seen, vec![100]);
    }

    #[tokio::test]
    async fn worker_error_resolves_hash_error() {
        let worker = ScriptedWorker::new(
            vec![HashEvent::Progress(40)],
            Err(TransferError::Io(std::io::Error::other("disk gone"))),
        );
        let (result, seen) = run_scripted(worker).await;
        match result {
            Err(TransferError::Hash(reason)) => assert!(reason.contains("disk gone")),
            other => panic!("expected hash error, got {other:?}"),
        }
        assert_eq!(seen, vec![40]);
    }

    #[tokio::test]
    async fn worker_without_digest_is_an_error() {
        let worker = ScriptedWorker::new(vec![], Ok(()));
        let (result, _) = run_scripted(worker).await;
        assert!(matches!(result, Err(TransferError::Hash(_))));
    }

    /// Blocks until released, then reports progress.
    struct GatedWorker {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
        detached: Arc<AtomicBool>,
    }

    impl HashWorker for GatedWorker {
        fn run(
            &self,
            _file: &dyn FileHandle,
            _chunks: &[Chunk],
            events: HashEventSink,
        ) -> Result<(), TransferError> {
            let _ = self.gate.lock().unwrap().recv();
            if !events.progress(50) {
                self.detached.store(true, Ordering::SeqCst);
                return Err(TransferError::Aborted);
            }
            events.digest("late".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_detaches_worker() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let detached = Arc::new(AtomicBool::new(false));
        let coordinator = HashCoordinator::new(Arc::new(GatedWorker {
            gate: Mutex::new(gate_rx),
            detached: Arc::clone(&detached),
        }));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut seen = Vec::new();
        let result = coordinator
            .compute_identity(sample_file(0), Vec::new(), &cancel, |p| seen.push(p))
            .await;
        assert!(matches!(result, Err(TransferError::Aborted)));

        // Let the worker run now that the coordinator is gone.
        gate_tx.send(()).unwrap();
        for _ in 0..100 {
            if detached.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(detached.load(Ordering::SeqCst));
        assert!(seen.is_empty());
    }

    #[test]
    fn algorithm_names() {
        assert_eq!(serde_json::to_string(&HashAlgorithm::Md5).unwrap(), "\"md5\"");
        let alg: HashAlgorithm = serde_json::from_str("\"sha256\"").unwrap();
        assert_eq!(alg, HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Md5);
    }
}
