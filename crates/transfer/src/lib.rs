//! Chunked file upload engine: splitting, hashing, dispatch and progress.
//!
//! The pieces are independent of any transport. A caller splits a
//! [`FileHandle`] with [`split_file`], derives the file's
//! [`FileIdentity`] through a [`HashCoordinator`], and pushes the chunks
//! through a [`TransferDispatcher`], which keeps at most
//! `max_concurrency` transfers in flight and feeds a
//! [`ProgressAggregator`].

mod chunker;
mod dispatcher;
mod file;
mod hash;
mod progress;
mod types;

pub use chunker::{chunk_count, split, split_file};
pub use dispatcher::{
    ChunkSender, ChunkTransferTask, DispatchError, DispatchReport, InFlightRegistry, SendError,
    TransferDispatcher,
};
pub use file::{FileHandle, LocalFile, MemoryFile};
pub use hash::{
    DigestWorker, HashAlgorithm, HashCoordinator, HashEvent, HashEventSink, HashWorker,
    Md5Worker, Sha256Worker,
};
pub use progress::{
    ChunkProgress, ChunkSnapshot, ProgressAggregator, ProgressListener, ProgressUpdate,
};
pub use types::{Chunk, FileIdentity};

/// Default chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of chunk transfers allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("hash worker failed: {0}")]
    Hash(String),

    #[error("aborted")]
    Aborted,
}
