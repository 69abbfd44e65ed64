//! Data types for the upload session.

use std::fmt;

use chunkup_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY, HashAlgorithm};
use serde::{Deserialize, Serialize};

/// Tunables of an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum number of chunk transfers in flight.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Hashing,
    AwaitingVerification,
    Transferring,
    Paused,
    Completed,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Hashing => "hashing",
            SessionState::AwaitingVerification => "awaiting_verification",
            SessionState::Transferring => "transferring",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` end an attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event emitted during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged { state: SessionState },
    /// Hash computation progress, 0 to 100.
    HashProgress { percentage: u8 },
    /// The server answered a verification request.
    Verified {
        file_hash: String,
        should_upload: bool,
        /// Number of chunks the server already holds.
        uploaded: usize,
    },
    /// A chunk's percentage changed.
    ChunkProgress {
        index: usize,
        percentage: u8,
        overall: u8,
    },
    /// The file is stored on the server.
    Completed {
        file_hash: String,
        deduplicated: bool,
    },
    /// The session failed.
    Failed { error: String },
}

/// How a `start`, `resume` or `retry_merge` call ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All chunks were delivered and merged.
    Completed,
    /// The server already held the file; nothing was sent.
    Deduplicated,
    /// The session was paused; call `resume` to continue.
    Paused,
    /// The session was cancelled or another file was selected.
    Cancelled,
}
