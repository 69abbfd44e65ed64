//! Collaborator traits for the upload server.
//!
//! The session drives the server only through these traits. Requests are
//! passed by value so the returned futures borrow nothing but `self`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chunkup_protocol::{MergeRequest, VerifyRequest, VerifyResponse};
use chunkup_transfer::ChunkProgress;

/// Boxed future returned by the collaborator traits.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Errors reported by a server collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Answers whether a file still needs uploading and which chunks the
/// server already holds.
pub trait VerificationClient: Send + Sync {
    fn verify(&self, request: VerifyRequest) -> ClientFuture<'_, VerifyResponse>;
}

/// Asks the server to assemble the stored chunks into the final file.
pub trait MergeClient: Send + Sync {
    fn merge(&self, request: MergeRequest) -> ClientFuture<'_, ()>;
}

/// Sends one chunk.
///
/// Implementations call `progress.report(loaded, total)` as bytes go out
/// and resolve once the server has confirmed the chunk. Dropping the
/// returned future abandons the transfer.
pub trait ChunkTransport: Send + Sync {
    fn transfer_chunk(&self, upload: ChunkUpload, progress: ChunkProgress) -> ClientFuture<'_, ()>;
}

/// One chunk ready to be sent.
#[derive(Clone)]
pub struct ChunkUpload {
    pub index: usize,
    /// Server-side chunk key, `{file_hash}-{index}`.
    pub key: String,
    pub file_hash: String,
    pub filename: String,
    pub payload: Vec<u8>,
}

impl fmt::Debug for ChunkUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkUpload")
            .field("index", &self.index)
            .field("key", &self.key)
            .field("filename", &self.filename)
            .field("len", &self.payload.len())
            .finish()
    }
}
