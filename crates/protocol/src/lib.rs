//! Wire types shared by the upload engine and its HTTP collaborator.
//!
//! The upload server exposes three endpoints (see [`constants`]):
//! a JSON `verify` call answering whether a file (by content hash) still
//! needs uploading, a multipart chunk upload, and a JSON `merge` call that
//! asks the server to assemble the stored chunks.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{MergeRequest, VerifyRequest, VerifyResponse};
pub use types::{ChunkRef, chunk_key};
