//! Upload session flow: hash, verify, transfer, merge.
//!
//! This crate implements the **business logic** of a resumable upload. It
//! has no transport dependency: the server is reached through the
//! [`VerificationClient`], [`ChunkTransport`] and [`MergeClient`] traits,
//! which the HTTP crate implements and tests replace with mocks.
//!
//! # Pipeline
//!
//! 1. **Hash**: split the file and compute its content hash
//! 2. **Verify**: ask the server whether the file or some chunks exist
//! 3. **Transfer**: send missing chunks with bounded concurrency
//! 4. **Merge**: ask the server to assemble the chunks
//!
//! Transfers can be paused and resumed; resume re-verifies and only sends
//! what the server still lacks.

pub mod client;
pub mod controller;
pub mod error;
pub mod types;

// Re-export primary types for convenience.
pub use client::{
    ChunkTransport, ChunkUpload, ClientError, ClientFuture, MergeClient, VerificationClient,
};
pub use controller::SessionController;
pub use error::UploadError;
pub use types::{SessionEvent, SessionOutcome, SessionState, UploadConfig};
