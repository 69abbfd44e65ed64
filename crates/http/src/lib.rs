//! HTTP client for the chunked upload server.
//!
//! [`HttpUploadClient`] implements the session's collaborator traits on
//! top of `reqwest`:
//!
//! - `POST {base}/verify` with a JSON [`VerifyRequest`](chunkup_protocol::VerifyRequest)
//! - `POST {base}/` with a multipart chunk
//! - `POST {base}/merge` with a JSON [`MergeRequest`](chunkup_protocol::MergeRequest)

pub mod client;

pub use client::{DEFAULT_BASE_URL, HttpConfig, HttpUploadClient};
