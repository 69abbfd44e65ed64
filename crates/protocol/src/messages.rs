use serde::{Deserialize, Serialize};

use crate::types::ChunkRef;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks whether the file identified by `file_hash` still needs uploading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub filename: String,
    pub file_hash: String,
}

/// Asks the server to assemble all stored chunks into the final file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Chunk size in bytes used to split the file.
    pub size: u64,
    pub file_hash: String,
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Answer to a [`VerifyRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// `false` when the server already holds the complete file.
    pub should_upload: bool,
    /// Chunks already stored for this file hash.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_list: Vec<ChunkRef>,
}

impl VerifyResponse {
    /// Response for a file the server already holds.
    pub fn deduplicated() -> Self {
        Self {
            should_upload: false,
            uploaded_list: Vec::new(),
        }
    }

    /// Response for a file that still needs (some) chunks.
    pub fn upload(uploaded_list: Vec<ChunkRef>) -> Self {
        Self {
            should_upload: true,
            uploaded_list,
        }
    }
}
