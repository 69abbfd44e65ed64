//! Endpoint paths and multipart field names.

/// Path of the dedup / resume check.
pub const VERIFY_PATH: &str = "/verify";

/// Path chunks are posted to (multipart form).
pub const UPLOAD_PATH: &str = "/";

/// Path of the final assembly request.
pub const MERGE_PATH: &str = "/merge";

/// Multipart field names of a chunk upload.
pub mod form {
    /// Raw chunk bytes.
    pub const CHUNK: &str = "chunk";
    /// Chunk key, `{fileHash}-{index}`.
    pub const HASH: &str = "hash";
    /// Original file name.
    pub const FILENAME: &str = "filename";
    /// Content hash of the whole file.
    pub const FILE_HASH: &str = "fileHash";
}
