use std::fmt;
use std::ops::Range;

use crate::TransferError;
use crate::file::FileHandle;

/// A contiguous byte range of the source file, the unit of transfer.
///
/// Chunks only reference their range; the bytes are read on demand through
/// [`Chunk::read`] so a large file is never held in memory as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Ordinal position, 0-based and contiguous.
    pub index: usize,
    /// Byte offset within the file.
    pub offset: u64,
    /// Size of this chunk in bytes.
    pub size: u64,
}

impl Chunk {
    /// Byte range covered by this chunk.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }

    /// Reads the chunk's content slice from `file`.
    pub fn read(&self, file: &dyn FileHandle) -> Result<Vec<u8>, TransferError> {
        file.read_range(self.offset, self.size)
    }
}

/// Content hash of a file, used as its dedup key and as the prefix of every
/// chunk key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity(String);

impl FileIdentity {
    /// Wraps a hex digest. Upper-case input is normalized to lower case.
    pub fn new(digest: impl Into<String>) -> Self {
        let mut digest = digest.into();
        digest.make_ascii_lowercase();
        Self(digest)
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Server-side key of chunk `index`: `{hash}-{index}`.
    pub fn chunk_key(&self, index: usize) -> String {
        chunkup_protocol::chunk_key(&self.0, index)
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
