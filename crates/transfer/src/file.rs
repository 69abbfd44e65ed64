use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::TransferError;

/// Read-only access to the file being uploaded.
///
/// Implementations are shared across concurrent chunk reads, each reading a
/// disjoint range, so they must be `Send + Sync`.
pub trait FileHandle: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, TransferError>;
}

// ---------------------------------------------------------------------------
// LocalFile
// ---------------------------------------------------------------------------

/// A file on local disk.
///
/// Reads seek a single handle under a mutex; the size is captured at open
/// time and the file is expected not to change during the session.
pub struct LocalFile {
    file: Mutex<std::fs::File>,
    path: PathBuf,
    size: u64,
}

impl LocalFile {
    /// Opens `path` for reading.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            size,
        })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileHandle for LocalFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
        let mut buf = vec![0u8; len as usize];
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// MemoryFile
// ---------------------------------------------------------------------------

/// File content held in memory.
#[derive(Clone)]
pub struct MemoryFile {
    data: Arc<[u8]>,
}

impl MemoryFile {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl FileHandle for MemoryFile {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
        let start = offset as usize;
        let end = start.checked_add(len as usize).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => Ok(self.data[start..end].to_vec()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {offset}+{len} exceeds {} bytes", self.data.len()),
            )
            .into()),
        }
    }
}
