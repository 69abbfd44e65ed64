use crate::TransferError;
use crate::file::FileHandle;
use crate::types::Chunk;

/// Number of chunks a file of `file_size` bytes splits into.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Partitions `file_size` bytes into ordered chunks of `chunk_size` bytes.
///
/// Every chunk but the last is exactly `chunk_size`; the last holds the
/// remainder (or a full chunk when the size divides evenly). An empty file
/// yields no chunks.
pub fn split(file_size: u64, chunk_size: u64) -> Result<Vec<Chunk>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }

    let count = chunk_count(file_size, chunk_size) as usize;
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0u64;
    while offset < file_size {
        let size = chunk_size.min(file_size - offset);
        let index = chunks.len();
        chunks.push(Chunk {
            index,
            offset,
            size,
        });
        offset += size;
    }
    Ok(chunks)
}

/// Splits `file` by its current size.
pub fn split_file(file: &dyn FileHandle, chunk_size: u64) -> Result<Vec<Chunk>, TransferError> {
    split(file.size(), chunk_size)
}
