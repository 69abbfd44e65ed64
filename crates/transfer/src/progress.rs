use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::{Chunk, FileIdentity};

/// Byte-level progress never reports a chunk as done; only a confirmed
/// completion does.
const MAX_IN_FLIGHT_PERCENTAGE: u8 = 99;

/// Notification sent when a chunk's percentage changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub index: usize,
    pub chunk_percentage: u8,
    /// File-level percentage after the change.
    pub overall: u8,
}

/// Callback invoked with progress updates.
pub type ProgressListener = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Point-in-time view of one chunk record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSnapshot {
    pub index: usize,
    pub key: String,
    pub size: u64,
    pub percentage: u8,
}

struct ChunkRecord {
    key: String,
    size: u64,
    percentage: AtomicU8,
}

/// Per-chunk transfer percentages and the file-level percentage derived
/// from them.
///
/// Records live in an arena addressed by chunk index. Updates are lock-free
/// so concurrent transfers can report without contending.
pub struct ProgressAggregator {
    identity: Option<FileIdentity>,
    file_size: u64,
    records: Vec<ChunkRecord>,
    listener: Option<ProgressListener>,
}

impl ProgressAggregator {
    /// Creates one record per chunk of the file identified by `identity`,
    /// all at 0%.
    pub fn new(identity: &FileIdentity, file_size: u64, chunks: &[Chunk]) -> Self {
        let records = chunks
            .iter()
            .map(|c| ChunkRecord {
                key: identity.chunk_key(c.index),
                size: c.size,
                percentage: AtomicU8::new(0),
            })
            .collect();
        Self {
            identity: Some(identity.clone()),
            file_size,
            records,
            listener: None,
        }
    }

    /// An aggregator with no file and no records.
    pub fn empty() -> Self {
        Self {
            identity: None,
            file_size: 0,
            records: Vec::new(),
            listener: None,
        }
    }

    /// Registers a callback for percentage changes.
    pub fn with_listener(mut self, listener: ProgressListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn identity(&self) -> Option<&FileIdentity> {
        self.identity.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Applies a byte-level progress report for chunk `index`.
    ///
    /// The percentage is `floor(loaded * 100 / total)`, capped at 99 and
    /// never lowered. Reports with `total == 0` or an unknown index are
    /// ignored.
    pub fn on_chunk_progress(&self, index: usize, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        let Some(record) = self.records.get(index) else {
            return;
        };

        let pct = (u128::from(loaded.min(total)) * 100 / u128::from(total)) as u8;
        let pct = pct.min(MAX_IN_FLIGHT_PERCENTAGE);
        let previous = record.percentage.fetch_max(pct, Ordering::AcqRel);
        if pct > previous {
            self.notify(index, pct);
        }
    }

    /// Marks chunk `index` as confirmed delivered (100%).
    pub fn complete(&self, index: usize) {
        self.set(index, 100);
    }

    /// Returns chunk `index` to 0% before it is transferred again.
    pub fn reset(&self, index: usize) {
        self.set(index, 0);
    }

    fn set(&self, index: usize, pct: u8) {
        let Some(record) = self.records.get(index) else {
            return;
        };
        if record.percentage.swap(pct, Ordering::AcqRel) != pct {
            self.notify(index, pct);
        }
    }

    fn notify(&self, index: usize, chunk_percentage: u8) {
        if let Some(listener) = &self.listener {
            listener(ProgressUpdate {
                index,
                chunk_percentage,
                overall: self.overall_percentage(),
            });
        }
    }

    /// Current percentage of chunk `index`.
    pub fn percentage(&self, index: usize) -> Option<u8> {
        self.records
            .get(index)
            .map(|r| r.percentage.load(Ordering::Acquire))
    }

    /// Number of chunks at 100%.
    pub fn completed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.percentage.load(Ordering::Acquire) == 100)
            .count()
    }

    /// File-level percentage: `floor(Σ size_i × pct_i / file_size)`.
    ///
    /// Returns 0 when there are no records or the file is empty.
    pub fn overall_percentage(&self) -> u8 {
        if self.records.is_empty() || self.file_size == 0 {
            return 0;
        }
        let loaded: u128 = self
            .records
            .iter()
            .map(|r| u128::from(r.size) * u128::from(r.percentage.load(Ordering::Acquire)))
            .sum();
        (loaded / u128::from(self.file_size)).min(100) as u8
    }

    /// Copies every record, in index order.
    pub fn snapshot(&self) -> Vec<ChunkSnapshot> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, r)| ChunkSnapshot {
                index,
                key: r.key.clone(),
                size: r.size,
                percentage: r.percentage.load(Ordering::Acquire),
            })
            .collect()
    }
}

/// Progress handle given to the transfer of one chunk.
///
/// Addresses the chunk's record by index; cloning is cheap.
#[derive(Clone)]
pub struct ChunkProgress {
    index: usize,
    aggregator: Arc<ProgressAggregator>,
}

impl ChunkProgress {
    pub fn new(index: usize, aggregator: Arc<ProgressAggregator>) -> Self {
        Self { index, aggregator }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Reports `loaded` of `total` bytes sent.
    pub fn report(&self, loaded: u64, total: u64) {
        self.aggregator.on_chunk_progress(self.index, loaded, total);
    }
}
