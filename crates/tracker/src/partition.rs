//! Splits the tracked MMSIs into per-connection batches
//!
//! aisstream accepts a bounded MMSI filter per subscription, so tracking a
//! large fleet takes several connections. Batching is order-preserving and
//! deterministic: the same catalog always yields the same batches.

use aistrack_catalog::Mmsi;
use std::num::NonZeroUsize;

/// Max MMSIs per aisstream subscription
pub const MAX_MMSI_PER_CONNECTION: usize = 50;

/// A fixed group of MMSIs owned by exactly one connection worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position in the partition, used as the shard label
    pub index: usize,
    pub mmsis: Vec<Mmsi>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.mmsis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmsis.is_empty()
    }

    pub fn contains(&self, mmsi: Mmsi) -> bool {
        self.mmsis.contains(&mmsi)
    }

    /// MMSIs as strings, the form the subscription filter expects
    pub fn mmsi_strings(&self) -> Vec<String> {
        self.mmsis.iter().map(|m| m.to_string()).collect()
    }
}

/// Partition `mmsis` into batches of at most `max_batch_size`.
///
/// Every batch but the last is full. An empty input yields no batches.
pub fn partition(mmsis: &[Mmsi], max_batch_size: NonZeroUsize) -> Vec<Batch> {
    mmsis
        .chunks(max_batch_size.get())
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            mmsis: chunk.to_vec(),
        })
        .collect()
}
