//! Merge stage.
//!
//! Producers deliver ranges out of order and may overlap. The merge stage keeps
//! exactly one decoded block per block number and releases blocks strictly in
//! ascending order, only once every block below them has been covered by some
//! range.

use super::batcher::DecodedBlock;
use super::strategies::{FetchSource, FetchedRange};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::debug;

#[derive(Debug)]
pub struct MergeStage {
    /// Lowest block not yet released
    next_block: u64,
    /// Covered ranges at or above `next_block`, `from -> to`
    ranges: BTreeMap<u64, u64>,
    pending: BTreeMap<u64, (FetchSource, DecodedBlock)>,
}

impl MergeStage {
    pub fn new(start_block: u64) -> Self {
        Self {
            next_block: start_block,
            ranges: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Highest block through which everything has been released.
    pub fn processed_through(&self) -> Option<u64> {
        self.next_block.checked_sub(1)
    }

    /// Number of blocks held back waiting for earlier coverage.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn accept(&mut self, range: FetchedRange) {
        if range.to_block < self.next_block {
            debug!(
                "Discarding {:?} range {}..={}: already released through {}",
                range.source,
                range.from_block,
                range.to_block,
                self.next_block.saturating_sub(1)
            );
            return;
        }

        for block in range.blocks {
            let block_number = block.block_number();
            if block_number < self.next_block
                || block_number < range.from_block
                || block_number > range.to_block
            {
                debug!("Discarding block {} outside its usable range", block_number);
                continue;
            }

            match self.pending.entry(block_number) {
                Entry::Vacant(entry) => {
                    entry.insert((range.source, block));
                }
                Entry::Occupied(mut entry) => {
                    if range.source == FetchSource::Snapshot && entry.get().0 != FetchSource::Snapshot {
                        debug!("Snapshot batch replaces fetched batch for block {}", block_number);
                        entry.insert((range.source, block));
                    } else {
                        debug!("Dropping duplicate batch for block {}", block_number);
                    }
                }
            }
        }

        let from = range.from_block.max(self.next_block);
        let to = self.ranges.get(&from).map_or(range.to_block, |to| (*to).max(range.to_block));
        self.ranges.insert(from, to);
    }

    /// Release every block whose predecessors are all covered, ascending.
    pub fn drain_ready(&mut self) -> Vec<DecodedBlock> {
        while let Some((&from, &to)) = self.ranges.first_key_value() {
            if from > self.next_block {
                break;
            }
            self.ranges.remove(&from);
            if to >= self.next_block {
                self.next_block = to.saturating_add(1);
            }
        }

        let rest = self.pending.split_off(&self.next_block);
        let ready = std::mem::replace(&mut self.pending, rest);
        ready.into_values().map(|(_, block)| block).collect()
    }
}
