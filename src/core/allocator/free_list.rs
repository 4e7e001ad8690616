//! Ordered free-block list with merge-on-free

use crate::buffer::{RBuffer, WBuffer};
use crate::error::Result;
use crate::header::K_START_BIG_FILE;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bytes added to the trailing block when no free block fits a request
pub const GROWTH_INCREMENT: i64 = 1_000_000_000;

/// Minimum slack a split block must keep beyond the requested size
const MIN_SPLIT_SLACK: i64 = 3;

/// On-disk class version of a free segment
const FREE_SEGMENT_VERSION: i16 = 1;

/// A contiguous unused byte range, both bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBlock {
    pub first: i64,
    pub last: i64,
}

impl FreeBlock {
    pub fn new(first: i64, last: i64) -> Self {
        FreeBlock { first, last }
    }

    /// Number of bytes in the block
    pub fn len(&self) -> i64 {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// True when the bounds need 8-byte fields on disk
    pub fn is_large(&self) -> bool {
        self.last > K_START_BIG_FILE
    }

    /// Bytes this block occupies in the free segments record
    pub fn record_size(&self) -> i32 {
        if self.is_large() {
            18
        } else {
            10
        }
    }

    pub fn marshal(&self, w: &mut WBuffer) {
        if self.is_large() {
            w.write_i16(FREE_SEGMENT_VERSION + 1000);
            w.write_i64(self.first);
            w.write_i64(self.last);
        } else {
            w.write_i16(FREE_SEGMENT_VERSION);
            w.write_i32(self.first as i32);
            w.write_i32(self.last as i32);
        }
    }

    pub fn unmarshal(r: &mut RBuffer<'_>) -> Result<Self> {
        let version = r.read_i16();
        let block = if version > 1000 {
            FreeBlock::new(r.read_i64(), r.read_i64())
        } else {
            FreeBlock::new(r.read_i32() as i64, r.read_i32() as i64)
        };
        r.err()?;
        Ok(block)
    }
}

/// Free blocks ordered by `first`, disjoint and non-adjacent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeList {
    blocks: Vec<FreeBlock>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// List holding a single block
    pub fn with_block(first: i64, last: i64) -> Self {
        FreeList {
            blocks: vec![FreeBlock::new(first, last)],
        }
    }

    /// Mark `[first, last]` as free, merging with a neighbour when adjacent
    ///
    /// Scans left to right and acts on the first block that:
    /// - ends right before `first`: the block is extended to `last`, then
    ///   absorbs the following block if it now touches it (one merge at most);
    /// - starts right after `last`: the block is extended down to `first`;
    /// - starts after `first`: a new block is inserted before it.
    ///
    /// Returns the index touched, or `None` when no block applied (empty
    /// list, or a range past every block). The caller appends in that case.
    pub fn add(&mut self, first: i64, last: i64) -> Option<usize> {
        for i in 0..self.blocks.len() {
            let blk = self.blocks[i];
            if blk.last == first - 1 {
                self.blocks[i].last = last;
                let Some(&next) = self.blocks.get(i + 1) else {
                    return Some(i);
                };
                if next.first > last + 1 {
                    return Some(i);
                }
                self.blocks[i].last = next.last;
                self.blocks.remove(i + 1);
                return Some(i);
            }
            if blk.first == last + 1 {
                self.blocks[i].first = first;
                return Some(i);
            }
            if first < blk.first {
                self.blocks.insert(i, FreeBlock::new(first, last));
                return Some(i);
            }
        }
        None
    }

    /// [`add`](Self::add), appending the range when no block applied
    pub fn release(&mut self, first: i64, last: i64) -> usize {
        match self.add(first, last) {
            Some(i) => i,
            None => {
                self.blocks.push(FreeBlock::new(first, last));
                self.blocks.len() - 1
            }
        }
    }

    /// Index of the best block to hold `nbytes`
    ///
    /// An exact fit wins; otherwise the first block larger than
    /// `nbytes + 3`. When nothing qualifies the trailing block is grown by
    /// [`GROWTH_INCREMENT`] and returned. `None` only for an empty list.
    pub fn best(&mut self, nbytes: i64) -> Option<usize> {
        let mut candidate = None;
        for (i, blk) in self.blocks.iter().enumerate() {
            let nleft = blk.len();
            if nleft == nbytes {
                return Some(i);
            }
            if nleft > nbytes + MIN_SPLIT_SLACK && candidate.is_none() {
                candidate = Some(i);
            }
        }

        if candidate.is_some() {
            return candidate;
        }

        let last = self.blocks.len().checked_sub(1)?;
        self.blocks[last].last += GROWTH_INCREMENT;
        debug!(
            "Growing trailing free block to [{}, {}]",
            self.blocks[last].first, self.blocks[last].last
        );
        Some(last)
    }

    /// Remove a block previously returned by [`best`](Self::best)
    ///
    /// # Panics
    ///
    /// Panics if the block is not in the list.
    pub fn remove(&mut self, block: FreeBlock) {
        let Some(i) = self.blocks.iter().position(|b| *b == block) else {
            panic!(
                "free block [{}, {}] is not in the free list",
                block.first, block.last
            );
        };
        self.blocks.remove(i);
    }

    /// Carve `nbytes` out of the best block, returning the record's offset
    ///
    /// An exactly consumed block is removed; otherwise its start moves past
    /// the new record. `None` if the list is empty or cannot grow enough.
    pub fn allocate(&mut self, nbytes: i64) -> Option<i64> {
        let idx = self.best(nbytes)?;
        let blk = self.blocks[idx];
        let seek = blk.first;
        let left = blk.last - seek - nbytes + 1;

        if left < 0 {
            return None;
        }
        if left == 0 {
            self.remove(blk);
        } else {
            self.blocks[idx].first = seek + nbytes;
        }

        debug!("Allocated {} bytes at {}", nbytes, seek);
        Some(seek)
    }

    /// Start of the trailing block, i.e. the current end of file
    pub fn trailing_first(&self) -> Option<i64> {
        self.blocks.last().map(|b| b.first)
    }

    pub fn get(&self, idx: usize) -> Option<&FreeBlock> {
        self.blocks.get(idx)
    }

    pub fn blocks(&self) -> &[FreeBlock] {
        &self.blocks
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreeBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total free bytes, excluding the open-ended trailing block
    pub fn interior_free_bytes(&self) -> i64 {
        let n = self.blocks.len().saturating_sub(1);
        self.blocks[..n].iter().map(FreeBlock::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(blocks: &[(i64, i64)]) -> FreeList {
        let mut l = FreeList::new();
        for &(first, last) in blocks {
            l.blocks.push(FreeBlock::new(first, last));
        }
        l
    }

    #[test]
    fn test_add_to_empty_list_is_not_inserted() {
        let mut l = FreeList::new();
        assert_eq!(l.add(0, 9), None);
        assert!(l.is_empty());

        assert_eq!(l.release(0, 9), 0);
        assert_eq!(l.blocks(), &[FreeBlock::new(0, 9)]);
    }

    #[test]
    fn test_merge_forward() {
        let mut l = FreeList::new();
        l.release(0, 9);
        l.release(10, 19);
        assert_eq!(l.blocks(), &[FreeBlock::new(0, 19)]);
    }

    #[test]
    fn test_merge_reverse_order() {
        let mut l = FreeList::new();
        l.release(10, 19);
        l.release(0, 9);
        assert_eq!(l.blocks(), &[FreeBlock::new(0, 19)]);
    }

    #[test]
    fn test_add_fills_gap_and_merges_right() {
        let mut l = list(&[(0, 9), (20, 29)]);
        assert_eq!(l.add(10, 19), Some(0));
        assert_eq!(l.blocks(), &[FreeBlock::new(0, 29)]);
    }

    #[test]
    fn test_add_inserts_disjoint_block() {
        let mut l = list(&[(0, 9), (50, 59)]);
        assert_eq!(l.add(20, 29), Some(1));
        assert_eq!(
            l.blocks(),
            &[
                FreeBlock::new(0, 9),
                FreeBlock::new(20, 29),
                FreeBlock::new(50, 59)
            ]
        );
    }

    #[test]
    fn test_add_past_every_block() {
        let mut l = list(&[(0, 9)]);
        assert_eq!(l.add(20, 29), None);
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn test_best_prefers_exact_match() {
        let mut l = list(&[(0, 99), (200, 209)]);
        let idx = l.best(10).unwrap();
        assert_eq!(l.get(idx), Some(&FreeBlock::new(200, 209)));
    }

    #[test]
    fn test_best_requires_slack() {
        // 13 bytes is not more than 10 + 3, 14 bytes is
        let mut l = list(&[(0, 12), (100, 113), (1000, 5000)]);
        let idx = l.best(10).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_best_grows_trailing_block() {
        let mut l = list(&[(0, 5), (100, 112)]);
        let idx = l.best(10).unwrap();
        assert_eq!(idx, 1);
        let blk = *l.get(idx).unwrap();
        assert_eq!(blk, FreeBlock::new(100, 112 + GROWTH_INCREMENT));
        assert!(blk.len() >= 10);
    }

    #[test]
    fn test_best_on_empty_list() {
        let mut l = FreeList::new();
        assert_eq!(l.best(10), None);
        assert_eq!(l.allocate(10), None);
    }

    #[test]
    fn test_remove() {
        let mut l = list(&[(0, 9), (20, 29)]);
        l.remove(FreeBlock::new(0, 9));
        assert_eq!(l.blocks(), &[FreeBlock::new(20, 29)]);
    }

    #[test]
    #[should_panic(expected = "not in the free list")]
    fn test_remove_unknown_block_panics() {
        let mut l = list(&[(0, 9)]);
        l.remove(FreeBlock::new(0, 8));
    }

    #[test]
    fn test_allocate_from_trailing_block() {
        let mut l = FreeList::with_block(100, K_START_BIG_FILE);
        assert_eq!(l.allocate(58), Some(100));
        assert_eq!(l.allocate(42), Some(158));
        assert_eq!(l.trailing_first(), Some(200));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn test_allocate_exact_gap_removes_block() {
        let mut l = list(&[(300, 339), (1000, K_START_BIG_FILE)]);
        assert_eq!(l.allocate(40), Some(300));
        assert_eq!(l.blocks(), &[FreeBlock::new(1000, K_START_BIG_FILE)]);
    }

    #[test]
    fn test_interior_free_bytes() {
        let l = list(&[(300, 339), (500, 509), (1000, K_START_BIG_FILE)]);
        assert_eq!(l.interior_free_bytes(), 50);
    }

    #[test]
    fn test_segment_record_widths() {
        let small = FreeBlock::new(100, K_START_BIG_FILE);
        let large = FreeBlock::new(100, K_START_BIG_FILE + GROWTH_INCREMENT);

        let mut w = WBuffer::new();
        small.marshal(&mut w);
        large.marshal(&mut w);
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes.len() as i32, small.record_size() + large.record_size());
        assert_eq!(bytes.len(), 28);

        let mut r = RBuffer::new(&bytes);
        assert_eq!(FreeBlock::unmarshal(&mut r).unwrap(), small);
        assert_eq!(FreeBlock::unmarshal(&mut r).unwrap(), large);
    }
}
