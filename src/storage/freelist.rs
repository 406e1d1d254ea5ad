//! # Free-List Management
//!
//! Free blocks are kept in one doubly linked list per block size. The heads
//! live in the header chunk (see [`super::headers`]); the links live inside
//! the free blocks themselves.
//!
//! ## Free Block Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ------------------------------------------
//! 0       2     size in bytes, positive while free
//! 2       4     previous free block of this size (offset >> 3, 0 = none)
//! 6       4     next free block of this size (offset >> 3, 0 = none)
//! ```
//!
//! An allocated block stores its size negated and carries payload from
//! offset 2 on.
//!
//! ## Allocation Strategy
//!
//! `malloc` takes the head of the smallest non-empty list whose size is
//! large enough, splitting off the tail when it is at least the minimum block
//! size. `free` pushes the block onto the head of its list. Adjacent free
//! blocks are never coalesced: a chunk that was split stays split.
//!
//! ## Thread Safety
//!
//! Every function here mutates the header chunk or free blocks and requires
//! the exclusive lock.

use std::collections::BTreeMap;

use eyre::{bail, Result};
use tracing::debug;

use super::headers::FileHeader;
use super::pointer::expand_free_ptr;
use super::{Chunk, Database};
use crate::config::{
    BLOCK_NEXT_OFFSET, BLOCK_PREV_OFFSET, BLOCK_SIZE_DELTA, MAX_BLOCK_DELTAS, MIN_BLOCK_DELTAS,
};
use crate::error::DbError;

/// Free blocks found by [`Database::report_free_blocks`], keyed by size.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FreeBlockReport {
    pub blocks_by_size: BTreeMap<usize, usize>,
}

impl FreeBlockReport {
    pub fn block_count(&self) -> usize {
        self.blocks_by_size.values().sum()
    }

    pub fn free_bytes(&self) -> u64 {
        self.blocks_by_size
            .iter()
            .map(|(size, count)| (*size * *count) as u64)
            .sum()
    }
}

impl Database {
    /// Offset of the first free block of exactly `block_size` bytes, 0 if none.
    pub(crate) fn first_free_block(&self, block_size: usize) -> Result<u64> {
        let stored = self
            .header()
            .read(|data| FileHeader::from_bytes(&data[..]).map(|h| h.free_head(block_size)))?;
        Ok(expand_free_ptr(stored))
    }

    fn set_first_free_block(&self, block_size: usize, block: u64) -> Result<()> {
        self.assert_exclusive();
        let stored = super::pointer::compress_free_ptr(block);
        self.header().write(|data| {
            FileHeader::from_bytes_mut(&mut data[..]).map(|h| h.set_free_head(block_size, stored))
        })
    }

    /// Marks `block` free and pushes it onto the head of its list.
    pub(crate) fn add_block(&self, chunk: &Chunk, block_size: usize, block: u64) -> Result<()> {
        self.assert_exclusive();
        chunk.put_short(block, block_size as i16);

        let prev_first = self.first_free_block(block_size)?;
        chunk.put_free_rec_ptr(block + BLOCK_PREV_OFFSET as u64, 0);
        chunk.put_free_rec_ptr(block + BLOCK_NEXT_OFFSET as u64, prev_first);
        if prev_first != 0 {
            self.get_chunk(prev_first)?
                .put_free_rec_ptr(prev_first + BLOCK_PREV_OFFSET as u64, block);
        }
        self.set_first_free_block(block_size, block)
    }

    /// Unlinks `block` from its list. The size field is left for the caller.
    pub(crate) fn remove_block(&self, chunk: &Chunk, block_size: usize, block: u64) -> Result<()> {
        self.assert_exclusive();
        let prev = chunk.get_free_rec_ptr(block + BLOCK_PREV_OFFSET as u64);
        let next = chunk.get_free_rec_ptr(block + BLOCK_NEXT_OFFSET as u64);

        if prev != 0 {
            self.get_chunk(prev)?
                .put_free_rec_ptr(prev + BLOCK_NEXT_OFFSET as u64, next);
        } else {
            self.set_first_free_block(block_size, next)?;
        }
        if next != 0 {
            self.get_chunk(next)?
                .put_free_rec_ptr(next + BLOCK_PREV_OFFSET as u64, prev);
        }
        Ok(())
    }

    /// Walks every free list, checking that each block carries the size of
    /// its list and that back links match, and tallies the blocks found.
    pub fn report_free_blocks(&self) -> Result<FreeBlockReport> {
        let mut report = FreeBlockReport::default();
        let limit = self.chunk_count() * MAX_BLOCK_DELTAS;

        for deltas in MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS {
            let block_size = deltas * BLOCK_SIZE_DELTA;
            let mut prev = 0u64;
            let mut block = self.first_free_block(block_size)?;
            let mut count = 0usize;

            while block != 0 {
                let chunk = self.get_chunk(block)?;
                let stored = chunk.get_short(block);
                if stored as i32 != block_size as i32 {
                    bail!(DbError::corrupted(format!(
                        "free block at {} has size {} but is listed under {}",
                        block, stored, block_size
                    )));
                }
                let back = chunk.get_free_rec_ptr(block + BLOCK_PREV_OFFSET as u64);
                if back != prev {
                    bail!(DbError::corrupted(format!(
                        "free block at {} links back to {} instead of {}",
                        block, back, prev
                    )));
                }
                count += 1;
                if count > limit {
                    bail!(DbError::corrupted(format!(
                        "free list for size {} contains a cycle",
                        block_size
                    )));
                }
                prev = block;
                block = chunk.get_free_rec_ptr(block + BLOCK_NEXT_OFFSET as u64);
            }

            if count > 0 {
                report.blocks_by_size.insert(block_size, count);
            }
        }

        debug!(
            target: "pdom::db",
            event = "free_blocks",
            blocks = report.block_count(),
            bytes = report.free_bytes()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHUNK_SIZE, MAX_MALLOC_SIZE};
    use crate::storage::ChunkCache;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn exclusive_db(dir: &std::path::Path) -> Database {
        let db = Database::open(
            dir.join("free.pdom"),
            Arc::new(ChunkCache::with_capacity(16)),
        )
        .unwrap();
        db.set_exclusive_lock().unwrap();
        db
    }

    #[test]
    fn split_remainder_goes_to_its_bucket() {
        let dir = tempdir().unwrap();
        let db = exclusive_db(dir.path());
        db.malloc(10).unwrap();

        let report = db.report_free_blocks().unwrap();
        assert_eq!(report.block_count(), 1);
        assert_eq!(report.blocks_by_size.get(&(CHUNK_SIZE - 16)), Some(&1));
    }

    #[test]
    fn freed_blocks_are_pushed_at_list_head() {
        let dir = tempdir().unwrap();
        let db = exclusive_db(dir.path());
        let a = db.malloc(30).unwrap();
        let b = db.malloc(30).unwrap();
        db.free(a).unwrap();
        db.free(b).unwrap();

        assert_eq!(db.first_free_block(32).unwrap(), b.offset() - 2);
        let report = db.report_free_blocks().unwrap();
        assert_eq!(report.blocks_by_size.get(&32), Some(&2));

        assert_eq!(db.malloc(30).unwrap(), b);
        assert_eq!(db.malloc(30).unwrap(), a);
        assert_eq!(db.first_free_block(32).unwrap(), 0);
    }

    #[test]
    fn removing_middle_block_relinks_neighbours() {
        let dir = tempdir().unwrap();
        let db = exclusive_db(dir.path());
        let ptrs: Vec<_> = (0..3).map(|_| db.malloc(MAX_MALLOC_SIZE).unwrap()).collect();
        for p in &ptrs {
            db.free(*p).unwrap();
        }
        let middle = ptrs[1].offset() - 2;
        let chunk = db.get_chunk(middle).unwrap();
        db.remove_block(&chunk, CHUNK_SIZE, middle).unwrap();
        chunk.put_short(middle, -(CHUNK_SIZE as i16));

        let report = db.report_free_blocks().unwrap();
        assert_eq!(report.blocks_by_size.get(&CHUNK_SIZE), Some(&2));
    }

    #[test]
    fn corrupted_size_is_detected() {
        let dir = tempdir().unwrap();
        let db = exclusive_db(dir.path());
        let p = db.malloc(30).unwrap();
        db.free(p).unwrap();
        db.put_short(p.offset() - 2, 48).unwrap();

        let err = db.report_free_blocks().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::Corrupted { .. })
        ));
    }
}
