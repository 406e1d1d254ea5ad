//! # Header Chunk Layout
//!
//! Chunk 0 of every database file starts with a fixed header: the database
//! version followed by one free-list head per block-size bucket. The header
//! occupies exactly [`DATA_AREA`] bytes; the rest of chunk 0 is free for the
//! caller's own root pointers.
//!
//! ```text
//! offset 0      version (i32, 0 = file incomplete)
//! offset 4      free-list head for blocks of 2 deltas (16 bytes)
//! offset 8      free-list head for blocks of 3 deltas (24 bytes)
//! ...
//! offset 2044   free-list head for blocks of 512 deltas (4096 bytes)
//! offset 2048   caller data area
//! ```
//!
//! Free-list heads are compressed free-block pointers (`offset >> 3`).
//!
//! ## Endianness
//!
//! All multi-byte fields are big-endian, like every other integer in the file.
//! The zerocopy `big_endian::I32`/`U32` wrappers perform the conversion.

use eyre::{ensure, Result};
use zerocopy::big_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    BLOCK_SIZE_DELTA, DATA_AREA, FREE_BLOCK_OFFSET, FREE_LIST_COUNT, INT_SIZE, MIN_BLOCK_DELTAS,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    version: I32,
    free_heads: [U32; FREE_LIST_COUNT],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == DATA_AREA);

impl FileHeader {
    crate::be_accessors! {
        version: i32,
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= DATA_AREA,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            DATA_AREA
        );
        Self::ref_from_bytes(&bytes[..DATA_AREA])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= DATA_AREA,
            "buffer too small for FileHeader: {} < {}",
            bytes.len(),
            DATA_AREA
        );
        Self::mut_from_bytes(&mut bytes[..DATA_AREA])
            .map_err(|e| eyre::eyre!("failed to parse FileHeader: {:?}", e))
    }

    /// Stored (compressed) head of the free list for `block_size`.
    pub fn free_head(&self, block_size: usize) -> u32 {
        self.free_heads[bucket_index(block_size)].get()
    }

    pub fn set_free_head(&mut self, block_size: usize, stored: u32) {
        self.free_heads[bucket_index(block_size)] = U32::new(stored);
    }

    /// Number of non-empty free lists.
    pub fn non_empty_lists(&self) -> usize {
        self.free_heads.iter().filter(|h| h.get() != 0).count()
    }
}

#[inline]
fn bucket_index(block_size: usize) -> usize {
    debug_assert!(
        block_size % BLOCK_SIZE_DELTA == 0,
        "block size {} is not a multiple of the delta",
        block_size
    );
    block_size / BLOCK_SIZE_DELTA - MIN_BLOCK_DELTAS
}

/// Byte offset in chunk 0 of the free-list head for `block_size`.
#[inline]
pub fn free_head_offset(block_size: usize) -> usize {
    FREE_BLOCK_OFFSET + bucket_index(block_size) * INT_SIZE
}
