//! # Record Pointers
//!
//! A record is addressed by the byte offset of its payload in the database
//! file. Payloads always start 2 bytes past an 8-byte aligned block boundary,
//! so offsets stored on disk are compressed into 32 bits:
//!
//! ```text
//! record pointer:  stored = (offset - 2) >> 3      offset = (stored << 3) + 2
//! free-list link:  stored = offset >> 3            offset = stored << 3
//! ```
//!
//! The stored value 0 means null for both encodings. Offset 2 would compress
//! to 0 as well, but it lies in the header chunk, which is never handed out
//! by the allocator.
//!
//! 32 stored bits cover `2^35` bytes, which is [`MAX_DB_SIZE`].

use std::fmt;

use crate::config::{BLOCK_HEADER_SIZE, BLOCK_SIZE_DELTA_BITS, MAX_DB_SIZE};

/// Offset of a record payload inside the database file. `NULL` is offset 0.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordPtr(u64);

impl RecordPtr {
    pub const NULL: RecordPtr = RecordPtr(0);

    /// Wraps a raw file offset. Callers outside the crate obtain pointers
    /// from `malloc` or by reading them from the file.
    #[inline]
    pub const fn from_offset(offset: u64) -> Self {
        RecordPtr(offset)
    }

    #[inline]
    pub const fn offset(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset of a field `delta` bytes into the record.
    #[inline]
    pub const fn field(self, delta: usize) -> u64 {
        self.0 + delta as u64
    }

    /// The pointer `delta` bytes further into the record.
    #[inline]
    pub const fn add(self, delta: usize) -> RecordPtr {
        RecordPtr(self.0 + delta as u64)
    }

    /// Compresses the pointer into its 32-bit on-disk form.
    #[inline]
    pub fn compress(self) -> u32 {
        compress_rec_ptr(self.0)
    }

    #[inline]
    pub fn expand(stored: u32) -> Self {
        RecordPtr(expand_rec_ptr(stored))
    }
}

impl fmt::Debug for RecordPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "RecordPtr(null)")
        } else {
            write!(f, "RecordPtr({})", self.0)
        }
    }
}

impl fmt::Display for RecordPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[inline]
pub fn compress_rec_ptr(offset: u64) -> u32 {
    if offset == 0 {
        return 0;
    }
    debug_assert!(offset < MAX_DB_SIZE, "record offset {} out of range", offset);
    ((offset - BLOCK_HEADER_SIZE as u64) >> BLOCK_SIZE_DELTA_BITS) as u32
}

#[inline]
pub fn expand_rec_ptr(stored: u32) -> u64 {
    if stored == 0 {
        return 0;
    }
    ((stored as u64) << BLOCK_SIZE_DELTA_BITS) + BLOCK_HEADER_SIZE as u64
}

#[inline]
pub fn compress_free_ptr(offset: u64) -> u32 {
    debug_assert!(offset < MAX_DB_SIZE, "free block offset {} out of range", offset);
    (offset >> BLOCK_SIZE_DELTA_BITS) as u32
}

#[inline]
pub fn expand_free_ptr(stored: u32) -> u64 {
    (stored as u64) << BLOCK_SIZE_DELTA_BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_pointer_compression_matches_layout() {
        assert_eq!(compress_rec_ptr(4098), 512);
        assert_eq!(expand_rec_ptr(512), 4098);
    }

    #[test]
    fn null_survives_compression() {
        assert_eq!(compress_rec_ptr(0), 0);
        assert_eq!(expand_rec_ptr(0), 0);
        assert!(RecordPtr::expand(0).is_null());
        assert_eq!(RecordPtr::NULL.compress(), 0);
    }

    #[test]
    fn largest_record_offset_fits_in_32_bits() {
        let last = MAX_DB_SIZE - 8 + 2;
        assert_eq!(compress_rec_ptr(last), u32::MAX);
        assert_eq!(expand_rec_ptr(u32::MAX), last);
    }

    #[test]
    fn free_pointer_round_trip() {
        assert_eq!(compress_free_ptr(4096), 512);
        assert_eq!(expand_free_ptr(512), 4096);
    }

    #[test]
    fn field_offsets_are_relative_to_payload() {
        let ptr = RecordPtr::from_offset(4098);
        assert_eq!(ptr.field(4), 4102);
        assert_eq!(ptr.add(8).offset(), 4106);
    }
}
