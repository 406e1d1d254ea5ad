//! # Chunks
//!
//! A [`Chunk`] is the in-memory mirror of one 4096-byte page of the database
//! file. All typed accessors take a database offset and reduce it to an
//! in-chunk index with `offset & (CHUNK_SIZE - 1)`; the caller is responsible
//! for routing the offset to the right chunk.
//!
//! ## Flags
//!
//! ```text
//! dirty        modified since the last flush
//! locked       pinned: fetched under the exclusive lock, must not be evicted
//!              and must stay in the owner's chunk table until flushed
//! cache_hit    CLOCK reference bit, set on every cache hit
//! cache_index  slot in the chunk cache ring, NOT_CACHED when absent
//! ```
//!
//! Flags are atomics so readers can touch a chunk without holding the
//! cache lock. The byte buffer itself sits behind a `RwLock`.
//!
//! ## Byte Order
//!
//! Every multi-byte value is big-endian. Record pointers are stored in the
//! 4-byte compressed form described in [`super::pointer`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::pointer::{compress_free_ptr, compress_rec_ptr, expand_free_ptr, expand_rec_ptr};
use super::RecordPtr;
use crate::config::{CHUNK_SIZE, OFFSET_IN_CHUNK_MASK};

/// Sentinel `cache_index` of a chunk that is not in any cache slot.
pub const NOT_CACHED: usize = usize::MAX;

/// Receives chunks evicted from a [`super::ChunkCache`].
///
/// Implemented by the owner of a chunk table: eviction asks the owner to drop
/// its reference so the chunk's memory can be reclaimed.
pub trait ChunkOwner: Send + Sync {
    fn release_chunk(&self, chunk: &Arc<Chunk>);
}

pub struct Chunk {
    sequence: u32,
    data: RwLock<Box<[u8; CHUNK_SIZE]>>,
    dirty: AtomicBool,
    locked: AtomicBool,
    cache_hit: AtomicBool,
    cache_index: AtomicUsize,
    owner: Weak<dyn ChunkOwner>,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("sequence", &self.sequence)
            .field("dirty", &self.is_dirty())
            .field("locked", &self.is_locked())
            .field("cache_index", &self.cache_index())
            .finish()
    }
}

macro_rules! be_int_accessors {
    ($($get:ident, $put:ident => $ty:ty);* $(;)?) => {
        $(
            #[inline]
            pub fn $get(&self, offset: u64) -> $ty {
                const N: usize = std::mem::size_of::<$ty>();
                let idx = index(offset);
                let data = self.data.read();
                let mut buf = [0u8; N];
                buf.copy_from_slice(&data[idx..idx + N]);
                <$ty>::from_be_bytes(buf)
            }

            #[inline]
            pub fn $put(&self, offset: u64, value: $ty) {
                const N: usize = std::mem::size_of::<$ty>();
                let idx = index(offset);
                self.mark_dirty();
                self.data.write()[idx..idx + N].copy_from_slice(&value.to_be_bytes());
            }
        )*
    };
}

#[inline]
fn index(offset: u64) -> usize {
    (offset & OFFSET_IN_CHUNK_MASK) as usize
}

impl Chunk {
    pub fn new(owner: Weak<dyn ChunkOwner>, sequence: u32) -> Self {
        Self::with_data(owner, sequence, Box::new([0u8; CHUNK_SIZE]))
    }

    pub fn with_data(
        owner: Weak<dyn ChunkOwner>,
        sequence: u32,
        data: Box<[u8; CHUNK_SIZE]>,
    ) -> Self {
        Self {
            sequence,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            cache_hit: AtomicBool::new(false),
            cache_index: AtomicUsize::new(NOT_CACHED),
            owner,
        }
    }

    /// Index of this chunk in the file; chunk `n` covers bytes
    /// `n * CHUNK_SIZE .. (n + 1) * CHUNK_SIZE`.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn file_offset(&self) -> u64 {
        self.sequence as u64 * CHUNK_SIZE as u64
    }

    pub fn owner(&self) -> Option<Arc<dyn ChunkOwner>> {
        self.owner.upgrade()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        debug_assert!(
            self.is_locked(),
            "chunk {} modified without being locked",
            self.sequence
        );
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    pub(crate) fn cache_hit(&self) -> bool {
        self.cache_hit.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cache_hit(&self, hit: bool) {
        self.cache_hit.store(hit, Ordering::Relaxed);
    }

    pub fn cache_index(&self) -> usize {
        self.cache_index.load(Ordering::Acquire)
    }

    pub fn is_cached(&self) -> bool {
        self.cache_index() != NOT_CACHED
    }

    pub(crate) fn set_cache_index(&self, index: usize) {
        self.cache_index.store(index, Ordering::Release);
    }

    /// Runs `f` over the raw page bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8; CHUNK_SIZE]) -> R) -> R {
        f(&self.data.read())
    }

    /// Runs `f` over the raw page bytes for modification and marks the
    /// chunk dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8; CHUNK_SIZE]) -> R) -> R {
        self.mark_dirty();
        f(&mut self.data.write())
    }

    pub fn copy_to(&self, out: &mut [u8; CHUNK_SIZE]) {
        out.copy_from_slice(&self.data.read()[..]);
    }

    be_int_accessors! {
        get_short, put_short => i16;
        get_int, put_int => i32;
        get_long, put_long => i64;
        get_char, put_char => u16;
    }

    #[inline]
    pub fn get_byte(&self, offset: u64) -> i8 {
        self.data.read()[index(offset)] as i8
    }

    #[inline]
    pub fn put_byte(&self, offset: u64, value: i8) {
        let idx = index(offset);
        self.mark_dirty();
        self.data.write()[idx] = value as u8;
    }

    /// Reads an unsigned 24-bit big-endian integer.
    pub fn get_3byte_uint(&self, offset: u64) -> u32 {
        let idx = index(offset);
        let data = self.data.read();
        u32::from_be_bytes([0, data[idx], data[idx + 1], data[idx + 2]])
    }

    pub fn put_3byte_uint(&self, offset: u64, value: u32) {
        debug_assert!(value < 1 << 24, "value {} does not fit in 3 bytes", value);
        let idx = index(offset);
        let bytes = value.to_be_bytes();
        self.mark_dirty();
        self.data.write()[idx..idx + 3].copy_from_slice(&bytes[1..]);
    }

    pub fn get_rec_ptr(&self, offset: u64) -> RecordPtr {
        RecordPtr::from_offset(expand_rec_ptr(self.get_int(offset) as u32))
    }

    pub fn put_rec_ptr(&self, offset: u64, ptr: RecordPtr) {
        self.put_int(offset, compress_rec_ptr(ptr.offset()) as i32);
    }

    pub fn get_free_rec_ptr(&self, offset: u64) -> u64 {
        expand_free_ptr(self.get_int(offset) as u32)
    }

    pub fn put_free_rec_ptr(&self, offset: u64, block: u64) {
        self.put_int(offset, compress_free_ptr(block) as i32);
    }

    pub fn get_bytes(&self, offset: u64, out: &mut [u8]) {
        let idx = index(offset);
        out.copy_from_slice(&self.data.read()[idx..idx + out.len()]);
    }

    pub fn put_bytes(&self, offset: u64, bytes: &[u8]) {
        let idx = index(offset);
        self.mark_dirty();
        self.data.write()[idx..idx + bytes.len()].copy_from_slice(bytes);
    }

    /// Zeroes `len` bytes starting at `offset`.
    pub fn clear(&self, offset: u64, len: usize) {
        let idx = index(offset);
        self.mark_dirty();
        self.data.write()[idx..idx + len].fill(0);
    }

    /// Reads UTF-16 code units stored two bytes each.
    pub fn get_chars(&self, offset: u64, out: &mut [u16]) {
        let idx = index(offset);
        let data = self.data.read();
        for (i, c) in out.iter_mut().enumerate() {
            let at = idx + i * 2;
            *c = u16::from_be_bytes([data[at], data[at + 1]]);
        }
    }

    pub fn put_chars(&self, offset: u64, chars: &[u16]) {
        let idx = index(offset);
        self.mark_dirty();
        let mut data = self.data.write();
        for (i, c) in chars.iter().enumerate() {
            let at = idx + i * 2;
            data[at..at + 2].copy_from_slice(&c.to_be_bytes());
        }
    }

    /// Reads single-byte characters, widening each to a code unit.
    pub fn get_chars_from_bytes(&self, offset: u64, out: &mut [u16]) {
        let idx = index(offset);
        let data = self.data.read();
        for (i, c) in out.iter_mut().enumerate() {
            *c = data[idx + i] as u16;
        }
    }

    /// Stores the low byte of each code unit. Callers only choose this
    /// encoding when every unit is below 0x100.
    pub fn put_chars_as_bytes(&self, offset: u64, chars: &[u16]) {
        let idx = index(offset);
        self.mark_dirty();
        let mut data = self.data.write();
        for (i, c) in chars.iter().enumerate() {
            debug_assert!(*c < 0x100, "code unit {:#x} does not fit in a byte", c);
            data[idx + i] = *c as u8;
        }
    }
}
