//! # PDOM Configuration Constants
//!
//! This module centralizes the numeric layout constants of the database file.
//! Most of them are derived from three independent choices: the chunk size,
//! the allocator's block alignment, and the width of an on-disk pointer.
//! Derived values are co-located with their inputs and checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! CHUNK_SIZE (4096 bytes)
//!       │
//!       ├─> OFFSET_IN_CHUNK_MASK (CHUNK_SIZE - 1, requires power of two)
//!       │
//!       └─> MAX_BLOCK_DELTAS (CHUNK_SIZE / BLOCK_SIZE_DELTA)
//!             │     The largest block is exactly one chunk.
//!             │
//!             ├─> MAX_MALLOC_SIZE (largest block minus its 2-byte header)
//!             │
//!             └─> FREE_LIST_COUNT (one list per block size in
//!                   [MIN_BLOCK_DELTAS, MAX_BLOCK_DELTAS])
//!                   │
//!                   └─> DATA_AREA (version + one head per list)
//!
//! BLOCK_SIZE_DELTA_BITS (3)
//!       │
//!       ├─> BLOCK_SIZE_DELTA (8 bytes, allocation alignment)
//!       │
//!       └─> MAX_DB_SIZE (2^(32 + 3) = 32 GiB)
//!             A 32-bit dense pointer stores an offset shifted right by the
//!             delta bits, so the addressable range grows with the alignment.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `CHUNK_SIZE` is a power of two (offset masking relies on it)
//! 2. The header fields (`DATA_AREA`) fit in chunk 0
//! 3. A free block can hold its size field plus two free-list pointers
//! 4. `MAX_BLOCK_DELTAS * BLOCK_SIZE_DELTA` fits in the signed 16-bit size field
//!
//! ## Compatibility
//!
//! Every constant in the "FILE LAYOUT" section is part of the on-disk format.
//! Changing any of them makes existing database files unreadable; bump the
//! caller-supplied database version when doing so.

// ============================================================================
// FILE LAYOUT
// Changing any of these changes the on-disk format
// ============================================================================

/// Size of a chunk (page) in bytes. The file is a sequence of chunks.
pub const CHUNK_SIZE: usize = 4096;

/// Mask extracting the in-chunk part of a database offset.
pub const OFFSET_IN_CHUNK_MASK: u64 = CHUNK_SIZE as u64 - 1;

/// Size of an on-disk pointer, int or free-list link.
pub const INT_SIZE: usize = 4;

/// Size of a compressed record pointer.
pub const PTR_SIZE: usize = 4;

/// Size of the signed block-size field preceding every block.
pub const BLOCK_HEADER_SIZE: usize = 2;

/// log2 of the allocation granularity.
pub const BLOCK_SIZE_DELTA_BITS: u32 = 3;

/// Allocation granularity: every block size is a multiple of this.
pub const BLOCK_SIZE_DELTA: usize = 1 << BLOCK_SIZE_DELTA_BITS;

/// Smallest block, in deltas.
pub const MIN_BLOCK_DELTAS: usize = 2;

/// Largest block, in deltas. A block of this size fills a whole chunk.
pub const MAX_BLOCK_DELTAS: usize = CHUNK_SIZE / BLOCK_SIZE_DELTA;

/// Largest payload `malloc` accepts.
pub const MAX_MALLOC_SIZE: usize = MAX_BLOCK_DELTAS * BLOCK_SIZE_DELTA - BLOCK_HEADER_SIZE;

/// Offset of the previous-block link inside a free block.
pub const BLOCK_PREV_OFFSET: usize = BLOCK_HEADER_SIZE;

/// Offset of the next-block link inside a free block.
pub const BLOCK_NEXT_OFFSET: usize = BLOCK_HEADER_SIZE + INT_SIZE;

/// Offset of the database version in chunk 0.
pub const VERSION_OFFSET: usize = 0;

/// Offset of the first free-list head in chunk 0.
pub const FREE_BLOCK_OFFSET: usize = VERSION_OFFSET + INT_SIZE;

/// Number of size-bucketed free lists.
pub const FREE_LIST_COUNT: usize = MAX_BLOCK_DELTAS - MIN_BLOCK_DELTAS + 1;

/// First offset in chunk 0 that callers may use for their own root pointers.
pub const DATA_AREA: usize = FREE_BLOCK_OFFSET + FREE_LIST_COUNT * INT_SIZE;

/// Size of an inline type slot: one tag byte, one spare byte and a pointer.
pub const TYPE_SIZE: usize = 2 + PTR_SIZE;

/// Largest database the dense pointer encoding can address.
pub const MAX_DB_SIZE: u64 = 1u64 << (u32::BITS + BLOCK_SIZE_DELTA_BITS);

const _: () = assert!(
    CHUNK_SIZE.is_power_of_two(),
    "CHUNK_SIZE must be a power of two for offset masking"
);

const _: () = assert!(DATA_AREA <= CHUNK_SIZE, "header does not fit in chunk 0");

const _: () = assert!(
    MIN_BLOCK_DELTAS * BLOCK_SIZE_DELTA >= BLOCK_NEXT_OFFSET + INT_SIZE,
    "minimum block cannot hold its free-list links"
);

const _: () = assert!(
    MAX_BLOCK_DELTAS * BLOCK_SIZE_DELTA <= i16::MAX as usize + 1,
    "block sizes must fit the signed 16-bit size field"
);

const _: () = assert!(
    DATA_AREA % BLOCK_SIZE_DELTA == 0,
    "DATA_AREA derivation mismatch"
);

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Default size of a chunk cache in bytes (4 MiB).
pub const DEFAULT_CACHE_SIZE: u64 = 4 * 1024 * 1024;

/// Smallest cache that is accepted; smaller requests are rounded up.
pub const MIN_CACHE_CHUNKS: usize = 1;

// ============================================================================
// B-TREE CONFIGURATION
// ============================================================================

/// Default B-tree degree `t`: nodes hold `t-1 ..= 2t-1` records.
pub const DEFAULT_BTREE_DEGREE: usize = 8;

/// Smallest degree for which the B-tree algorithms are defined.
pub const MIN_BTREE_DEGREE: usize = 2;

// ============================================================================
// I/O CONFIGURATION
// ============================================================================

/// How many times an interrupted read or write is retried after reopening
/// the file before the error is reported.
pub const MAX_IO_RETRIES: usize = 20;

/// Version written to new databases when the caller does not pick one.
/// Version 0 is reserved as the "file incomplete" marker.
pub const DEFAULT_DB_VERSION: i32 = 1;

// ============================================================================
// DEBUG TUNABLES
// ============================================================================

/// Environment variable naming a count of filler chunks to reserve whenever
/// a database is cleared. Used to exercise large-offset pointer handling
/// without writing gigabytes of real data.
pub const SETASIDE_CHUNKS_ENV: &str = "PDOM_DENSE_RECPTR_SETASIDE_CHUNKS";
