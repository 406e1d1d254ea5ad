//! # Storage Module
//!
//! This module provides the paged storage layer: a single database file
//! divided into 4096-byte chunks, a shared CLOCK cache of chunks, and a
//! block allocator that hands out variable-size records addressed by file
//! offset.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Database                                     │
//! │   malloc / free / typed get+put by offset    │
//! ├───────────────────────┬──────────────────────┤
//! │ chunk table           │ free lists           │
//! │ Vec<Option<Arc<Chunk>>│ heads in chunk 0     │
//! ├───────────────────────┴──────────────────────┤
//! │ ChunkCache (CLOCK, shared between databases) │
//! ├──────────────────────────────────────────────┤
//! │ DatabaseFile (positional read/write)         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Data flows one way: records are read and written through the database,
//! which pages chunks in through the file and registers them with the cache.
//! Nothing in this module knows about B-trees or strings.
//!
//! ## File Layout
//!
//! ```text
//! +--------------------+
//! | chunk 0            |  version, 511 free-list heads, caller data area
//! +--------------------+
//! | chunk 1..n         |  blocks: [size: i16][payload or free links]
//! +--------------------+
//! ```
//!
//! Offsets are 64-bit; on disk a record pointer is compressed into 32 bits
//! (see [`pointer`]), which bounds the file at 32 GiB.
//!
//! ## Concurrency
//!
//! Readers may touch chunks concurrently; the cache and the chunk table each
//! have their own mutex, always acquired cache first. Writers are serialized
//! by the caller and announce themselves with
//! [`Database::set_exclusive_lock`].

mod builder;
mod cache;
mod chunk;
mod database;
mod file;
mod freelist;
pub mod headers;
pub mod pointer;

pub use builder::DatabaseBuilder;
pub use cache::ChunkCache;
pub use chunk::{Chunk, ChunkOwner, NOT_CACHED};
pub use database::Database;
pub use file::DatabaseFile;
pub use freelist::FreeBlockReport;
pub use headers::FileHeader;
pub use pointer::RecordPtr;
