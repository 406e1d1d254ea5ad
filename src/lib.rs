//! # PDOM - Persistent Single-File Record Store
//!
//! PDOM is an embedded, page-cached record store kept in one flat file. The
//! file is a sequence of 4 KiB chunks addressed by 64-bit byte offsets; on
//! top of it sit a block allocator, a B-tree index over records and string
//! storage.
//!
//! - **Byte-addressable records**: every stored value is a [`RecordPtr`]
//!   into the file, read and written with typed big-endian accessors
//! - **Bounded memory**: chunks are paged through a [`ChunkCache`] with
//!   CLOCK replacement, shareable between databases
//! - **Single writer, many readers**: mutation requires the database's
//!   exclusive lock; readers only touch the cache
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdom::{ChunkCache, Database};
//! use std::sync::Arc;
//!
//! let db = Database::builder()
//!     .path("./index.pdom")
//!     .cache(Arc::new(ChunkCache::default()))
//!     .open()?;
//!
//! db.set_exclusive_lock()?;
//! let record = db.malloc(10)?;
//! db.put_int(record.offset(), 42)?;
//! db.give_up_exclusive_lock(true)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  DbProperties │ RecordList │ External refs    │
//! ├───────────────┴────────────┴─────────────────┤
//! │   BTree index   │  Strings  │ Marshal / blobs │
//! ├──────────────────────────────────────────────┤
//! │    Database: allocator, typed I/O, locking    │
//! ├──────────────────────────────────────────────┤
//! │          Chunk + ChunkCache (CLOCK)           │
//! ├──────────────────────────────────────────────┤
//! │              DatabaseFile (pread)             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Data flows downward only: nothing below [`Database`] knows about trees
//! or strings.
//!
//! ## File Layout
//!
//! ```text
//! chunk 0:   | version | free-list heads (511) | caller data area |
//! chunk 1..: | blocks: [size i16][payload or free links] ...      |
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: chunks, the cache, the allocator and file I/O
//! - [`btree`]: B-tree index with pluggable comparators and visitors
//! - [`strings`]: short and long string records
//! - [`records`]: property map and linked list structures
//! - [`encoding`]: varints, the type marshal buffer and blob slots
//! - [`config`]: format constants and tunables

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod encoding;
pub mod error;
pub mod records;
pub mod storage;
pub mod strings;

pub use btree::{BTree, BTreeComparator, BTreeVisitor, IntegrityViolation};
pub use encoding::{TypeMarshalBuffer, TypeReference};
pub use error::DbError;
pub use records::{DbProperties, ExternalReferencesList, RecordList};
pub use storage::{ChunkCache, Database, DatabaseBuilder, RecordPtr};
pub use strings::DbString;
