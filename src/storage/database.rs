//! # Database
//!
//! [`Database`] maps 64-bit file offsets to bytes through a table of chunks,
//! hands out blocks from a size-bucketed free-list allocator, and writes
//! dirty chunks back on flush.
//!
//! ## Chunk Table
//!
//! ```text
//! table[0]   header chunk: version + free-list heads, always locked,
//!            never placed in the cache
//! table[i]   Some(chunk) while the chunk is cached or locked,
//!            None once the cache evicted it (re-read from disk on demand)
//! ```
//!
//! The table is the [`ChunkOwner`] of its chunks. The cache calls back into
//! it on eviction to drop the table entry of an unlocked chunk.
//!
//! ## Single Writer
//!
//! Mutating operations require the exclusive lock, taken with
//! [`Database::set_exclusive_lock`]. The lock is a mode flag, not a mutex:
//! callers provide mutual exclusion between writers themselves, readers may
//! run concurrently. Mutations assert the flag in debug builds.
//!
//! Every chunk fetched while the exclusive lock is held is locked (pinned)
//! so the cache cannot drop it before it has been flushed. Giving up the
//! lock unlocks every clean chunk.
//!
//! ## Crash Detection
//!
//! Before the first dirty chunk of a session reaches the file, the version
//! field at offset 0 is overwritten with 0 on disk. The real version is only
//! written back after all dirty chunks and a sync, so a file whose version
//! reads as 0 on open was not completely flushed.
//!
//! ```text
//! flush:  [version := 0] -> dirty chunks -> sync -> [header + version] -> sync
//! ```

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::builder::DatabaseBuilder;
use super::cache::ChunkCache;
use super::chunk::{Chunk, ChunkOwner};
use super::file::DatabaseFile;
use super::RecordPtr;
use crate::config::{
    BLOCK_HEADER_SIZE, BLOCK_SIZE_DELTA, CHUNK_SIZE, INT_SIZE, MAX_BLOCK_DELTAS, MAX_DB_SIZE,
    MAX_MALLOC_SIZE, MIN_BLOCK_DELTAS, OFFSET_IN_CHUNK_MASK, PTR_SIZE, VERSION_OFFSET,
};
use crate::error::DbError;

/// Chunks of one database, indexed by sequence number.
#[derive(Debug, Default)]
pub(crate) struct ChunkTable {
    chunks: Mutex<Vec<Option<Arc<Chunk>>>>,
}

impl ChunkOwner for ChunkTable {
    fn release_chunk(&self, chunk: &Arc<Chunk>) {
        let mut chunks = self.chunks.lock();
        if chunk.is_locked() {
            return;
        }
        if let Some(slot) = chunks.get_mut(chunk.sequence() as usize) {
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, chunk)) {
                *slot = None;
            }
        }
    }
}

impl ChunkTable {
    fn snapshot(&self) -> Vec<Arc<Chunk>> {
        self.chunks.lock().iter().skip(1).flatten().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct FlushState {
    marked_incomplete: bool,
}

#[derive(Debug)]
pub struct Database {
    file: DatabaseFile,
    cache: Arc<ChunkCache>,
    table: Arc<ChunkTable>,
    header: Arc<Chunk>,
    version: AtomicI32,
    exclusive: AtomicBool,
    read_only: bool,
    was_incomplete: bool,
    setaside_chunks: u32,
    flush_state: Mutex<FlushState>,
    malloced: AtomicU64,
    freed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

macro_rules! typed_io {
    ($($get:ident, $put:ident => $ty:ty, $width:expr);* $(;)?) => {
        $(
            pub fn $get(&self, offset: u64) -> Result<$ty> {
                Ok(self.chunk_for_span(offset, $width)?.$get(offset))
            }

            pub fn $put(&self, offset: u64, value: $ty) -> Result<()> {
                self.assert_exclusive();
                self.chunk_for_span(offset, $width)?.$put(offset, value);
                Ok(())
            }
        )*
    };
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Opens `path` with default settings, creating the file if needed.
    pub fn open<P: AsRef<Path>>(path: P, cache: Arc<ChunkCache>) -> Result<Self> {
        DatabaseBuilder::new().path(path).cache(cache).open()
    }

    pub(crate) fn open_with(
        path: &Path,
        cache: Arc<ChunkCache>,
        version: i32,
        read_only: bool,
        setaside_chunks: u32,
    ) -> Result<Self> {
        let file = DatabaseFile::open(path, read_only)?;
        let file_len = file.len()?;
        if file_len > 0 && file_len < CHUNK_SIZE as u64 {
            bail!(DbError::corrupted(format!(
                "'{}' is {} bytes, shorter than its header chunk",
                path.display(),
                file_len
            )));
        }
        let chunks_on_disk = (file_len / CHUNK_SIZE as u64) as usize;

        let table = Arc::new(ChunkTable::default());
        let owner: Weak<dyn ChunkOwner> = Arc::downgrade(&table) as Weak<dyn ChunkOwner>;

        let mut data = Box::new([0u8; CHUNK_SIZE]);
        let (stored_version, chunk_count) = if chunks_on_disk == 0 {
            (version, 1)
        } else {
            file.read_at(0, &mut data[..])?;
            let stored = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            (stored, chunks_on_disk)
        };

        let header = Arc::new(Chunk::with_data(owner, 0, data));
        header.set_locked(true);
        {
            let mut chunks = table.chunks.lock();
            chunks.resize(chunk_count, None);
            chunks[0] = Some(Arc::clone(&header));
        }

        let was_incomplete = chunks_on_disk > 0 && stored_version == 0;
        if was_incomplete {
            warn!(
                target: "pdom::db",
                path = %path.display(),
                "database file was not completely written"
            );
        }

        info!(
            target: "pdom::db",
            path = %path.display(),
            chunks = chunk_count,
            version = stored_version,
            read_only,
            "opened database"
        );

        Ok(Self {
            file,
            cache,
            table,
            header,
            version: AtomicI32::new(stored_version),
            exclusive: AtomicBool::new(false),
            read_only,
            was_incomplete,
            setaside_chunks,
            flush_state: Mutex::new(FlushState::default()),
            malloced: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    pub fn location(&self) -> &Path {
        self.file.path()
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True when the file's version read as 0 on open, meaning a previous
    /// session did not finish flushing.
    pub fn was_incomplete(&self) -> bool {
        self.was_incomplete
    }

    pub fn version(&self) -> i32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: i32) -> Result<()> {
        self.assert_exclusive();
        self.header.put_int(VERSION_OFFSET as u64, version);
        self.version.store(version, Ordering::Release);
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.table.chunks.lock().len()
    }

    pub fn database_size(&self) -> u64 {
        self.chunk_count() as u64 * CHUNK_SIZE as u64
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn reset_cache_counters(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }

    /// Bytes handed out by `malloc` since the database was opened or cleared,
    /// including block headers and rounding.
    pub fn bytes_allocated(&self) -> u64 {
        self.malloced.load(Ordering::Relaxed)
    }

    pub fn bytes_freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn assert_exclusive(&self) {
        debug_assert!(
            self.is_exclusive(),
            "mutating {} without the exclusive lock",
            self.location().display()
        );
    }

    pub fn set_exclusive_lock(&self) -> Result<()> {
        if self.read_only {
            bail!(DbError::ReadOnly);
        }
        self.header.set_locked(true);
        self.exclusive.store(true, Ordering::Release);
        Ok(())
    }

    /// Leaves the exclusive mode. Clean chunks are unlocked. With `flush`
    /// all dirty chunks are written and the file is marked complete,
    /// otherwise only dirty chunks the cache no longer holds are written
    /// and the rest stay locked until the next flush.
    pub fn give_up_exclusive_lock(&self, flush: bool) -> Result<()> {
        if !self.is_exclusive() {
            return Ok(());
        }
        let mut dirty = Vec::new();
        for chunk in self.table.snapshot() {
            if !chunk.is_cached() {
                if chunk.is_dirty() {
                    dirty.push(chunk);
                } else {
                    chunk.set_locked(false);
                    self.drop_from_table(&chunk);
                }
            } else if chunk.is_locked() {
                if chunk.is_dirty() {
                    if flush {
                        dirty.push(chunk);
                    }
                } else {
                    chunk.set_locked(false);
                }
            } else {
                debug_assert!(!chunk.is_dirty(), "dirty chunk {} is unlocked", chunk.sequence());
            }
        }
        let result = self.flush_and_unlock_chunks(&dirty, flush);
        self.exclusive.store(false, Ordering::Release);
        result
    }

    /// Writes every dirty chunk and marks the file complete.
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        if self.is_exclusive() {
            let result = self.give_up_exclusive_lock(true);
            self.set_exclusive_lock()?;
            return result;
        }
        let dirty: Vec<_> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|c| c.is_dirty())
            .collect();
        self.flush_and_unlock_chunks(&dirty, true)
    }

    fn flush_and_unlock_chunks(&self, dirty: &[Arc<Chunk>], complete: bool) -> Result<()> {
        let mut state = self.flush_state.lock();
        if !dirty.is_empty() || self.header.is_dirty() {
            self.mark_file_incomplete(&mut state)?;
        }

        if !dirty.is_empty() {
            for chunk in dirty {
                if chunk.is_dirty() {
                    self.write_chunk(chunk, state.marked_incomplete)?;
                }
            }
            self.file.sync()?;
            for chunk in dirty {
                chunk.set_locked(false);
                if !chunk.is_cached() {
                    self.drop_from_table(chunk);
                }
            }
        }

        if complete && (self.header.is_dirty() || state.marked_incomplete) {
            self.header
                .put_int(VERSION_OFFSET as u64, self.version.load(Ordering::Acquire));
            self.write_chunk(&self.header, false)?;
            self.file.sync()?;
            state.marked_incomplete = false;
        }

        debug!(
            target: "pdom::db",
            event = "flush",
            chunks = dirty.len(),
            complete
        );
        Ok(())
    }

    fn mark_file_incomplete(&self, state: &mut FlushState) -> Result<()> {
        if !state.marked_incomplete {
            state.marked_incomplete = true;
            self.file
                .write_at(VERSION_OFFSET as u64, &[0u8; 4])
                .wrap_err("failed to mark database file incomplete")?;
        }
        Ok(())
    }

    /// Writes `chunk` back. With `incomplete` the header goes out with a
    /// zero version so a partial flush still reads as incomplete.
    fn write_chunk(&self, chunk: &Chunk, incomplete: bool) -> Result<()> {
        let mut buf = [0u8; CHUNK_SIZE];
        chunk.copy_to(&mut buf);
        if incomplete && chunk.sequence() == 0 {
            buf[VERSION_OFFSET..VERSION_OFFSET + INT_SIZE].fill(0);
        }
        self.file
            .write_at(chunk.file_offset(), &buf)
            .wrap_err_with(|| format!("failed to write chunk {}", chunk.sequence()))?;
        chunk.clear_dirty();
        Ok(())
    }

    fn drop_from_table(&self, chunk: &Arc<Chunk>) {
        let mut chunks = self.table.chunks.lock();
        if let Some(slot) = chunks.get_mut(chunk.sequence() as usize) {
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, chunk)) {
                *slot = None;
            }
        }
    }

    /// Returns the chunk containing `offset`, reading it from disk on first
    /// touch. Offsets in the first chunk resolve to the header chunk.
    pub fn get_chunk(&self, offset: u64) -> Result<Arc<Chunk>> {
        if offset < CHUNK_SIZE as u64 {
            return Ok(Arc::clone(&self.header));
        }
        let index = (offset / CHUNK_SIZE as u64) as usize;
        let exclusive = self.is_exclusive();

        let chunk = {
            let mut chunks = self.table.chunks.lock();
            let count = chunks.len();
            let Some(slot) = chunks.get_mut(index) else {
                bail!(DbError::corrupted(format!(
                    "offset {} lies beyond the last chunk ({} chunks)",
                    offset, count
                )));
            };
            match slot {
                Some(chunk) => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    if exclusive {
                        chunk.set_locked(true);
                    }
                    Arc::clone(chunk)
                }
                None => {
                    self.cache_misses.fetch_add(1, Ordering::Relaxed);
                    let mut data = Box::new([0u8; CHUNK_SIZE]);
                    self.file
                        .read_at(index as u64 * CHUNK_SIZE as u64, &mut data[..])?;
                    let owner: Weak<dyn ChunkOwner> =
                        Arc::downgrade(&self.table) as Weak<dyn ChunkOwner>;
                    let chunk = Arc::new(Chunk::with_data(owner, index as u32, data));
                    if exclusive {
                        chunk.set_locked(true);
                    }
                    *slot = Some(Arc::clone(&chunk));
                    chunk
                }
            }
        };

        self.cache.add(&chunk, exclusive);
        Ok(chunk)
    }

    /// Appends a zeroed, dirty chunk and returns its file offset.
    pub(crate) fn create_new_chunk(&self) -> Result<u64> {
        self.create_new_chunks(1)
    }

    /// Appends `count` chunks and returns the offset of the first. Only the
    /// last one is materialized; the ones before it read as zeroes.
    pub(crate) fn create_new_chunks(&self, count: u32) -> Result<u64> {
        self.assert_exclusive();
        ensure!(count > 0, "cannot create zero chunks");

        let (chunk, address) = {
            let mut chunks = self.table.chunks.lock();
            let first = chunks.len();
            let last = first + count as usize - 1;
            let address = first as u64 * CHUNK_SIZE as u64;
            let end = (last as u64 + 1) * CHUNK_SIZE as u64;
            if end > MAX_DB_SIZE {
                bail!(DbError::TooLarge {
                    location: self.location().display().to_string(),
                    max: MAX_DB_SIZE,
                });
            }
            let owner: Weak<dyn ChunkOwner> = Arc::downgrade(&self.table) as Weak<dyn ChunkOwner>;
            let chunk = Arc::new(Chunk::new(owner, last as u32));
            chunk.set_locked(true);
            chunk.mark_dirty();
            chunks.resize(last + 1, None);
            chunks[last] = Some(Arc::clone(&chunk));
            debug!(
                target: "pdom::db",
                event = "grow",
                first_chunk = first,
                count,
                address
            );
            (chunk, address)
        };

        self.cache.add(&chunk, true);
        Ok(address)
    }

    /// Allocates a zeroed record of at least `size` bytes.
    pub fn malloc(&self, size: usize) -> Result<RecordPtr> {
        self.assert_exclusive();
        ensure!(
            size <= MAX_MALLOC_SIZE,
            "cannot allocate {} bytes, the maximum is {}",
            size,
            MAX_MALLOC_SIZE
        );

        let need_deltas =
            ((size + BLOCK_HEADER_SIZE + BLOCK_SIZE_DELTA - 1) / BLOCK_SIZE_DELTA).max(MIN_BLOCK_DELTAS);

        let mut use_deltas = need_deltas;
        let mut block = 0;
        while use_deltas <= MAX_BLOCK_DELTAS {
            block = self.first_free_block(use_deltas * BLOCK_SIZE_DELTA)?;
            if block != 0 {
                break;
            }
            use_deltas += 1;
        }

        let chunk = if block == 0 {
            use_deltas = MAX_BLOCK_DELTAS;
            block = self.create_new_chunk()?;
            self.get_chunk(block)?
        } else {
            let chunk = self.get_chunk(block)?;
            self.remove_block(&chunk, use_deltas * BLOCK_SIZE_DELTA, block)?;
            chunk
        };

        let unused_deltas = use_deltas - need_deltas;
        if unused_deltas >= MIN_BLOCK_DELTAS {
            let rest = block + (need_deltas * BLOCK_SIZE_DELTA) as u64;
            self.add_block(&chunk, unused_deltas * BLOCK_SIZE_DELTA, rest)?;
            use_deltas = need_deltas;
        }

        let used_size = use_deltas * BLOCK_SIZE_DELTA;
        chunk.put_short(block, -(used_size as i16));
        chunk.clear(block + BLOCK_HEADER_SIZE as u64, used_size - BLOCK_HEADER_SIZE);
        self.malloced.fetch_add(used_size as u64, Ordering::Relaxed);

        Ok(RecordPtr::from_offset(block + BLOCK_HEADER_SIZE as u64))
    }

    /// Returns the record's block to its free list. Freeing null is a no-op.
    pub fn free(&self, ptr: RecordPtr) -> Result<()> {
        self.assert_exclusive();
        if ptr.is_null() {
            return Ok(());
        }
        ensure!(
            ptr.offset() >= (CHUNK_SIZE + BLOCK_HEADER_SIZE) as u64,
            DbError::corrupted(format!("record {} lies in the header chunk", ptr))
        );

        let block = ptr.offset() - BLOCK_HEADER_SIZE as u64;
        let chunk = self.chunk_for_span(block, BLOCK_HEADER_SIZE)?;
        let stored = chunk.get_short(block);
        if stored > 0 {
            bail!(DbError::DoubleFree {
                offset: ptr.offset()
            });
        }
        if stored == 0 {
            bail!(DbError::corrupted(format!(
                "record {} has no block header",
                ptr
            )));
        }
        let block_size = -(stored as i32) as usize;
        let in_chunk = (block & OFFSET_IN_CHUNK_MASK) as usize;
        if block_size % BLOCK_SIZE_DELTA != 0
            || !(MIN_BLOCK_DELTAS * BLOCK_SIZE_DELTA..=MAX_BLOCK_DELTAS * BLOCK_SIZE_DELTA)
                .contains(&block_size)
            || in_chunk + block_size > CHUNK_SIZE
        {
            bail!(DbError::corrupted(format!(
                "record {} has invalid block size {}",
                ptr, block_size
            )));
        }
        self.add_block(&chunk, block_size, block)?;
        self.freed.fetch_add(block_size as u64, Ordering::Relaxed);
        Ok(())
    }

    /// The chunk holding `len` bytes at `offset`. A span crossing a chunk
    /// boundary can only come from a corrupt pointer.
    fn chunk_for_span(&self, offset: u64, len: usize) -> Result<Arc<Chunk>> {
        let start = (offset & OFFSET_IN_CHUNK_MASK) as usize;
        if start + len > CHUNK_SIZE {
            bail!(DbError::corrupted(format!(
                "{} bytes at offset {} cross a chunk boundary",
                len, offset
            )));
        }
        self.get_chunk(offset)
    }

    typed_io! {
        get_byte, put_byte => i8, 1;
        get_short, put_short => i16, 2;
        get_int, put_int => i32, 4;
        get_long, put_long => i64, 8;
        get_char, put_char => u16, 2;
        get_3byte_uint, put_3byte_uint => u32, 3;
        get_rec_ptr, put_rec_ptr => RecordPtr, PTR_SIZE;
    }

    pub fn get_bytes(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.chunk_for_span(offset, out.len())?.get_bytes(offset, out);
        Ok(())
    }

    pub fn put_bytes(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.assert_exclusive();
        self.chunk_for_span(offset, bytes.len())?.put_bytes(offset, bytes);
        Ok(())
    }

    pub fn clear_bytes(&self, offset: u64, len: usize) -> Result<()> {
        self.assert_exclusive();
        self.chunk_for_span(offset, len)?.clear(offset, len);
        Ok(())
    }

    /// Copies `len` bytes between two records.
    pub fn memcpy(&self, dest: u64, source: u64, len: usize) -> Result<()> {
        self.assert_exclusive();
        let mut buf = vec![0u8; len];
        self.get_bytes(source, &mut buf)?;
        self.put_bytes(dest, &buf)
    }

    /// Discards all content. The file is truncated to the header chunk and
    /// the version reset to `version`.
    pub fn clear(&self, version: i32) -> Result<()> {
        self.assert_exclusive();
        self.remove_chunks_from_cache();

        self.header.clear(0, CHUNK_SIZE);
        {
            let mut chunks = self.table.chunks.lock();
            chunks.clear();
            chunks.push(Some(Arc::clone(&self.header)));
        }
        self.version.store(version, Ordering::Release);

        // The zeroed header doubles as the incomplete marker until the next
        // complete flush writes the version.
        self.flush_state.lock().marked_incomplete = true;
        self.write_chunk(&self.header, true)?;
        self.file.set_len(CHUNK_SIZE as u64)?;
        self.malloced.store(0, Ordering::Relaxed);
        self.freed.store(0, Ordering::Relaxed);

        info!(
            target: "pdom::db",
            path = %self.location().display(),
            version,
            "cleared database"
        );

        if self.setaside_chunks > 0 {
            self.set_version(version)?;
            self.create_new_chunks(self.setaside_chunks)?;
            self.flush()?;
        }
        Ok(())
    }

    fn remove_chunks_from_cache(&self) {
        for chunk in self.table.snapshot() {
            self.cache.remove(&chunk);
            chunk.set_locked(false);
            self.drop_from_table(&chunk);
        }
    }

    /// Flushes pending writes and releases the database's cache slots.
    pub fn close(self) -> Result<()> {
        if self.is_exclusive() {
            self.give_up_exclusive_lock(true)?;
        } else {
            self.flush()?;
        }
        info!(target: "pdom::db", path = %self.location().display(), "closed database");
        Ok(())
    }

    /// Copies the file as currently written to `out`.
    pub fn transfer_to(&self, out: &mut dyn Write) -> Result<u64> {
        let len = self.file.len()?;
        self.file.copy_to(len, out)
    }

    pub(crate) fn header(&self) -> &Arc<Chunk> {
        &self.header
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        for chunk in self.table.snapshot() {
            self.cache.remove(&chunk);
        }
    }
}
