//! # CLOCK Chunk Cache
//!
//! This module implements the bounded pool of chunks shared by one or more
//! open databases. Replacement uses the CLOCK algorithm over a ring of slots.
//!
//! ## CLOCK
//!
//! Every cached chunk carries a reference bit (`cache_hit`):
//!
//! - On a hit: set the reference bit
//! - On insert into a full ring: scan slots starting at the hand
//!   - If the slot's chunk is locked: skip it, it is pinned by a writer
//!   - If its reference bit is set: clear it and advance (second chance)
//!   - Otherwise: evict it and reuse the slot for the new chunk
//!
//! ```text
//!            hand
//!             │
//!             v
//!   ┌────┬────┬────┬────┬────┐
//!   │ c3 │ c9 │ c4 │ c1 │ c7 │   ring of Arc<Chunk>
//!   │ R  │    │ L  │ R  │    │   R = reference bit, L = locked
//!   └────┴────┴────┴────┴────┘
//! ```
//!
//! Evicting a chunk only drops the cache's reference and asks the chunk's
//! owner (through [`ChunkOwner::release_chunk`]) to drop its table entry.
//! Dirty chunks are always locked, so eviction never loses data; they are
//! written back by the owning database's flush.
//!
//! ## Overcommit
//!
//! When every slot holds a locked chunk there is no victim. The new chunk is
//! then left uncached: a locked chunk stays alive in its owner's table until
//! flushed, an unlocked one is handed straight back to its owner.
//!
//! ## Lock Ordering
//!
//! All ring mutation happens under one mutex. Eviction calls back into the
//! owner while holding it, so owners must never call into the cache while
//! holding their own table lock: the order is always cache, then table.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::chunk::{Chunk, NOT_CACHED};
use crate::config::{CHUNK_SIZE, DEFAULT_CACHE_SIZE, MIN_CACHE_CHUNKS};

#[derive(Debug)]
struct ClockRing {
    slots: Vec<Arc<Chunk>>,
    hand: usize,
    capacity: usize,
}

impl ClockRing {
    fn advance(&mut self) {
        self.hand += 1;
        if self.hand >= self.slots.len() {
            self.hand = 0;
        }
    }

    /// Moves the hand to the next evictable slot and returns its index.
    fn find_victim(&mut self) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        if self.hand >= self.slots.len() {
            self.hand = 0;
        }
        // Two laps: the first may only clear reference bits.
        for _ in 0..self.slots.len() * 2 {
            let candidate = &self.slots[self.hand];
            if candidate.is_locked() {
                self.advance();
                continue;
            }
            if candidate.cache_hit() {
                candidate.set_cache_hit(false);
                self.advance();
                continue;
            }
            return Some(self.hand);
        }
        None
    }

    fn swap_remove(&mut self, index: usize) -> Arc<Chunk> {
        let removed = self.slots.swap_remove(index);
        removed.set_cache_index(NOT_CACHED);
        if let Some(moved) = self.slots.get(index) {
            moved.set_cache_index(index);
        }
        if self.hand >= self.slots.len() {
            self.hand = 0;
        }
        removed
    }
}

#[derive(Debug)]
pub struct ChunkCache {
    ring: Mutex<ClockRing>,
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

fn chunks_for_bytes(max_bytes: u64) -> usize {
    ((max_bytes / CHUNK_SIZE as u64) as usize).max(MIN_CACHE_CHUNKS)
}

impl ChunkCache {
    /// Creates a cache holding at most `max_bytes / CHUNK_SIZE` chunks.
    pub fn new(max_bytes: u64) -> Self {
        Self::with_capacity(chunks_for_bytes(max_bytes))
    }

    pub fn with_capacity(chunks: usize) -> Self {
        let capacity = chunks.max(MIN_CACHE_CHUNKS);
        Self {
            ring: Mutex::new(ClockRing {
                slots: Vec::with_capacity(capacity),
                hand: 0,
                capacity,
            }),
        }
    }

    /// Registers a use of `chunk`.
    ///
    /// A cached chunk only gets its reference bit set. Otherwise the chunk is
    /// inserted, evicting a victim when the ring is full. With `locked` the
    /// chunk is pinned before insertion so it cannot be chosen as a victim.
    pub fn add(&self, chunk: &Arc<Chunk>, locked: bool) {
        if locked {
            chunk.set_locked(true);
        }

        let mut ring = self.ring.lock();
        if chunk.is_cached() {
            chunk.set_cache_hit(true);
            return;
        }

        if ring.slots.len() < ring.capacity {
            let index = ring.slots.len();
            chunk.set_cache_index(index);
            ring.slots.push(Arc::clone(chunk));
            return;
        }

        match ring.find_victim() {
            Some(index) => {
                let victim = std::mem::replace(&mut ring.slots[index], Arc::clone(chunk));
                victim.set_cache_index(NOT_CACHED);
                chunk.set_cache_index(index);
                ring.advance();
                trace!(
                    target: "pdom::cache",
                    event = "evict",
                    victim = victim.sequence(),
                    slot = index
                );
                if let Some(owner) = victim.owner() {
                    owner.release_chunk(&victim);
                }
            }
            None => {
                debug!(
                    target: "pdom::cache",
                    event = "overcommit",
                    chunk = chunk.sequence(),
                    capacity = ring.capacity,
                    "all cached chunks are locked"
                );
                if !chunk.is_locked() {
                    if let Some(owner) = chunk.owner() {
                        owner.release_chunk(chunk);
                    }
                }
            }
        }
    }

    /// Removes `chunk` from the ring if present.
    pub fn remove(&self, chunk: &Arc<Chunk>) {
        let mut ring = self.ring.lock();
        let index = chunk.cache_index();
        if index == NOT_CACHED {
            return;
        }
        if ring
            .slots
            .get(index)
            .is_some_and(|slot| Arc::ptr_eq(slot, chunk))
        {
            ring.swap_remove(index);
        }
    }

    pub fn contains(&self, chunk: &Arc<Chunk>) -> bool {
        let ring = self.ring.lock();
        let index = chunk.cache_index();
        index != NOT_CACHED
            && ring
                .slots
                .get(index)
                .is_some_and(|slot| Arc::ptr_eq(slot, chunk))
    }

    /// Resizes the cache. When shrinking, unlocked chunks are evicted until
    /// the ring fits; locked ones stay until a later add can displace them.
    pub fn set_max_size(&self, max_bytes: u64) {
        let mut ring = self.ring.lock();
        ring.capacity = chunks_for_bytes(max_bytes);
        let mut released = Vec::new();
        while ring.slots.len() > ring.capacity {
            match ring.find_victim() {
                Some(index) => released.push(ring.swap_remove(index)),
                None => break,
            }
        }
        debug!(
            target: "pdom::cache",
            event = "resize",
            capacity = ring.capacity,
            evicted = released.len()
        );
        for victim in &released {
            if let Some(owner) = victim.owner() {
                owner.release_chunk(victim);
            }
        }
    }

    pub fn max_size(&self) -> u64 {
        self.capacity() as u64 * CHUNK_SIZE as u64
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunk::ChunkOwner;
    use std::sync::Weak;

    #[derive(Default)]
    struct RecordingOwner {
        released: Mutex<Vec<u32>>,
    }

    impl ChunkOwner for RecordingOwner {
        fn release_chunk(&self, chunk: &Arc<Chunk>) {
            self.released.lock().push(chunk.sequence());
        }
    }

    fn chunks(owner: &Arc<RecordingOwner>, n: u32) -> Vec<Arc<Chunk>> {
        let weak: Weak<dyn ChunkOwner> = Arc::downgrade(owner) as Weak<dyn ChunkOwner>;
        (1..=n)
            .map(|seq| Arc::new(Chunk::new(weak.clone(), seq)))
            .collect()
    }

    #[test]
    fn test_cache_add_until_full() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(3);
        let all = chunks(&owner, 3);
        for chunk in &all {
            cache.add(chunk, false);
        }
        assert_eq!(cache.len(), 3);
        assert!(all.iter().all(|c| cache.contains(c)));
        assert!(owner.released.lock().is_empty());
    }

    #[test]
    fn test_cache_evicts_first_unreferenced() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(3);
        let all = chunks(&owner, 4);
        for chunk in &all[..3] {
            cache.add(chunk, false);
        }
        cache.add(&all[3], false);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&all[0]));
        assert!(cache.contains(&all[3]));
        assert_eq!(*owner.released.lock(), vec![1]);
    }

    #[test]
    fn test_cache_second_chance_for_referenced_chunk() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(3);
        let all = chunks(&owner, 4);
        for chunk in &all[..3] {
            cache.add(chunk, false);
        }
        cache.add(&all[0], false);
        cache.add(&all[3], false);

        assert!(cache.contains(&all[0]));
        assert!(!cache.contains(&all[1]));
        assert_eq!(*owner.released.lock(), vec![2]);
    }

    #[test]
    fn test_cache_never_evicts_locked_chunk() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(2);
        let all = chunks(&owner, 3);
        cache.add(&all[0], true);
        cache.add(&all[1], false);
        cache.add(&all[2], false);

        assert!(cache.contains(&all[0]));
        assert!(!cache.contains(&all[1]));
        assert!(cache.contains(&all[2]));
    }

    #[test]
    fn test_cache_all_locked_leaves_new_chunk_uncached() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(2);
        let all = chunks(&owner, 4);
        cache.add(&all[0], true);
        cache.add(&all[1], true);

        cache.add(&all[2], true);
        assert!(!all[2].is_cached());
        assert!(owner.released.lock().is_empty());

        cache.add(&all[3], false);
        assert!(!all[3].is_cached());
        assert_eq!(*owner.released.lock(), vec![4]);
    }

    #[test]
    fn test_cache_remove_fixes_moved_slot() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(3);
        let all = chunks(&owner, 3);
        for chunk in &all {
            cache.add(chunk, false);
        }
        cache.remove(&all[0]);

        assert_eq!(cache.len(), 2);
        assert!(!all[0].is_cached());
        assert_eq!(all[2].cache_index(), 0);
        assert!(cache.contains(&all[2]));
        assert!(cache.contains(&all[1]));
    }

    #[test]
    fn test_cache_shrink_evicts_unlocked() {
        let owner = Arc::new(RecordingOwner::default());
        let cache = ChunkCache::with_capacity(4);
        let all = chunks(&owner, 4);
        cache.add(&all[0], true);
        for chunk in &all[1..] {
            cache.add(chunk, false);
        }
        cache.set_max_size(2 * CHUNK_SIZE as u64);

        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&all[0]));
        assert_eq!(owner.released.lock().len(), 2);
    }

    #[test]
    fn test_cache_size_in_bytes_rounds_to_chunks() {
        let cache = ChunkCache::new(10 * CHUNK_SIZE as u64 + 100);
        assert_eq!(cache.capacity(), 10);
        assert_eq!(cache.max_size(), 10 * CHUNK_SIZE as u64);
        assert_eq!(ChunkCache::new(0).capacity(), MIN_CACHE_CHUNKS);
    }
}
