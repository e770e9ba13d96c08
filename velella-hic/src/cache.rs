//! Shared block cache — byte-bounded LRU of decoded interaction blocks
//! with single-flight loads.
//!
//! The cache is the only shared mutable structure in the query path. Its
//! mutex covers map lookup and LRU bookkeeping only; decompression and
//! decoding run outside the lock under a per-key pending token, so
//! concurrent requests for the same block share one decode while requests
//! for different blocks proceed in parallel.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Cache key: a block within one chromosome pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub chrom1_id: u32,
    pub chrom2_id: u32,
    pub block_id: u64,
}

/// One decoded pixel of a stored block, addressed by chromosome-relative
/// bin ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockPixel {
    pub bin1: u64,
    pub bin2: u64,
    pub count: f32,
}

/// A decoded matrix block. Immutable once published to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionBlock {
    pixels: Vec<BlockPixel>,
}

impl InteractionBlock {
    pub fn new(pixels: Vec<BlockPixel>) -> Self {
        Self { pixels }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[BlockPixel] {
        &self.pixels
    }

    /// Decoded size used for cache accounting.
    pub fn size_bytes(&self) -> usize {
        mem::size_of::<Self>() + self.pixels.len() * mem::size_of::<BlockPixel>()
    }
}

enum Slot {
    /// Decoded and available.
    Ready {
        block: Arc<InteractionBlock>,
        last_used: u64,
    },
    /// Some thread is currently loading this key.
    Pending,
}

struct CacheState {
    map: HashMap<BlockKey, Slot>,
    bytes: usize,
    tick: u64,
}

/// Byte-bounded LRU cache of decoded blocks, shared by all selectors of a
/// file handle.
pub struct BlockCache {
    state: Mutex<CacheState>,
    loaded: Condvar,
    capacity: usize,
}

impl BlockCache {
    /// Create a cache with a byte budget for decoded blocks.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                map: HashMap::new(),
                bytes: 0,
                tick: 0,
            }),
            loaded: Condvar::new(),
            capacity,
        }
    }

    /// Configured byte budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently accounted for by resident blocks.
    pub fn bytes_used(&self) -> usize {
        self.state.lock().bytes
    }

    /// Number of resident blocks.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state
            .map
            .values()
            .filter(|s| matches!(s, Slot::Ready { .. }))
            .count()
    }

    /// Whether the cache holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a block, loading it with `loader` on a miss.
    ///
    /// Concurrent calls for the same key share a single load: one caller
    /// runs `loader` while the others wait. A failed load releases the
    /// pending slot and surfaces the error to the caller that ran it;
    /// waiters retry (the next arrival re-runs the loader).
    pub fn get_or_load<E, F>(&self, key: BlockKey, loader: F) -> Result<Arc<InteractionBlock>, E>
    where
        F: FnOnce() -> Result<InteractionBlock, E>,
    {
        {
            let mut state = self.state.lock();
            loop {
                state.tick += 1;
                let tick = state.tick;
                let mut in_flight = false;
                match state.map.get_mut(&key) {
                    Some(Slot::Ready { block, last_used }) => {
                        *last_used = tick;
                        return Ok(Arc::clone(block));
                    }
                    Some(Slot::Pending) => in_flight = true,
                    None => {}
                }
                if in_flight {
                    self.loaded.wait(&mut state);
                } else {
                    state.map.insert(key, Slot::Pending);
                    break;
                }
            }
        }

        // Decode outside the lock. The guard releases the pending slot if
        // the loader errors or unwinds, so waiters are never stranded.
        let guard = PendingGuard { cache: self, key };
        let block = Arc::new(loader()?);
        mem::forget(guard);

        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let size = block.size_bytes();
        state.bytes += size;
        state.map.insert(
            key,
            Slot::Ready {
                block: Arc::clone(&block),
                last_used: tick,
            },
        );
        self.evict_over_budget(&mut state, key);
        drop(state);
        self.loaded.notify_all();
        Ok(block)
    }

    /// Drop one block from the cache, if resident. In-flight loads are left
    /// alone.
    pub fn evict(&self, key: BlockKey) {
        let mut state = self.state.lock();
        if matches!(state.map.get(&key), Some(Slot::Ready { .. })) {
            if let Some(Slot::Ready { block, .. }) = state.map.remove(&key) {
                state.bytes -= block.size_bytes();
            }
        }
    }

    /// Evict least-recently-used blocks until the budget holds. A block
    /// larger than the whole budget is handed to the caller but not kept.
    fn evict_over_budget(&self, state: &mut CacheState, just_inserted: BlockKey) {
        while state.bytes > self.capacity {
            let victim = state
                .map
                .iter()
                .filter_map(|(k, s)| match s {
                    Slot::Ready { last_used, .. } if *k != just_inserted => Some((*last_used, *k)),
                    _ => None,
                })
                .min_by_key(|&(last_used, _)| last_used)
                .map(|(_, k)| k);
            let key = match victim {
                Some(k) => k,
                // Nothing left to evict but the fresh block itself.
                None => just_inserted,
            };
            if let Some(Slot::Ready { block, .. }) = state.map.remove(&key) {
                state.bytes -= block.size_bytes();
                debug!(
                    chrom1 = key.chrom1_id,
                    chrom2 = key.chrom2_id,
                    block = key.block_id,
                    bytes = block.size_bytes(),
                    "evicted block"
                );
            }
            if key == just_inserted {
                break;
            }
        }
    }
}

struct PendingGuard<'a> {
    cache: &'a BlockCache,
    key: BlockKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.state.lock();
        if matches!(state.map.get(&self.key), Some(Slot::Pending)) {
            state.map.remove(&self.key);
        }
        drop(state);
        self.cache.loaded.notify_all();
    }
}
