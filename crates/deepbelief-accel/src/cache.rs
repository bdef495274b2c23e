// Texture Cache — keeps uploaded weight textures alive between runs
//
// Uploading a weight matrix costs far more than sampling it, and the same
// weights feed every forward pass. The cache maps a (buffer, tile, layout)
// key to the texture built from it the first time around.
//
// An entry is only valid while the buffer it came from is unchanged: each
// entry records the buffer's write generation and the texture shape, and a
// lookup that disagrees on either drops the stale texture and uploads again.
//
// Keys hold the identity of one buffer handle, so a B operand that is
// dropped after the call leaves its texture behind until `release`. The
// cache holds at most `capacity` textures and drops the least recently used
// one to make room.
//
// Usage (through AccelBackend):
//
//   let texture = cache.get_or_upload(key, shape, generation, || upload())?;
//   let stats = cache.stats();
//   cache.release(buffer.id());     // forget one buffer
//   cache.clear();                  // forget everything

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use deepbelief_core::{BufferId, Error, Result};
use tracing::trace;

use crate::config::DEFAULT_MAX_CACHED_TEXTURES;
use crate::substrate::{TextureHandle, TextureShape};

/// Snapshot of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served by an existing texture.
    pub hits: u64,
    /// Lookups that had to upload.
    pub misses: u64,
    /// Entries dropped because their buffer changed or the cache was full.
    pub evictions: u64,
    /// Textures currently held.
    pub cached_textures: usize,
}

/// Identifies one uploaded slice of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub buffer: BufferId,
    /// First element of the reduction range covered by the texture.
    pub tile: usize,
    pub packed: bool,
    /// `(row_stride, col_stride, offset)` of the operand view.
    pub strides: (usize, usize, usize),
}

struct Entry {
    shape: TextureShape,
    generation: u64,
    last_used: u64,
    handle: Arc<TextureHandle>,
}

pub struct TextureCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_CACHED_TEXTURES)
    }
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` textures (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        TextureCache {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Substrate("texture cache lock poisoned".to_string()))
    }

    /// Return the texture for `key`, calling `upload` when there is none or
    /// the cached one no longer matches `shape` and `generation`.
    pub fn get_or_upload<F>(
        &self,
        key: CacheKey,
        shape: TextureShape,
        generation: u64,
        upload: F,
    ) -> Result<Arc<TextureHandle>>
    where
        F: FnOnce() -> Result<TextureHandle>,
    {
        let mut entries = self.lock()?;
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = entries.get_mut(&key) {
            if entry.shape == shape && entry.generation == generation {
                entry.last_used = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.handle));
            }
            trace!(buffer = %key.buffer, tile = key.tile, "evict stale texture");
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(upload()?);
        while entries.len() >= self.capacity {
            let Some(oldest) = entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| *k)
            else {
                break;
            };
            trace!(buffer = %oldest.buffer, tile = oldest.tile, "evict least recently used texture");
            entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        entries.insert(
            key,
            Entry {
                shape,
                generation,
                last_used: now,
                handle: Arc::clone(&handle),
            },
        );
        Ok(handle)
    }

    /// Drop every texture uploaded from `buffer`. Returns how many went.
    pub fn release(&self, buffer: BufferId) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|key, _| key.buffer != buffer);
        before - entries.len()
    }

    /// Drop every cached texture. Returns how many went.
    pub fn clear(&self) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn stats(&self) -> CacheStats {
        let cached_textures = match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cached_textures,
        }
    }
}
