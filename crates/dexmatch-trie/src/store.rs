//! Keyed store interfaces and the in-memory reference store.
//!
//! The ordered index only needs [`StoreReader`] / [`StoreWriter`]. A durable
//! backing store additionally implements [`Database`]: it is shared between
//! trading states, locks internally, stages writes in a pending batch until
//! [`Database::commit`], and serves reads through a bounded cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use dexmatch_types::constants::DEFAULT_STORE_CACHE_SIZE;
use dexmatch_types::{DexError, Result};

/// Read access to a key → bytes store.
pub trait StoreReader {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Write access to a key → bytes store.
pub trait StoreWriter: StoreReader {
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

/// A shared, internally locked, batching store.
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Stage a write in the pending batch.
    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()>;
    /// Stage a delete in the pending batch.
    fn delete(&self, key: &[u8]) -> Result<()>;
    /// Make the pending batch durable.
    fn commit(&self) -> Result<()>;
}

impl<D: Database + ?Sized> Database for Arc<D> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key)
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }
}

/// Read-cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Bounded least-recently-used read cache.
///
/// Every lookup hit or fill stamps the entry with a fresh tick; eviction
/// drops the smallest tick.
struct ReadCache {
    entries: HashMap<Vec<u8>, (u64, Option<Vec<u8>>)>,
    /// tick -> key, oldest first.
    recency: BTreeMap<u64, Vec<u8>>,
    tick: u64,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl ReadCache {
    fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size),
            recency: BTreeMap::new(),
            tick: 0,
            max_size: max_size.max(1),
            hits: 0,
            misses: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn lookup(&mut self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let tick = self.next_tick();
        let Some((stamp, value)) = self.entries.get_mut(key) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        let prev = std::mem::replace(stamp, tick);
        let found = value.clone();
        if let Some(k) = self.recency.remove(&prev) {
            self.recency.insert(tick, k);
        }
        Some(found)
    }

    fn fill(&mut self, key: &[u8], value: Option<Vec<u8>>) {
        let tick = self.next_tick();
        if let Some((prev, _)) = self.entries.insert(key.to_vec(), (tick, value)) {
            self.recency.remove(&prev);
        } else if self.entries.len() > self.max_size {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
            }
        }
        self.recency.insert(tick, key.to_vec());
    }

    fn invalidate(&mut self, key: &[u8]) {
        if let Some((stamp, _)) = self.entries.remove(key) {
            self.recency.remove(&stamp);
        }
    }
}

struct Inner {
    durable: BTreeMap<Vec<u8>, Vec<u8>>,
    /// `None` marks a staged delete.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    cache: ReadCache,
}

/// In-memory [`Database`] with a pending batch and a bounded read cache.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                durable: BTreeMap::new(),
                pending: BTreeMap::new(),
                cache: ReadCache::new(cache_size),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| DexError::Store("memory store lock poisoned".into()))
    }

    /// Drop every staged write.
    pub fn discard_pending(&self) -> Result<()> {
        self.lock()?.pending.clear();
        Ok(())
    }

    /// Number of staged writes.
    pub fn pending_len(&self) -> Result<usize> {
        Ok(self.lock()?.pending.len())
    }

    /// Number of durable entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.durable.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        let inner = self.lock()?;
        Ok(CacheStats {
            hits: inner.cache.hits,
            misses: inner.cache.misses,
            entries: inner.cache.entries.len(),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CACHE_SIZE)
    }
}

impl Database for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.lock()?;
        if let Some(staged) = inner.pending.get(key) {
            return Ok(staged.clone());
        }
        if let Some(cached) = inner.cache.lookup(key) {
            return Ok(cached);
        }
        let value = inner.durable.get(key).cloned();
        inner.cache.fill(key, value.clone());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.lock()?.pending.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.lock()?.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let batch = std::mem::take(&mut inner.pending);
        let writes = batch.len();
        for (key, value) in batch {
            inner.cache.invalidate(&key);
            match value {
                Some(value) => {
                    inner.durable.insert(key, value);
                }
                None => {
                    inner.durable.remove(&key);
                }
            }
        }
        tracing::debug!(writes, entries = inner.durable.len(), "Store batch committed");
        Ok(())
    }
}

impl StoreReader for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Database::get(self, key)
    }
}

impl StoreWriter for MemoryStore {
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        Database::put(self, key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        Database::delete(self, key)
    }
}
