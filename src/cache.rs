//! Caching layer for frequently accessed weave data
//!
//! Provides LRU caching for:
//! - Wallet lists read back from disk, keyed by content hash
//! - Validation failure reasons, keyed by transaction id
use crate::blockchain::WalletList;
use crate::encoding::{BlockHash, TxId};
use crate::transaction::InvalidReason;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Generic, thread-safe LRU cache. Clones share the same storage.
pub struct ThreadSafeCache<K, V> {
    cache: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache; a zero capacity is treated as one.
    pub fn new_lru(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity_nz))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    /// Get a value and promote it to most recently used.
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.cache.lock().get(key).cloned()
    }

    /// Get a value without touching its recency.
    pub fn peek<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.cache.lock().peek(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.cache.lock().put(key, value);
    }

    pub fn remove<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq,
    {
        self.cache.lock().pop(key)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// (entries, capacity)
    pub fn stats(&self) -> (usize, usize) {
        let cache = self.cache.lock();
        (cache.len(), cache.cap().get())
    }
}

impl<K, V> Clone for ThreadSafeCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

/// Cache of decoded wallet lists
pub type WalletListCache = ThreadSafeCache<BlockHash, Arc<WalletList>>;

impl WalletListCache {
    pub const DEFAULT_CAPACITY: usize = 16;
}

/// Recently rejected transactions and why
pub type TxErrorLog = ThreadSafeCache<TxId, Vec<InvalidReason>>;

impl TxErrorLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn record(&self, id: TxId, reasons: Vec<InvalidReason>) {
        self.put(id, reasons);
    }

    pub fn reasons(&self, id: &TxId) -> Option<Vec<InvalidReason>> {
        self.peek(id)
    }
}

impl Default for TxErrorLog {
    fn default() -> Self {
        Self::new_lru(Self::DEFAULT_CAPACITY)
    }
}
