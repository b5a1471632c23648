//! Adaptive replacement cache
//!
//! Two resident lists split the capacity: T1 holds keys seen once recently,
//! T2 keys seen at least twice. Ghost lists B1/B2 remember keys recently
//! evicted from each, and a hit on a ghost moves the adaptive target `p`
//! (the share of capacity granted to T1) toward the list that would have
//! kept it.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use beacon_core::{BeaconError, BeaconResult};

struct ArcState<K: Hash + Eq, V> {
    size: usize,
    /// Target size of T1
    p: usize,
    t1: LruCache<K, V>,
    t2: LruCache<K, V>,
    b1: LruCache<K, ()>,
    b2: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone, V> ArcState<K, V> {
    fn is_full(&self) -> bool {
        self.t1.len() + self.t2.len() >= self.size
    }

    /// Evict one resident entry into its ghost list
    fn replace(&mut self, b2_hit: bool) {
        let t1_len = self.t1.len();
        let from_t1 = t1_len > 0 && (t1_len > self.p || (t1_len == self.p && b2_hit));

        if from_t1 || self.t2.is_empty() {
            if let Some((key, _)) = self.t1.pop_lru() {
                self.b1.put(key, ());
            }
        } else if let Some((key, _)) = self.t2.pop_lru() {
            self.b2.put(key, ());
        }
    }

    fn insert(&mut self, key: K, value: V) {
        if self.t1.pop(&key).is_some() || self.t2.contains(&key) {
            self.t2.put(key, value);
            return;
        }

        if self.b1.contains(&key) {
            let delta = if self.b2.len() > self.b1.len() {
                self.b2.len() / self.b1.len()
            } else {
                1
            };
            self.p = (self.p + delta).min(self.size);
            if self.is_full() {
                self.replace(false);
            }
            self.b1.pop(&key);
            self.t2.put(key, value);
            return;
        }

        if self.b2.contains(&key) {
            let delta = if self.b1.len() > self.b2.len() {
                self.b1.len() / self.b2.len()
            } else {
                1
            };
            self.p = self.p.saturating_sub(delta);
            if self.is_full() {
                self.replace(true);
            }
            self.b2.pop(&key);
            self.t2.put(key, value);
            return;
        }

        if self.is_full() {
            self.replace(false);
        }
        if self.b1.len() > self.size - self.p {
            self.b1.pop_lru();
        }
        if self.b2.len() > self.p {
            self.b2.pop_lru();
        }
        self.t1.put(key, value);
    }
}

/// Thread-safe, fixed capacity ARC cache
pub struct ArcCache<K: Hash + Eq, V> {
    state: Mutex<ArcState<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ArcCache<K, V> {
    /// Create a cache holding at most `size` entries
    pub fn new(size: usize) -> BeaconResult<Self> {
        let cap = NonZeroUsize::new(size)
            .ok_or_else(|| BeaconError::InvalidConfig("cache size must be positive".into()))?;

        Ok(ArcCache {
            state: Mutex::new(ArcState {
                size,
                p: 0,
                t1: LruCache::new(cap),
                t2: LruCache::new(cap),
                b1: LruCache::new(cap),
                b2: LruCache::new(cap),
            }),
        })
    }

    /// Look up `key`, promoting it to the frequent list on a hit
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        if let Some(value) = state.t1.pop(key) {
            state.t2.put(key.clone(), value.clone());
            return Some(value);
        }
        state.t2.get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.state.lock().insert(key, value);
    }

    /// Check residency without touching recency
    pub fn contains(&self, key: &K) -> bool {
        let state = self.state.lock();
        state.t1.contains(key) || state.t2.contains(key)
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.t1.len() + state.t2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
