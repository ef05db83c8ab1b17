//! Sharded Concurrent Map
//!
//! The storage primitive behind every per-database table (data, ttl and
//! version). Keys are hash-partitioned over a power-of-two number of shards,
//! each an independent `RwLock<HashMap>`:
//!
//! ```text
//!   hash(key) & (shards - 1)
//!          │
//!          ▼
//! ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐
//! │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │
//! │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │
//! │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │
//! └─────────┘ └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! Shard locks only protect raw map access. Keyspace-level atomicity across
//! several tables is the job of the [`LockManager`](super::lock::LockManager).
//!
//! The live key count is an atomic that is only changed while the owning
//! shard's write lock is held, on the exact insert/delete transitions, so it
//! always equals the sum of the shard sizes once writers quiesce.

use bytes::Bytes;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lower bound on the shard count.
const MIN_SHARDS: usize = 16;

/// Hashes a key. The lock manager uses the same function so that both tables
/// agree on key identity.
#[inline]
pub fn key_hash(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Rounds a requested table size up to a power of two, with a floor.
pub(crate) fn table_size(requested: usize, floor: usize) -> usize {
    requested.max(floor).next_power_of_two()
}

#[derive(Debug)]
struct Shard<V> {
    map: RwLock<HashMap<Bytes, V>>,
}

impl<V> Shard<V> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, V>> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, V>> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A hash-partitioned concurrent map from byte-string keys to `V`.
#[derive(Debug)]
pub struct ShardedMap<V> {
    shards: Vec<Shard<V>>,
    count: AtomicUsize,
}

impl<V> ShardedMap<V> {
    /// Creates a map with at least `shard_count` shards (rounded up to a
    /// power of two, minimum 16).
    pub fn new(shard_count: usize) -> Self {
        let size = table_size(shard_count, MIN_SHARDS);
        let shards = (0..size)
            .map(|_| Shard {
                map: RwLock::new(HashMap::new()),
            })
            .collect();

        Self {
            shards,
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        (key_hash(key) as usize) & (self.shards.len() - 1)
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard<V> {
        &self.shards[self.shard_index(key)]
    }

    /// Number of shards backing this map.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    /// Runs `f` against the value under `key` while holding the shard's read lock.
    pub fn with<R>(&self, key: &[u8], f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(f)
    }

    /// Runs `f` against the value under `key` while holding the shard's write lock.
    pub fn with_mut<R>(&self, key: &[u8], f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard(key).write().get_mut(key).map(f)
    }

    /// Runs `f` against the value under `key`, inserting `default()` first if
    /// the key is absent.
    pub fn with_or_insert<R>(
        &self,
        key: &Bytes,
        default: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut map = self.shard(key).write();
        let value = match map.entry(key.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                self.count.fetch_add(1, Ordering::AcqRel);
                slot.insert(default())
            }
        };
        f(value)
    }

    /// Inserts or replaces. Returns 1 if the key was newly inserted, else 0.
    pub fn put(&self, key: Bytes, value: V) -> usize {
        let mut map = self.shard(&key).write();
        if map.insert(key, value).is_none() {
            self.count.fetch_add(1, Ordering::AcqRel);
            1
        } else {
            0
        }
    }

    /// Inserts only if the key is absent. Returns 1 if inserted.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> usize {
        let mut map = self.shard(&key).write();
        if map.contains_key(&key) {
            return 0;
        }
        map.insert(key, value);
        self.count.fetch_add(1, Ordering::AcqRel);
        1
    }

    /// Replaces only if the key is present. Returns 1 if replaced.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> usize {
        let mut map = self.shard(&key).write();
        match map.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let mut map = self.shard(key).write();
        let removed = map.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Visits every entry until `f` returns false.
    ///
    /// Each shard is read under its own lock, so the view is consistent per
    /// shard but not across the whole map.
    pub fn for_each(&self, mut f: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let map = shard.read();
            for (key, value) in map.iter() {
                if !f(key, value) {
                    return;
                }
            }
        }
    }

    /// Returns every key (per-shard consistent snapshot).
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Samples `limit` keys with replacement.
    ///
    /// Picks a uniformly random shard and takes the first key it yields, so
    /// keys in sparsely populated shards are over-represented.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        let mut result = Vec::with_capacity(limit);
        if self.is_empty() {
            return result;
        }

        let mut rng = rand::thread_rng();
        let mut misses = 0usize;
        while result.len() < limit {
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            match shard.read().keys().next() {
                Some(key) => result.push(key.clone()),
                None => {
                    misses += 1;
                    // Every shard may have been emptied concurrently.
                    if misses > self.shards.len() * 4 && self.is_empty() {
                        break;
                    }
                }
            }
        }
        result
    }

    /// Samples up to `limit` distinct keys.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        let target = limit.min(self.len());
        let mut seen: HashSet<Bytes> = HashSet::with_capacity(target);
        if target == 0 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..self.shards.len());
        // Walk the shards from a random starting point, taking a random
        // subset of each shard's keys until the target is reached.
        for offset in 0..self.shards.len() {
            let shard = &self.shards[(start + offset) & (self.shards.len() - 1)];
            let map = shard.read();
            for key in map.keys() {
                if seen.len() >= target {
                    break;
                }
                if rng.gen_bool(0.5) || offset + 1 == self.shards.len() {
                    seen.insert(key.clone());
                }
            }
            if seen.len() >= target {
                break;
            }
        }

        if seen.len() < target {
            for key in self.keys() {
                if seen.len() >= target {
                    break;
                }
                seen.insert(key);
            }
        }

        seen.into_iter().collect()
    }

    /// Drops every entry, swapping each shard's table out wholesale.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut map = shard.write();
            let removed = std::mem::take(&mut *map).len();
            if removed > 0 {
                self.count.fetch_sub(removed, Ordering::AcqRel);
            }
        }
    }
}
