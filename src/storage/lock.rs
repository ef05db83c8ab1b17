//! Striped Lock Manager
//!
//! A fixed table of reader-writer locks indexed by key hash. Every command
//! takes the stripes covering the keys it touches before reading or mutating
//! the keyspace, which makes the data/ttl/version triple for a key change
//! atomically.
//!
//! The table is sized independently of the sharded maps, so two keys may
//! alias to one stripe. That costs contention, never correctness.
//!
//! ## Deadlock Avoidance
//!
//! Multi-key acquisition first reduces the keys to a set of distinct stripe
//! indices, then acquires them in ascending order and releases them in
//! descending order. Any two commands with overlapping stripe sets therefore
//! always contend in the same global order.
//!
//! Guards are RAII: dropping a [`KeyLocks`] (including during unwinding)
//! releases its stripes.

use crate::storage::dict::{key_hash, table_size};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A single acquired stripe.
enum StripeGuard<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

/// Stripes held for one command. Released in descending index order on drop.
pub struct KeyLocks<'a> {
    // Kept in ascending stripe order; popped from the back on release.
    guards: Vec<(usize, StripeGuard<'a>)>,
}

impl KeyLocks<'_> {
    /// Indices of the held stripes, ascending.
    pub fn stripes(&self) -> Vec<usize> {
        self.guards.iter().map(|(index, _)| *index).collect()
    }

    /// Number of stripes held exclusively.
    pub fn exclusive_count(&self) -> usize {
        self.guards
            .iter()
            .filter(|(_, guard)| matches!(guard, StripeGuard::Exclusive(_)))
            .count()
    }
}

impl Drop for KeyLocks<'_> {
    fn drop(&mut self) {
        while let Some((_, guard)) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Fixed-size table of reader-writer locks addressed by key hash.
#[derive(Debug)]
pub struct LockManager {
    table: Vec<RwLock<()>>,
}

impl LockManager {
    /// Creates a manager with `stripes` locks (rounded up to a power of two).
    pub fn new(stripes: usize) -> Self {
        let size = table_size(stripes, 1);
        Self {
            table: (0..size).map(|_| RwLock::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.table.len()
    }

    /// Stripe index for a key.
    #[inline]
    pub fn stripe_of(&self, key: &[u8]) -> usize {
        (key_hash(key) as usize) & (self.table.len() - 1)
    }

    fn acquire(&self, index: usize, exclusive: bool) -> StripeGuard<'_> {
        let lock = &self.table[index];
        if exclusive {
            StripeGuard::Exclusive(lock.write().unwrap_or_else(PoisonError::into_inner))
        } else {
            StripeGuard::Shared(lock.read().unwrap_or_else(PoisonError::into_inner))
        }
    }

    /// Exclusively locks a single key.
    pub fn lock(&self, key: &[u8]) -> RwLockWriteGuard<'_, ()> {
        self.table[self.stripe_of(key)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks a single key for reading.
    pub fn rlock(&self, key: &[u8]) -> RwLockReadGuard<'_, ()> {
        self.table[self.stripe_of(key)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusively locks every key in `keys` (duplicates allowed).
    pub fn locks(&self, keys: &[Bytes]) -> KeyLocks<'_> {
        self.lock_keys(keys, &[])
    }

    /// Locks every key in `keys` for reading (duplicates allowed).
    pub fn rlocks(&self, keys: &[Bytes]) -> KeyLocks<'_> {
        self.lock_keys(&[], keys)
    }

    /// Locks write keys exclusively and read keys shared.
    ///
    /// A stripe serving both a write key and a read key is taken exclusively.
    pub fn lock_keys(&self, write_keys: &[Bytes], read_keys: &[Bytes]) -> KeyLocks<'_> {
        // stripe index -> exclusive?
        let mut plan: BTreeMap<usize, bool> = BTreeMap::new();
        for key in write_keys {
            plan.insert(self.stripe_of(key), true);
        }
        for key in read_keys {
            plan.entry(self.stripe_of(key)).or_insert(false);
        }

        let guards = plan
            .into_iter()
            .map(|(index, exclusive)| (index, self.acquire(index, exclusive)))
            .collect();

        KeyLocks { guards }
    }

    /// Releases stripes taken by [`lock_keys`](Self::lock_keys).
    pub fn unlock_keys(&self, locks: KeyLocks<'_>) {
        drop(locks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn keys(names: &[&str]) -> Vec<Bytes> {
        names.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    /// Finds two keys that land on different stripes.
    fn disjoint_pair(locker: &LockManager) -> (Bytes, Bytes) {
        let a = Bytes::from("a");
        let b = (0..)
            .map(|i| Bytes::from(format!("b{}", i)))
            .find(|b| locker.stripe_of(b) != locker.stripe_of(&a))
            .unwrap();
        (a, b)
    }

    #[test]
    fn test_stripes_are_sorted_and_deduplicated() {
        let locker = LockManager::new(16);
        let write = keys(&["x", "y", "x"]);
        let read = keys(&["y", "z"]);

        let held = locker.lock_keys(&write, &read);
        let stripes = held.stripes();
        let mut sorted = stripes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(stripes, sorted);
    }

    #[test]
    fn test_exclusive_wins_when_stripe_is_shared() {
        let locker = LockManager::new(16);
        let k = keys(&["same"]);
        let held = locker.lock_keys(&k, &k);
        assert_eq!(held.stripes().len(), 1);
        assert_eq!(held.exclusive_count(), 1);
    }

    #[test]
    fn test_readers_share_a_stripe() {
        let locker = LockManager::new(16);
        let k = keys(&["k"]);
        let first = locker.rlocks(&k);
        let second = locker.rlocks(&k);
        assert_eq!(first.exclusive_count(), 0);
        assert_eq!(second.stripes(), first.stripes());
    }

    #[test]
    fn test_disjoint_writers_proceed_concurrently() {
        let locker = Arc::new(LockManager::new(64));
        let (a, b) = disjoint_pair(&locker);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|key| {
                let locker = Arc::clone(&locker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _held = locker.locks(&[key]);
                    // Both threads must reach the barrier while holding their
                    // locks, which only works if neither blocks the other.
                    barrier.wait();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_same_key_writers_serialize() {
        let locker = Arc::new(LockManager::new(64));
        let inside = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locker = Arc::clone(&locker);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _held = locker.locks(&keys(&["hot"]));
                        if inside.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(200));
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_opposite_order_requests_do_not_deadlock() {
        let locker = Arc::new(LockManager::new(64));
        let (a, b) = disjoint_pair(&locker);

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let locker = Arc::clone(&locker);
                let pair = if i == 0 {
                    vec![a.clone(), b.clone()]
                } else {
                    vec![b.clone(), a.clone()]
                };
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let held = locker.locks(&pair);
                        locker.unlock_keys(held);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_single_key_guards() {
        let locker = LockManager::new(8);
        {
            let _w = locker.lock(b"k");
        }
        let _r1 = locker.rlock(b"k");
        let _r2 = locker.rlock(b"k");
    }
}
