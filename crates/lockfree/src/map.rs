// Dotsync
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_BUCKETS: usize = 16;

/// A lock-free hash map over a fixed array of buckets, each bucket a
/// lock-free singly-linked chain.
///
/// # Shadowing semantics
/// `insert` always prepends a node at the bucket head. Inserting a key
/// that already exists *shadows* the older node: `get` returns the most
/// recently inserted value, `len` counts nodes (two inserts of one key
/// give a length of two), and `remove` deletes the newest match,
/// unshadowing the one below it.
///
/// # Removal protocol
/// Removal marks the victim's `next` pointer (logical deletion), then
/// unlinks it from its predecessor (physical deletion). Traversals skip
/// marked nodes and help unlink them; only the thread whose unlink CAS
/// succeeds retires the node, so a node is reclaimed exactly once.
pub struct LockFreeHashMap<K, V> {
    buckets: Box<[Bucket<K, V>]>,
    hasher: RandomState,
    len: AtomicUsize,
}

struct Bucket<K, V> {
    head: Atomic<Entry<K, V>>,
}

struct Entry<K, V> {
    key: K,
    value: V,
    next: Atomic<Entry<K, V>>,
}

const DELETED: usize = 1;

unsafe impl<K: Send + Sync, V: Send + Sync> Send for LockFreeHashMap<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for LockFreeHashMap<K, V> {}

impl<K, V> LockFreeHashMap<K, V>
where
    K: Hash + Eq,
{
    /// Create a map with the default bucket count (16).
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    /// Create a map with a fixed number of buckets (minimum 1).
    pub fn with_buckets(num_buckets: usize) -> Self {
        let num_buckets = num_buckets.max(1);
        let buckets = (0..num_buckets)
            .map(|_| Bucket { head: Atomic::null() })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            hasher: RandomState::new(),
            len: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, key: &K) -> &Bucket<K, V> {
        let index = self.hasher.hash_one(key) as usize % self.buckets.len();
        &self.buckets[index]
    }

    /// Insert a key/value pair at the bucket head. An existing node for
    /// the same key is shadowed, not replaced.
    pub fn insert(&self, key: K, value: V) {
        let bucket = self.bucket(&key);
        let mut node = Owned::new(Entry {
            key,
            value,
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = bucket.head.load(Ordering::Acquire, &guard);
            node.next.store(head, Ordering::Relaxed);
            match bucket.head.compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    node = e.new;
                    backoff.spin();
                }
            }
        }
    }

    /// Return a clone of the most recently inserted value for `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = epoch::pin();
        let bucket = self.bucket(key);
        let mut curr = bucket.head.load(Ordering::Acquire, &guard);

        while let Some(entry) = unsafe { curr.as_ref() } {
            let next = entry.next.load(Ordering::Acquire, &guard);
            if next.tag() != DELETED && entry.key == *key {
                return Some(entry.value.clone());
            }
            curr = next.with_tag(0);
        }
        None
    }

    /// Whether a live node for `key` exists.
    pub fn contains_key(&self, key: &K) -> bool {
        let guard = epoch::pin();
        let bucket = self.bucket(key);
        let mut curr = bucket.head.load(Ordering::Acquire, &guard);

        while let Some(entry) = unsafe { curr.as_ref() } {
            let next = entry.next.load(Ordering::Acquire, &guard);
            if next.tag() != DELETED && entry.key == *key {
                return true;
            }
            curr = next.with_tag(0);
        }
        false
    }

    /// Remove the most recent live node for `key`.
    ///
    /// Returns `false` when no live node matched ("not removed"), which is
    /// not an error.
    pub fn remove(&self, key: &K) -> bool {
        let guard = epoch::pin();
        let bucket = self.bucket(key);

        'retry: loop {
            let mut prev = &bucket.head;
            let mut curr = prev.load(Ordering::Acquire, &guard);

            loop {
                let Some(entry) = (unsafe { curr.as_ref() }) else {
                    return false;
                };
                let next = entry.next.load(Ordering::Acquire, &guard);

                if next.tag() == DELETED {
                    // Logically deleted by someone else: help unlink.
                    match prev.compare_exchange(curr, next.with_tag(0), Ordering::AcqRel, Ordering::Relaxed, &guard) {
                        Ok(_) => {
                            unsafe { guard.defer_destroy(curr) };
                            curr = next.with_tag(0);
                            continue;
                        }
                        Err(_) => continue 'retry,
                    }
                }

                if entry.key == *key {
                    // Logical deletion first: mark our own next pointer.
                    if entry
                        .next
                        .compare_exchange(next, next.with_tag(DELETED), Ordering::AcqRel, Ordering::Relaxed, &guard)
                        .is_err()
                    {
                        continue 'retry;
                    }
                    self.len.fetch_sub(1, Ordering::Relaxed);

                    // Physical unlink; on failure a later traversal helps.
                    if prev
                        .compare_exchange(curr, next.with_tag(0), Ordering::AcqRel, Ordering::Relaxed, &guard)
                        .is_ok()
                    {
                        unsafe { guard.defer_destroy(curr) };
                    }
                    return true;
                }

                prev = &entry.next;
                curr = next.with_tag(0);
            }
        }
    }

    /// Look up `key`, inserting the value produced by `make` when absent.
    ///
    /// Two racing callers may both insert; the later node shadows the
    /// earlier one and each caller observes its own value.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        let value = make();
        self.insert(key, value.clone());
        value
    }

    /// Remove every node from every bucket.
    pub fn clear(&self) {
        let guard = epoch::pin();
        for bucket in self.buckets.iter() {
            loop {
                let head = bucket.head.load(Ordering::Acquire, &guard);
                let Some(entry) = (unsafe { head.as_ref() }) else {
                    break;
                };
                let next = entry.next.load(Ordering::Acquire, &guard);

                if next.tag() == DELETED {
                    if bucket
                        .head
                        .compare_exchange(head, next.with_tag(0), Ordering::AcqRel, Ordering::Relaxed, &guard)
                        .is_ok()
                    {
                        unsafe { guard.defer_destroy(head) };
                    }
                    continue;
                }

                if entry
                    .next
                    .compare_exchange(next, next.with_tag(DELETED), Ordering::AcqRel, Ordering::Relaxed, &guard)
                    .is_ok()
                {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                    if bucket
                        .head
                        .compare_exchange(head, next.with_tag(0), Ordering::AcqRel, Ordering::Relaxed, &guard)
                        .is_ok()
                    {
                        unsafe { guard.defer_destroy(head) };
                    }
                }
            }
        }
    }

    /// Iterate over `(key, value)` pairs in unspecified order.
    ///
    /// Not point-in-time consistent: each yielded key existed at some
    /// moment between iterator creation and use.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        Iter {
            buckets: self.buckets.iter(),
            curr: Shared::null(),
            guard,
        }
    }

    /// Approximate number of live nodes. Accurate under quiescence only.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the map holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq, V> Default for LockFreeHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for LockFreeHashMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<K, V> Drop for LockFreeHashMap<K, V> {
    fn drop(&mut self) {
        // Exclusive access: free every node, marked or not.
        unsafe {
            let guard = epoch::unprotected();
            for bucket in self.buckets.iter() {
                let mut curr = bucket.head.load(Ordering::Relaxed, guard);
                while !curr.is_null() {
                    let owned = curr.into_owned();
                    curr = owned.next.load(Ordering::Relaxed, guard).with_tag(0);
                    drop(owned);
                }
            }
        }
    }
}

/// Bucket-by-bucket cursor over live entries.
pub struct Iter<'g, K, V> {
    buckets: std::slice::Iter<'g, Bucket<K, V>>,
    curr: Shared<'g, Entry<K, V>>,
    guard: &'g Guard,
}

impl<'g, K, V> Iterator for Iter<'g, K, V> {
    type Item = (&'g K, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = unsafe { self.curr.as_ref() } {
                let next = entry.next.load(Ordering::Acquire, self.guard);
                self.curr = next.with_tag(0);
                if next.tag() == DELETED {
                    continue;
                }
                return Some((&entry.key, &entry.value));
            }
            let bucket = self.buckets.next()?;
            self.curr = bucket.head.load(Ordering::Acquire, self.guard);
        }
    }
}
