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

use crossbeam_utils::Backoff;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{ContainerError, ContainerResult};

const DEFAULT_CAPACITY: usize = 16;

/// A concurrent resizable array.
///
/// Indices are claimed with a CAS on the length counter; each slot is
/// synchronized individually, so a read never observes a torn value.
/// Growth doubles the capacity under a writer lock while element
/// operations proceed under the shared side of the same lock, so a
/// reader racing a resize sees either the old or the new storage.
pub struct ConcurrentVec<T> {
    storage: RwLock<Box<[Slot<T>]>>,
    len: AtomicUsize,
}

struct Slot<T> {
    cell: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self { cell: Mutex::new(None) }
    }
}

fn allocate<T>(capacity: usize) -> Box<[Slot<T>]> {
    (0..capacity).map(|_| Slot::empty()).collect::<Vec<_>>().into_boxed_slice()
}

impl<T> ConcurrentVec<T> {
    /// Create a vector with the default initial capacity (16).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a vector with the given initial capacity (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: RwLock::new(allocate(capacity.max(1))),
            len: AtomicUsize::new(0),
        }
    }

    /// Append a value, growing the storage when full.
    pub fn push_back(&self, value: T) {
        loop {
            let storage = self.storage.read();
            let capacity = storage.len();
            let len = self.len.load(Ordering::Acquire);

            if len < capacity {
                if self
                    .len
                    .compare_exchange(len, len + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // Index claimed. A pop that raced us for this slot takes
                    // the previous occupant first, so wait for the cell to
                    // come free instead of overwriting.
                    let backoff = Backoff::new();
                    loop {
                        let mut cell = storage[len].cell.lock();
                        if cell.is_none() {
                            *cell = Some(value);
                            return;
                        }
                        drop(cell);
                        backoff.snooze();
                    }
                }
                continue;
            }

            drop(storage);
            self.grow();
        }
    }

    /// Remove and return the last element, or `None` when empty.
    pub fn pop_back(&self) -> Option<T> {
        loop {
            let storage = self.storage.read();
            let len = self.len.load(Ordering::Acquire);
            if len == 0 {
                return None;
            }

            if self
                .len
                .compare_exchange(len, len - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // The claimed slot may still be in flight from the push that
                // published this index; wait for the value to land.
                let backoff = Backoff::new();
                loop {
                    if let Some(value) = storage[len - 1].cell.lock().take() {
                        return Some(value);
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Clone of the element at `index`, or `OutOfRange` past the length.
    pub fn get(&self, index: usize) -> ContainerResult<T>
    where
        T: Clone,
    {
        let storage = self.storage.read();
        let backoff = Backoff::new();
        loop {
            let len = self.len.load(Ordering::Acquire);
            if index >= len || index >= storage.len() {
                return Err(ContainerError::OutOfRange { index, len });
            }
            if let Some(value) = storage[index].cell.lock().as_ref() {
                return Ok(value.clone());
            }
            // Claimed but not yet written; retry until the push lands or a
            // racing pop shrinks the vector below the index.
            backoff.snooze();
        }
    }

    /// Clone of the element at `index`, or `None` past the length.
    pub fn try_get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.get(index).ok()
    }

    /// Clone of the first element.
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        self.try_get(0)
    }

    /// Clone of the last element.
    pub fn back(&self) -> Option<T>
    where
        T: Clone,
    {
        let len = self.len.load(Ordering::Acquire);
        if len == 0 { None } else { self.try_get(len - 1) }
    }

    /// Copy the current contents into an owned `Vec`.
    ///
    /// The snapshot never exposes the internal slots; concurrent pushes and
    /// pops may truncate the copy at the point they raced it.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        let storage = self.storage.read();
        let len = self.len.load(Ordering::Acquire).min(storage.len());
        let mut out = Vec::with_capacity(len);
        for slot in storage.iter().take(len) {
            let backoff = Backoff::new();
            loop {
                if let Some(value) = slot.cell.lock().as_ref() {
                    out.push(value.clone());
                    break;
                }
                if self.len.load(Ordering::Acquire) <= out.len() {
                    return out;
                }
                backoff.snooze();
            }
        }
        out
    }

    /// Number of initialized elements.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot capacity.
    pub fn capacity(&self) -> usize {
        self.storage.read().len()
    }

    /// Drop every element and reset the length to zero.
    pub fn clear(&self) {
        let storage = self.storage.write();
        self.len.store(0, Ordering::Release);
        for slot in storage.iter() {
            slot.cell.lock().take();
        }
    }

    /// Shrink the capacity to the current length (minimum 1).
    pub fn shrink_to_fit(&self) {
        let mut storage = self.storage.write();
        let len = self.len.load(Ordering::Acquire);
        let target = len.max(1);
        if target == storage.len() {
            return;
        }
        let new_storage = allocate(target);
        for (old, new) in storage.iter().zip(new_storage.iter()).take(len) {
            *new.cell.lock() = old.cell.lock().take();
        }
        *storage = new_storage;
    }

    fn grow(&self) {
        let mut storage = self.storage.write();
        let capacity = storage.len();
        if self.len.load(Ordering::Acquire) < capacity {
            // Another thread already grew the storage.
            return;
        }
        let new_storage = allocate(capacity * 2);
        for (old, new) in storage.iter().zip(new_storage.iter()) {
            *new.cell.lock() = old.cell.lock().take();
        }
        *storage = new_storage;
    }
}

impl<T> Default for ConcurrentVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for ConcurrentVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: Vec<T> = iter.into_iter().collect();
        let vec = Self::with_capacity(items.len());
        for item in items {
            vec.push_back(item);
        }
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_roundtrip() {
        let vec = ConcurrentVec::new();
        vec.push_back(5);
        assert_eq!(vec.pop_back(), Some(5));
        assert_eq!(vec.pop_back(), None);
    }

    #[test]
    fn test_indexed_access() {
        let vec: ConcurrentVec<i32> = (10..15).collect();
        assert_eq!(vec.get(0), Ok(10));
        assert_eq!(vec.get(4), Ok(14));
        assert_eq!(vec.get(5), Err(ContainerError::OutOfRange { index: 5, len: 5 }));
        assert_eq!(vec.try_get(5), None);
        assert_eq!(vec.front(), Some(10));
        assert_eq!(vec.back(), Some(14));
    }

    #[test]
    fn test_growth_preserves_elements() {
        let vec = ConcurrentVec::with_capacity(2);
        for i in 0..100 {
            vec.push_back(i);
        }
        assert_eq!(vec.len(), 100);
        assert!(vec.capacity() >= 100);
        for i in 0..100 {
            assert_eq!(vec.get(i), Ok(i));
        }
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let vec: ConcurrentVec<String> = ["a", "b"].into_iter().map(String::from).collect();
        let snap = vec.snapshot();
        assert_eq!(snap, vec!["a".to_string(), "b".to_string()]);
        vec.push_back("c".into());
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_clear_and_shrink() {
        let vec: ConcurrentVec<i32> = (0..64).collect();
        vec.clear();
        assert!(vec.is_empty());
        assert_eq!(vec.pop_back(), None);

        vec.push_back(1);
        vec.shrink_to_fit();
        assert_eq!(vec.capacity(), 1);
        assert_eq!(vec.get(0), Ok(1));
    }

    #[test]
    fn test_concurrent_push_keeps_every_value() {
        let vec = Arc::new(ConcurrentVec::with_capacity(1));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let vec = Arc::clone(&vec);
                thread::spawn(move || {
                    for i in 0..250 {
                        vec.push_back(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(vec.len(), 2000);
        let mut values = vec.snapshot();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 2000);
    }

    #[test]
    fn test_concurrent_push_pop_balance() {
        let vec = Arc::new(ConcurrentVec::with_capacity(4));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let vec = Arc::clone(&vec);
                thread::spawn(move || {
                    let mut popped = 0usize;
                    for i in 0..300 {
                        vec.push_back(t * 1000 + i);
                        if i % 3 == 0 && vec.pop_back().is_some() {
                            popped += 1;
                        }
                    }
                    popped
                })
            })
            .collect();

        let popped: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(vec.len() + popped, 4 * 300);
    }

    #[test]
    fn test_reads_during_growth_never_tear() {
        let vec = Arc::new(ConcurrentVec::with_capacity(1));
        let writer = {
            let vec = Arc::clone(&vec);
            thread::spawn(move || {
                for i in 0..2000u64 {
                    vec.push_back((i, i.wrapping_mul(31)));
                }
            })
        };
        let reader = {
            let vec = Arc::clone(&vec);
            thread::spawn(move || {
                for _ in 0..5000 {
                    let len = vec.len();
                    if len == 0 {
                        continue;
                    }
                    if let Some((a, b)) = vec.try_get(len / 2) {
                        assert_eq!(b, a.wrapping_mul(31), "torn read");
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(vec.len(), 2000);
    }

    proptest! {
        // Sequential push/pop against a Vec model.
        #[test]
        fn prop_matches_vec_model(ops in proptest::collection::vec((0u8..2, 0i64..1000), 1..300)) {
            let vec = ConcurrentVec::with_capacity(1);
            let mut model = Vec::new();

            for (op, value) in ops {
                if op == 0 {
                    vec.push_back(value);
                    model.push(value);
                } else {
                    prop_assert_eq!(vec.pop_back(), model.pop());
                }
            }

            prop_assert_eq!(vec.len(), model.len());
            prop_assert_eq!(vec.snapshot(), model);
        }
    }
}
