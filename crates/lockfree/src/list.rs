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
use std::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free singly-linked list mutated only at the head.
///
/// Values stay inside their node until the node is reclaimed, so
/// traversal through [`LockFreeList::iter`] and [`LockFreeList::front`]
/// is safe against concurrent `pop_front` calls; `pop_front` therefore
/// returns a clone rather than moving the value out.
///
/// Traversal sees a consistent snapshot of the head chain at the moment
/// the iterator was created; updates that race with the traversal may or
/// may not be visible.
pub struct LockFreeList<T> {
    head: Atomic<Node<T>>,
    len: AtomicUsize,
}

struct Node<T> {
    value: T,
    next: Atomic<Node<T>>,
}

unsafe impl<T: Send> Send for LockFreeList<T> {}
unsafe impl<T: Send + Sync> Sync for LockFreeList<T> {}

impl<T> LockFreeList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
            len: AtomicUsize::new(0),
        }
    }

    /// Link a new node at the head. Retries on CAS failure.
    pub fn push_front(&self, value: T) {
        let mut node = Owned::new(Node {
            value,
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            node.next.store(head, Ordering::Relaxed);
            match self.head.compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard) {
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

    /// Unlink the head node and return a clone of its value, or `None` if
    /// the list is empty.
    pub fn pop_front(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let node = unsafe { head.as_ref() }?;
            let next = node.next.load(Ordering::Acquire, &guard);

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed, &guard)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                let value = node.value.clone();
                unsafe { guard.defer_destroy(head) };
                return Some(value);
            }
            backoff.spin();
        }
    }

    /// Read the front value without removing it.
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        unsafe { head.as_ref() }.map(|node| node.value.clone())
    }

    /// Unlink every node, deferring reclamation past the grace period.
    pub fn clear(&self) {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let Some(node) = (unsafe { head.as_ref() }) else {
                return;
            };
            let next = node.next.load(Ordering::Acquire, &guard);
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed, &guard)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                unsafe { guard.defer_destroy(head) };
            }
        }
    }

    /// Iterate over the chain reachable from the head at the moment of the
    /// call. The guard keeps every visited node alive.
    pub fn iter<'g>(&self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            curr: self.head.load(Ordering::Acquire, guard),
            guard,
        }
    }

    /// Approximate number of elements. Accurate under quiescence only.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the list currently has no reachable head node.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Ordering::Acquire, &guard).is_null()
    }
}

impl<T> Default for LockFreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the list by front-pushing in iteration order, so traversal
/// yields the elements in reverse.
impl<T> FromIterator<T> for LockFreeList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let list = Self::new();
        for value in iter {
            list.push_front(value);
        }
        list
    }
}

impl<T> Drop for LockFreeList<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.load(Ordering::Relaxed, guard);
            while !curr.is_null() {
                let owned = curr.into_owned();
                curr = owned.next.load(Ordering::Relaxed, guard);
                drop(owned);
            }
        }
    }
}

/// Forward iterator over a head-chain snapshot.
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        let node = unsafe { self.curr.as_ref() }?;
        self.curr = node.next.load(Ordering::Acquire, self.guard);
        Some(&node.value)
    }
}
