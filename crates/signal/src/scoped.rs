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

use crate::{EmissionOutcome, SignalError, SignalResult, Slot, SlotError, SlotFn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Signal whose slot lifetimes are scoped to the caller: `connect`
/// returns the owning [`Slot`] and the table holds only a weak
/// reference, so dropping the returned handle disconnects the slot.
/// Expired slots are skipped and pruned during emit.
pub struct ScopedSignal<A> {
    slots: Mutex<Vec<Weak<SlotFn<A>>>>,
}

impl<A> ScopedSignal<A> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Wrap `f` into a slot, register it weakly and hand the owning
    /// reference back. The registration lives as long as the caller keeps
    /// the returned `Slot` alive.
    pub fn connect<F>(&self, f: F) -> Slot<A>
    where
        F: Fn(&A) -> Result<(), SlotError> + Send + Sync + 'static,
    {
        let owned: Slot<A> = Arc::new(f);
        self.slots.lock().push(Arc::downgrade(&owned));
        owned
    }

    /// Register an externally owned slot by weak reference. A dead
    /// reference is rejected with `InvalidSlot`.
    pub fn connect_weak(&self, weak: Weak<SlotFn<A>>) -> SignalResult<()> {
        if weak.upgrade().is_none() {
            return Err(SignalError::InvalidSlot);
        }
        self.slots.lock().push(weak);
        Ok(())
    }

    /// Invoke every still-alive slot in connection order, pruning the
    /// expired entries from the table.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let snapshot: Vec<Slot<A>> = {
            let mut slots = self.slots.lock();
            let before = slots.len();
            let mut alive = Vec::with_capacity(slots.len());
            slots.retain(|weak| match weak.upgrade() {
                Some(slot) => {
                    alive.push(slot);
                    true
                }
                None => false,
            });
            if slots.len() < before {
                tracing::trace!(pruned = before - slots.len(), "dropped expired slots");
            }
            alive
        };

        let mut outcome = EmissionOutcome::new();
        for slot in snapshot {
            outcome.record(slot(args));
        }
        outcome.finish()
    }

    /// Number of still-alive slots.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Whether no live slots remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration, live or expired.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl<A> Default for ScopedSignal<A> {
    fn default() -> Self {
        Self::new()
    }
}
