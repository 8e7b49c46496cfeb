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

use crate::{EmissionOutcome, SignalError, SignalResult, Slot};
use parking_lot::Mutex;

/// Synchronous signal with an emission budget: at most `max_calls` emits
/// perform side effects over its lifetime, later ones return `Exhausted`
/// without touching any slot. [`reset`](Self::reset) restores the budget.
pub struct LimitedSignal<A> {
    inner: Mutex<Inner<A>>,
    max_calls: usize,
}

struct Inner<A> {
    slots: Vec<Slot<A>>,
    calls: usize,
}

impl<A> LimitedSignal<A> {
    /// Create a signal allowing `max_calls` emissions. A zero budget is
    /// rejected with `ZeroBudget`.
    pub fn new(max_calls: usize) -> SignalResult<Self> {
        if max_calls == 0 {
            return Err(SignalError::ZeroBudget);
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                calls: 0,
            }),
            max_calls,
        })
    }

    /// Register a slot.
    pub fn connect(&self, slot: Slot<A>) {
        self.inner.lock().slots.push(slot);
    }

    /// Remove every registration of exactly this slot (`Arc` pointer
    /// identity).
    pub fn disconnect(&self, slot: &Slot<A>) {
        self.inner.lock().slots.retain(|existing| !std::sync::Arc::ptr_eq(existing, slot));
    }

    /// Invoke the slots unless the budget is spent.
    ///
    /// The budget slot is claimed before the slots run, so a re-entrant
    /// emit from inside a slot consumes its own budget entry.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let snapshot: Vec<Slot<A>> = {
            let mut inner = self.inner.lock();
            if inner.calls >= self.max_calls {
                return Err(SignalError::Exhausted);
            }
            inner.calls += 1;
            inner.slots.clone()
        };

        let mut outcome = EmissionOutcome::new();
        for slot in snapshot {
            outcome.record(slot(args));
        }
        outcome.finish()
    }

    /// Whether the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().calls >= self.max_calls
    }

    /// Emissions left before exhaustion.
    pub fn remaining(&self) -> usize {
        let inner = self.inner.lock();
        self.max_calls.saturating_sub(inner.calls)
    }

    /// Restore the full budget.
    pub fn reset(&self) {
        self.inner.lock().calls = 0;
    }

    /// Number of connected slots.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Whether no slots are connected.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    /// Remove every slot; the budget is untouched.
    pub fn clear(&self) {
        self.inner.lock().slots.clear();
    }
}
