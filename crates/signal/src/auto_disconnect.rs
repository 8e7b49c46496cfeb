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

use crate::{ConnectionId, EmissionOutcome, SignalResult, Slot};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Synchronous signal whose `connect` returns a [`ConnectionId`] for
/// targeted disconnection. Ids are monotonic per signal and never reused
/// within its lifetime.
pub struct AutoDisconnectSignal<A> {
    inner: Mutex<Inner<A>>,
}

struct Inner<A> {
    /// Keyed by id; iteration order equals connection order because the
    /// ids are monotonic.
    slots: BTreeMap<ConnectionId, Slot<A>>,
    next_id: ConnectionId,
}

impl<A> AutoDisconnectSignal<A> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Register a slot and return its unique connection id.
    pub fn connect(&self, slot: Slot<A>) -> ConnectionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.insert(id, slot);
        id
    }

    /// Remove the slot registered under `id`. Returns whether a slot was
    /// removed; disconnecting an unknown id is a no-op.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.inner.lock().slots.remove(&id).is_some()
    }

    /// Invoke the slots connected at the moment of the call, in
    /// connection order.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let snapshot: Vec<Slot<A>> = self.inner.lock().slots.values().cloned().collect();
        let mut outcome = EmissionOutcome::new();
        for slot in snapshot {
            outcome.record(slot(args));
        }
        outcome.finish()
    }

    /// Number of connected slots.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Whether no slots are connected.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    /// Remove every slot. Ids keep advancing; cleared ids are not reused.
    pub fn clear(&self) {
        self.inner.lock().slots.clear();
    }
}

impl<A> Default for AutoDisconnectSignal<A> {
    fn default() -> Self {
        Self::new()
    }
}
