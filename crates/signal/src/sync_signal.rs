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

use crate::{EmissionOutcome, SignalResult, Slot};
use parking_lot::Mutex;
use std::sync::Arc;

/// Synchronous signal: `emit` invokes the slots in the caller's context,
/// in connection order.
pub struct Signal<A> {
    slots: Mutex<Vec<Slot<A>>>,
}

impl<A> Signal<A> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Register a slot; it fires on every subsequent emit.
    pub fn connect(&self, slot: Slot<A>) {
        self.slots.lock().push(slot);
    }

    /// Remove every registration of exactly this slot (`Arc` pointer
    /// identity). Removing an absent slot is a no-op.
    pub fn disconnect(&self, slot: &Slot<A>) {
        self.slots.lock().retain(|existing| !Arc::ptr_eq(existing, slot));
    }

    /// Invoke all slots connected at the moment of the call, in
    /// connection order. Per-slot failures are collected and surfaced as
    /// one `EmissionFailure` after every slot has been visited.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let snapshot: Vec<Slot<A>> = self.slots.lock().clone();
        let mut outcome = EmissionOutcome::new();
        for slot in snapshot {
            outcome.record(slot(args));
        }
        outcome.finish()
    }

    /// Number of connected slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slots are connected.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Remove every slot.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SignalError, slot};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_emit_in_connection_order() {
        let signal = Signal::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            signal.connect(slot(move |_: &()| {
                order.lock().push(label);
                Ok(())
            }));
        }

        signal.emit(&()).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_connect_disconnect_roundtrip() {
        let signal = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let counting = slot(move |_: &i32| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        signal.connect(Arc::clone(&counting));
        assert_eq!(signal.len(), 1);
        signal.emit(&1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        signal.disconnect(&counting);
        assert!(signal.is_empty());
        signal.emit(&2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Disconnecting an absent slot is a no-op.
        signal.disconnect(&counting);
    }

    #[test]
    fn test_failures_are_aggregated() {
        let signal = Signal::new();
        let ran_after_failure = Arc::new(AtomicBool::new(false));

        signal.connect(slot(|_: &()| Err("bad slot".into())));
        let flag = Arc::clone(&ran_after_failure);
        signal.connect(slot(move |_: &()| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        signal.connect(slot(|_: &()| Err("worse slot".into())));

        let err = signal.emit(&()).unwrap_err();
        match err {
            SignalError::EmissionFailure(causes) => {
                assert_eq!(causes.len(), 2);
                assert_eq!(causes[0].0, "bad slot");
                assert_eq!(causes[1].0, "worse slot");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Slots after a failing one still ran.
        assert!(ran_after_failure.load(Ordering::SeqCst));
    }

    // A slot that connects another slot mid-emit: the new slot is not
    // observed by the in-flight emit, only by the next one.
    #[test]
    fn test_emission_snapshot_rule() {
        let signal = Arc::new(Signal::new());
        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));
        let b_connected = Arc::new(AtomicBool::new(false));

        let sig = Arc::clone(&signal);
        let a = Arc::clone(&a_runs);
        let b = Arc::clone(&b_runs);
        let connected = Arc::clone(&b_connected);
        signal.connect(slot(move |_: &()| {
            a.fetch_add(1, Ordering::SeqCst);
            if !connected.swap(true, Ordering::SeqCst) {
                let b = Arc::clone(&b);
                sig.connect(slot(move |_: &()| {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }));
            }
            Ok(())
        }));

        signal.emit(&()).unwrap();
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 0);

        signal.emit(&()).unwrap();
        assert_eq!(a_runs.load(Ordering::SeqCst), 2);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
    }

    // A slot may re-emit its own signal; the inner emit sees the slot
    // table as of the re-emit moment and the locks do not deadlock.
    #[test]
    fn test_reentrant_emit() {
        let signal = Arc::new(Signal::new());
        let depth = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let sig = Arc::clone(&signal);
        let d = Arc::clone(&depth);
        let r = Arc::clone(&runs);
        signal.connect(slot(move |_: &()| {
            r.fetch_add(1, Ordering::SeqCst);
            if d.fetch_add(1, Ordering::SeqCst) < 2 {
                sig.emit(&()).unwrap();
            }
            Ok(())
        }));

        signal.emit(&()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clear() {
        let signal: Signal<()> = Signal::new();
        signal.connect(slot(|_| Ok(())));
        signal.connect(slot(|_| Ok(())));
        assert_eq!(signal.len(), 2);
        signal.clear();
        assert!(signal.is_empty());
        signal.emit(&()).unwrap();
    }

    #[test]
    fn test_arguments_reach_slots() {
        let signal = Signal::new();
        let sum = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&sum);
        signal.connect(slot(move |(a, b): &(usize, usize)| {
            s.fetch_add(a + b, Ordering::SeqCst);
            Ok(())
        }));
        signal.emit(&(3, 4)).unwrap();
        assert_eq!(sum.load(Ordering::SeqCst), 7);
    }
}
