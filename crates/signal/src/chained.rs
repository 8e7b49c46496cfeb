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
use std::sync::{Arc, Weak};

/// Synchronous signal that forwards each emit to downstream signals after
/// its local slots have run.
///
/// Downstream signals are held by weak reference; links whose signal has
/// been dropped are pruned during emit, so a dead chain is never an
/// error.
pub struct ChainedSignal<A> {
    slots: Mutex<Vec<Slot<A>>>,
    chains: Mutex<Vec<Weak<ChainedSignal<A>>>>,
}

impl<A> ChainedSignal<A> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            chains: Mutex::new(Vec::new()),
        }
    }

    /// Register a local slot.
    pub fn connect(&self, slot: Slot<A>) {
        self.slots.lock().push(slot);
    }

    /// Remove every registration of exactly this slot (`Arc` pointer
    /// identity). Removing an absent slot is a no-op.
    pub fn disconnect(&self, slot: &Slot<A>) {
        self.slots.lock().retain(|existing| !Arc::ptr_eq(existing, slot));
    }

    /// Forward future emits to `next` (weakly held).
    pub fn chain(&self, next: &Arc<ChainedSignal<A>>) {
        self.chains.lock().push(Arc::downgrade(next));
    }

    /// Invoke local slots in connection order, then emit on every
    /// still-alive downstream signal. Failures from the whole chain are
    /// flattened into one `EmissionFailure`.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let mut outcome = EmissionOutcome::new();

        let snapshot: Vec<Slot<A>> = self.slots.lock().clone();
        for slot in snapshot {
            outcome.record(slot(args));
        }

        // Upgrade under the lock, prune the dead links, emit outside it.
        let downstream: Vec<Arc<ChainedSignal<A>>> = {
            let mut chains = self.chains.lock();
            let before = chains.len();
            let mut alive = Vec::with_capacity(chains.len());
            chains.retain(|link| match link.upgrade() {
                Some(signal) => {
                    alive.push(signal);
                    true
                }
                None => false,
            });
            if chains.len() < before {
                tracing::trace!(pruned = before - chains.len(), "dropped expired chain links");
            }
            alive
        };

        for signal in downstream {
            if let Err(SignalError::EmissionFailure(causes)) = signal.emit(args) {
                outcome.extend(causes);
            }
        }

        outcome.finish()
    }

    /// Number of local slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no local slots are connected.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Number of chained links still held (including not-yet-pruned dead
    /// ones).
    pub fn chain_len(&self) -> usize {
        self.chains.lock().len()
    }

    /// Remove every local slot and every chain link.
    pub fn clear(&self) {
        self.slots.lock().clear();
        self.chains.lock().clear();
    }
}

impl<A> Default for ChainedSignal<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_chain_forwards_emission() {
        let s1 = Arc::new(ChainedSignal::new());
        let s2 = Arc::new(ChainedSignal::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        s1.connect(slot(move |_: &()| {
            o.lock().push("s1");
            Ok(())
        }));
        let o = Arc::clone(&order);
        s2.connect(slot(move |_: &()| {
            o.lock().push("s2");
            Ok(())
        }));

        s1.chain(&s2);
        s1.emit(&()).unwrap();
        assert_eq!(*order.lock(), vec!["s1", "s2"]);
    }

    // Dropping the only strong reference to a downstream signal silently
    // prunes the link on the next emit.
    #[test]
    fn test_expired_chain_is_pruned() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let s1 = Arc::new(ChainedSignal::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        s1.connect(slot(move |_: &()| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        {
            let s2: Arc<ChainedSignal<()>> = Arc::new(ChainedSignal::new());
            s1.chain(&s2);
            assert_eq!(s1.chain_len(), 1);
        }

        s1.emit(&()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(s1.chain_len(), 0);
    }

    #[test]
    fn test_multi_level_chain() {
        let s1 = Arc::new(ChainedSignal::new());
        let s2 = Arc::new(ChainedSignal::new());
        let s3 = Arc::new(ChainedSignal::new());
        let total = Arc::new(AtomicUsize::new(0));

        for signal in [&s1, &s2, &s3] {
            let total = Arc::clone(&total);
            signal.connect(slot(move |v: &usize| {
                total.fetch_add(*v, Ordering::SeqCst);
                Ok(())
            }));
        }
        s1.chain(&s2);
        s2.chain(&s3);

        s1.emit(&10).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn test_downstream_failures_bubble_up() {
        let s1: Arc<ChainedSignal<()>> = Arc::new(ChainedSignal::new());
        let s2 = Arc::new(ChainedSignal::new());
        s2.connect(slot(|_: &()| Err("downstream broke".into())));
        s1.chain(&s2);

        let err = s1.emit(&()).unwrap_err();
        let SignalError::EmissionFailure(causes) = err else {
            panic!("expected EmissionFailure");
        };
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].0, "downstream broke");
    }

    #[test]
    fn test_disconnect_local_slot() {
        let s1 = ChainedSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let counting = crate::slot(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        s1.connect(Arc::clone(&counting));
        s1.disconnect(&counting);
        s1.emit(&()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_drops_chains() {
        let s1: Arc<ChainedSignal<()>> = Arc::new(ChainedSignal::new());
        let s2 = Arc::new(ChainedSignal::new());
        s1.connect(slot(|_| Ok(())));
        s1.chain(&s2);
        s1.clear();
        assert!(s1.is_empty());
        assert_eq!(s1.chain_len(), 0);
    }
}
