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

use crate::{EmissionOutcome, SignalResult, Slot, SlotError};
use dotsync_executor::{AsyncExecutor, ExecutionStrategy, Priority, TaskHandle};
use parking_lot::RwLock;
use std::sync::Arc;

/// Slot count above which emission fans out to the executor.
const PARALLEL_THRESHOLD: usize = 4;

/// Signal with a shared-reader slot table.
///
/// Emission snapshots the slots under the read side of the lock; writers
/// (`connect`/`disconnect`) take the exclusive side. With more than
/// [`PARALLEL_THRESHOLD`] slots and an executor configured, the snapshot
/// is dispatched in parallel; `emit` still returns only after every slot
/// has finished.
pub struct ThreadSafeSignal<A> {
    slots: RwLock<Vec<Slot<A>>>,
    executor: Option<Arc<AsyncExecutor>>,
}

impl<A> ThreadSafeSignal<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Purely synchronous variant: every emit runs in the caller.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            executor: None,
        }
    }

    /// Enable parallel dispatch through `executor` for large slot sets.
    pub fn with_executor(executor: Arc<AsyncExecutor>) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            executor: Some(executor),
        }
    }

    /// Register a slot (exclusive lock).
    pub fn connect(&self, slot: Slot<A>) {
        self.slots.write().push(slot);
    }

    /// Remove every registration of exactly this slot (`Arc` pointer
    /// identity).
    pub fn disconnect(&self, slot: &Slot<A>) {
        self.slots.write().retain(|existing| !Arc::ptr_eq(existing, slot));
    }

    /// Invoke the snapshot of connected slots; in the caller when small,
    /// through the executor when large.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let snapshot: Vec<Slot<A>> = self.slots.read().clone();
        let mut outcome = EmissionOutcome::new();

        match &self.executor {
            Some(executor) if snapshot.len() > PARALLEL_THRESHOLD => {
                let mut handles: Vec<TaskHandle<Result<(), SlotError>>> = Vec::with_capacity(snapshot.len());
                for slot in snapshot {
                    let args = args.clone();
                    match executor.submit(move || slot(&args), ExecutionStrategy::Immediate, Priority::Normal) {
                        Ok(handle) => handles.push(handle),
                        Err(dispatch) => outcome.push(SlotError(format!("dispatch failed: {dispatch}"))),
                    }
                }
                for handle in handles {
                    match handle.wait() {
                        Ok(Ok(())) => {}
                        Ok(Err(slot_failure)) => outcome.push(slot_failure),
                        Err(task_failure) => outcome.push(SlotError(task_failure.to_string())),
                    }
                }
            }
            _ => {
                for slot in snapshot {
                    outcome.record(slot(args));
                }
            }
        }

        outcome.finish()
    }

    /// Number of connected slots (shared lock).
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no slots are connected.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Remove every slot.
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

impl<A> Default for ThreadSafeSignal<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
