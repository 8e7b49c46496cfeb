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
use parking_lot::Mutex;
use std::sync::Arc;

/// Signal whose slots are dispatched as executor tasks.
///
/// `emit` spawns one task per slot and blocks until every task has
/// terminated; inter-slot ordering is unspecified. Slot errors, slot
/// panics and dispatch rejections are all aggregated into a single
/// `EmissionFailure`.
pub struct AsyncSignal<A> {
    executor: Arc<AsyncExecutor>,
    slots: Mutex<Vec<Slot<A>>>,
    priority: Priority,
}

impl<A> AsyncSignal<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create a signal dispatching on `executor` at `Normal` priority.
    pub fn new(executor: Arc<AsyncExecutor>) -> Self {
        Self::with_priority(executor, Priority::Normal)
    }

    /// Create a signal whose slot tasks run at `priority`.
    pub fn with_priority(executor: Arc<AsyncExecutor>, priority: Priority) -> Self {
        Self {
            executor,
            slots: Mutex::new(Vec::new()),
            priority,
        }
    }

    /// Register a slot.
    pub fn connect(&self, slot: Slot<A>) {
        self.slots.lock().push(slot);
    }

    /// Remove every registration of exactly this slot (`Arc` pointer
    /// identity).
    pub fn disconnect(&self, slot: &Slot<A>) {
        self.slots.lock().retain(|existing| !Arc::ptr_eq(existing, slot));
    }

    /// Dispatch each connected slot as a task and wait for all of them.
    pub fn emit(&self, args: &A) -> SignalResult<()> {
        let snapshot: Vec<Slot<A>> = self.slots.lock().clone();
        let mut outcome = EmissionOutcome::new();
        let mut handles: Vec<TaskHandle<Result<(), SlotError>>> = Vec::with_capacity(snapshot.len());

        for slot in snapshot {
            let args = args.clone();
            match self
                .executor
                .submit(move || slot(&args), ExecutionStrategy::Immediate, self.priority)
            {
                Ok(handle) => handles.push(handle),
                Err(dispatch) => outcome.push(SlotError(format!("dispatch failed: {dispatch}"))),
            }
        }

        // Emit returns only after every spawned slot task has terminated,
        // successfully or not.
        for handle in handles {
            match handle.wait() {
                Ok(Ok(())) => {}
                Ok(Err(slot_failure)) => outcome.push(slot_failure),
                Err(task_failure) => outcome.push(SlotError(task_failure.to_string())),
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SignalError, slot};
    use dotsync_executor::ExecutorConfig;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn executor(workers: usize) -> Arc<AsyncExecutor> {
        let executor = AsyncExecutor::new(ExecutorConfig {
            min_threads: workers,
            max_threads: workers,
            ..ExecutorConfig::default()
        });
        executor.start().unwrap();
        Arc::new(executor)
    }

    #[test]
    fn test_emit_runs_every_slot() {
        let signal = AsyncSignal::new(executor(4));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let count = Arc::clone(&count);
            signal.connect(slot(move |delta: &usize| {
                count.fetch_add(*delta, Ordering::SeqCst);
                Ok(())
            }));
        }

        signal.emit(&5).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn test_emit_blocks_until_all_slots_finish() {
        let signal = AsyncSignal::new(executor(4));
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let finished = Arc::clone(&finished);
            signal.connect(slot(move |_: &()| {
                thread::sleep(Duration::from_millis(20));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        signal.emit(&()).unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_slots_run_off_the_calling_thread() {
        let signal = AsyncSignal::new(executor(2));
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let s = Arc::clone(&seen);
        signal.connect(slot(move |_: &()| {
            s.lock().insert(thread::current().id());
            Ok(())
        }));

        signal.emit(&()).unwrap();
        assert!(!seen.lock().contains(&thread::current().id()));
    }

    #[test]
    fn test_failures_and_panics_are_aggregated() {
        let signal = AsyncSignal::new(executor(2));
        let succeeded = Arc::new(AtomicUsize::new(0));

        signal.connect(slot(|_: &()| Err("slot error".into())));
        let ok = Arc::clone(&succeeded);
        signal.connect(slot(move |_: &()| {
            ok.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        signal.connect(slot(|_: &()| panic!("slot panic")));

        let err = signal.emit(&()).unwrap_err();
        let SignalError::EmissionFailure(causes) = err else {
            panic!("expected EmissionFailure");
        };
        assert_eq!(causes.len(), 2);
        // Successful slots are unaffected by the failing ones.
        assert_eq!(succeeded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_on_stopped_executor_reports_dispatch_failure() {
        let exec = executor(1);
        let signal = AsyncSignal::new(Arc::clone(&exec));
        signal.connect(slot(|_: &()| Ok(())));
        exec.stop();

        let err = signal.emit(&()).unwrap_err();
        let SignalError::EmissionFailure(causes) = err else {
            panic!("expected EmissionFailure");
        };
        assert_eq!(causes.len(), 1);
        assert!(causes[0].0.contains("dispatch failed"));
    }

    #[test]
    fn test_disconnect_by_identity() {
        let signal = AsyncSignal::new(executor(2));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let counting = slot(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        signal.connect(Arc::clone(&counting));
        signal.disconnect(&counting);
        assert!(signal.is_empty());
        signal.emit(&()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
