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

//! Timed dispatch: scheduled tasks sit on a min-heap keyed by their
//! not-before instant until a single timer thread pops the due ones and
//! resubmits them as immediate work.

use crate::TaskError;
use crate::pool::PoolShared;
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::debug;

/// A task bound to a not-before instant. Ordered by (instant, insertion
/// sequence) so simultaneous deadlines fire in submission order.
pub(crate) struct ScheduledEntry {
    pub(crate) not_before: Instant,
    seq: u64,
    pub(crate) task: Task,
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.not_before.cmp(&other.not_before).then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.not_before == other.not_before && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

/// Heap plus wakeup channel shared with the timer thread.
pub(crate) struct TimerShared {
    heap: Mutex<BinaryHeap<Reverse<ScheduledEntry>>>,
    wakeup: Condvar,
    running: AtomicBool,
    seq: AtomicU64,
}

impl TimerShared {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            running: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        }
    }

    /// Park a task until `not_before`, waking the timer if the new entry
    /// becomes the earliest deadline.
    pub(crate) fn push(&self, not_before: Instant, task: Task) {
        let entry = ScheduledEntry {
            not_before,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            task,
        };
        let mut heap = self.heap.lock();
        heap.push(Reverse(entry));
        self.wakeup.notify_one();
    }

    pub(crate) fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _heap = self.heap.lock();
        self.wakeup.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

/// Spawn the timer thread draining `timer` into `pool`.
pub(crate) fn spawn_timer(pool: Arc<PoolShared>, timer: Arc<TimerShared>) -> Result<JoinHandle<()>, std::io::Error> {
    timer.start();
    std::thread::Builder::new().name("dotsync-timer".into()).spawn(move || timer_loop(pool, timer))
}

fn timer_loop(pool: Arc<PoolShared>, timer: Arc<TimerShared>) {
    debug!("timer started");
    let mut heap = timer.heap.lock();

    while timer.running.load(Ordering::Acquire) {
        match heap.pop() {
            Some(Reverse(entry)) => {
                let now = Instant::now();
                if entry.not_before <= now {
                    // Resubmit outside the heap lock: enqueue may fail the
                    // task, and its handle callback must not deadlock us.
                    drop(heap);
                    debug!(overdue_us = now.duration_since(entry.not_before).as_micros() as u64, "dispatching scheduled task");
                    pool.enqueue(entry.task);
                    heap = timer.heap.lock();
                } else {
                    let deadline = entry.not_before;
                    heap.push(Reverse(entry));
                    timer.wakeup.wait_until(&mut heap, deadline);
                }
            }
            None => {
                timer.wakeup.wait(&mut heap);
            }
        }
    }

    // Shutdown: everything still parked fails with PoolShutdown.
    let leftovers: Vec<_> = heap.drain().collect();
    drop(heap);
    for Reverse(entry) in leftovers {
        entry.task.fail(TaskError::PoolShutdown);
    }
    debug!("timer stopped");
}
