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

use crate::task::Task;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Ordering wrapper so the global heap pops by (priority desc, sequence
/// asc): higher priority wins, and within a priority the earlier
/// submission is the greater element.
pub(crate) struct PrioritizedTask(pub(crate) Task);

impl Ord for PrioritizedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

impl PartialOrd for PrioritizedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PrioritizedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for PrioritizedTask {}

/// Global priority queue used when work stealing is disabled.
pub(crate) struct GlobalQueue {
    heap: Mutex<BinaryHeap<PrioritizedTask>>,
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub(crate) fn push(&self, task: Task) {
        self.heap.lock().push(PrioritizedTask(task));
    }

    pub(crate) fn pop(&self) -> Option<Task> {
        self.heap.lock().pop().map(|p| p.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub(crate) fn drain(&self) -> Vec<Task> {
        self.heap.lock().drain().map(|p| p.0).collect()
    }
}

/// Per-worker deque kept ordered by (priority desc, sequence asc).
///
/// The owner pops the head; thieves steal the tail. Insertion places the
/// task before the first lower-priority entry, so equal priorities stay
/// FIFO by submission sequence.
pub(crate) struct WorkerQueue {
    tasks: Mutex<VecDeque<Task>>,
    /// Whether a live worker currently drains this queue.
    live: AtomicBool,
    /// Diagnostic worker state (see [`crate::WorkerState`]).
    state: AtomicU8,
}

impl WorkerQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            live: AtomicBool::new(false),
            state: AtomicU8::new(0),
        }
    }

    pub(crate) fn insert(&self, task: Task) {
        let mut tasks = self.tasks.lock();
        let position = tasks
            .iter()
            .position(|queued| queued.priority() < task.priority())
            .unwrap_or(tasks.len());
        tasks.insert(position, task);
    }

    pub(crate) fn pop_front(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    pub(crate) fn steal_back(&self) -> Option<Task> {
        self.tasks.lock().pop_back()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn drain(&self) -> Vec<Task> {
        self.tasks.lock().drain(..).collect()
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}
