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

//! Worker-pool internals: shared queues, the dispatch/steal protocol and
//! the worker main loop.

use crate::config::ExecutorConfig;
use crate::panic_message;
use crate::queue::{GlobalQueue, WorkerQueue};
use crate::task::Task;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of a worker thread.
///
/// `Idle ↔ Running` per task; `Idle → Exiting` on timeout above the
/// minimum worker count; `Exiting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Exiting,
}

impl WorkerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Exiting => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Exiting,
        }
    }
}

/// State shared between the executor facade and its workers.
pub(crate) struct PoolShared {
    pub(crate) config: ExecutorConfig,
    /// Run-state flag: `Stopped → Running` on start, back on stop.
    pub(crate) running: AtomicBool,
    /// Monotonic submission sequence assigned at enqueue.
    seq: AtomicU64,
    /// Tasks sitting in immediate queues.
    pub(crate) pending: AtomicUsize,
    /// Tasks currently held by a worker.
    pub(crate) active: AtomicUsize,
    pub(crate) completed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) live_workers: AtomicUsize,
    /// Outstanding shrink requests claimed by workers on their next pass.
    pub(crate) threads_to_stop: AtomicUsize,
    /// One slot per potential worker id in `[0, max_threads)`.
    pub(crate) local: Box<[CachePadded<WorkerQueue>]>,
    /// Single queue used when work stealing is disabled.
    pub(crate) global: GlobalQueue,
    sleep_lock: Mutex<()>,
    work_available: Condvar,
    done_lock: Mutex<()>,
    all_done: Condvar,
}

impl PoolShared {
    pub(crate) fn new(config: ExecutorConfig) -> Self {
        let slots = config.max_threads;
        Self {
            config,
            running: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            live_workers: AtomicUsize::new(0),
            threads_to_stop: AtomicUsize::new(0),
            local: (0..slots).map(|_| CachePadded::new(WorkerQueue::new())).collect::<Vec<_>>().into_boxed_slice(),
            global: GlobalQueue::new(),
            sleep_lock: Mutex::new(()),
            work_available: Condvar::new(),
            done_lock: Mutex::new(()),
            all_done: Condvar::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Route a task to an immediate queue and raise one wakeup signal.
    ///
    /// Under work stealing the target is the live worker with the shortest
    /// deque (ties broken by lowest id); otherwise the global queue.
    pub(crate) fn enqueue(&self, mut task: Task) {
        if !self.is_running() {
            task.fail(crate::TaskError::PoolShutdown);
            return;
        }

        task.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Release);

        if self.config.use_work_stealing {
            let mut target = 0usize;
            let mut shortest = usize::MAX;
            for (id, queue) in self.local.iter().enumerate() {
                if !queue.is_live() {
                    continue;
                }
                let len = queue.len();
                if len < shortest {
                    shortest = len;
                    target = id;
                    if len == 0 {
                        break;
                    }
                }
            }
            // With no live worker yet (start or resize in flight) the task
            // parks on queue 0 until someone drains or steals it.
            self.local[target].insert(task);
        } else {
            self.global.push(task);
        }

        // A stop racing this enqueue may already have drained the queues;
        // whoever observes the stopped flag sweeps again so nothing is
        // stranded with an unresolved handle.
        if !self.is_running() {
            for task in self.drain_immediate() {
                task.fail(crate::TaskError::PoolShutdown);
            }
            return;
        }

        self.wake_one();
    }

    pub(crate) fn dequeue(&self, worker_id: usize) -> Option<Task> {
        if self.config.use_work_stealing {
            self.local[worker_id].pop_front().or_else(|| self.steal(worker_id))
        } else {
            self.global.pop()
        }
    }

    /// Scan peers round-robin from `(worker_id + 1) % n`, stealing from
    /// the tail of the first non-empty deque.
    fn steal(&self, worker_id: usize) -> Option<Task> {
        let n = self.local.len();
        for offset in 1..n {
            let victim = (worker_id + offset) % n;
            if let Some(task) = self.local[victim].steal_back() {
                return Some(task);
            }
        }
        None
    }

    pub(crate) fn has_pending_work(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    pub(crate) fn wake_one(&self) {
        let _guard = self.sleep_lock.lock();
        self.work_available.notify_one();
    }

    pub(crate) fn wake_all(&self) {
        let _guard = self.sleep_lock.lock();
        self.work_available.notify_all();
    }

    /// Timed wait for the next wakeup signal; re-checks for work under the
    /// lock so a signal racing the queue check is not lost.
    fn park(&self, timeout: Duration) -> bool {
        let mut guard = self.sleep_lock.lock();
        if self.has_pending_work() || !self.is_running() || self.threads_to_stop.load(Ordering::Acquire) > 0 {
            return false;
        }
        self.work_available.wait_for(&mut guard, timeout).timed_out()
    }

    pub(crate) fn notify_if_all_done(&self) {
        if self.pending.load(Ordering::Acquire) == 0 && self.active.load(Ordering::Acquire) == 0 {
            let _guard = self.done_lock.lock();
            self.all_done.notify_all();
        }
    }

    /// Block until `pending == 0 && active == 0`.
    pub(crate) fn wait_for_all(&self) {
        let mut guard = self.done_lock.lock();
        while self.pending.load(Ordering::Acquire) > 0 || self.active.load(Ordering::Acquire) > 0 {
            self.all_done.wait(&mut guard);
        }
    }

    /// Remove every task from the immediate queues.
    pub(crate) fn drain_immediate(&self) -> Vec<Task> {
        let mut drained = self.global.drain();
        for queue in self.local.iter() {
            drained.extend(queue.drain());
        }
        // Every drained task still holds exactly one pending slot.
        if !drained.is_empty() {
            self.pending.fetch_sub(drained.len(), Ordering::Release);
        }
        self.notify_if_all_done();
        drained
    }

    pub(crate) fn queue_size(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Claim one outstanding shrink request.
    fn claim_stop_request(&self) -> bool {
        self.threads_to_stop
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Claim the right to exit on idle timeout, never dropping the live
    /// count below `min_threads`.
    fn claim_idle_exit(&self) -> bool {
        self.live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                if live > self.config.min_threads { Some(live - 1) } else { None }
            })
            .is_ok()
    }
}

/// Spawn the worker thread for `id`. The queue slot is marked live before
/// the thread starts so submissions can target it immediately.
pub(crate) fn spawn_worker(shared: &Arc<PoolShared>, id: usize) -> Result<JoinHandle<()>, std::io::Error> {
    shared.local[id].set_live(true);
    shared.local[id].set_state(WorkerState::Idle.as_u8());
    shared.live_workers.fetch_add(1, Ordering::Release);

    let result = std::thread::Builder::new()
        .name(format!("dotsync-worker-{id}"))
        .spawn({
            let shared = Arc::clone(shared);
            move || worker_loop(shared, id)
        });

    if result.is_err() {
        shared.local[id].set_live(false);
        shared.live_workers.fetch_sub(1, Ordering::Release);
    }
    result
}

/// Worker main loop.
///
/// Take from the own deque (priority-ordered), steal from peers when it
/// is empty, otherwise wait on the wakeup signal bounded by
/// `thread_idle_timeout`. Tasks run to completion; a shutdown flag is
/// checked between tasks only.
fn worker_loop(shared: Arc<PoolShared>, id: usize) {
    if shared.config.pin_threads {
        crate::platform::pin_current_thread(id);
    }
    if shared.config.set_priority {
        crate::platform::set_current_thread_priority(shared.config.thread_priority);
    }
    debug!(worker = id, "worker started");

    loop {
        if !shared.is_running() {
            break;
        }
        if shared.claim_stop_request() {
            shared.live_workers.fetch_sub(1, Ordering::Release);
            exit_worker(&shared, id, "shrink request");
            return;
        }

        if let Some(task) = shared.dequeue(id) {
            shared.local[id].set_state(WorkerState::Running.as_u8());
            shared.active.fetch_add(1, Ordering::Release);
            shared.pending.fetch_sub(1, Ordering::Release);

            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                // The failure already reached the result handle; the
                // worker only records it and moves on.
                shared.panicked.fetch_add(1, Ordering::Relaxed);
                warn!(worker = id, panic = %panic_message(&payload), "task panicked");
            }

            shared.completed.fetch_add(1, Ordering::Relaxed);
            shared.active.fetch_sub(1, Ordering::Release);
            shared.local[id].set_state(WorkerState::Idle.as_u8());
            shared.notify_if_all_done();
            continue;
        }

        let timed_out = shared.park(shared.config.thread_idle_timeout);
        if timed_out && shared.claim_idle_exit() {
            exit_worker(&shared, id, "idle timeout");
            return;
        }
    }

    // Stop path: live accounting here, queue drain in `stop`.
    shared.live_workers.fetch_sub(1, Ordering::Release);
    shared.local[id].set_live(false);
    shared.local[id].set_state(WorkerState::Exiting.as_u8());
    debug!(worker = id, "worker stopped");
}

/// Leave the pool outside of `stop`: hand any queued tasks back to the
/// live workers before going dark.
fn exit_worker(shared: &Arc<PoolShared>, id: usize, reason: &str) {
    shared.local[id].set_live(false);
    shared.local[id].set_state(WorkerState::Exiting.as_u8());

    for task in shared.local[id].drain() {
        // Re-route without re-counting: the task already holds a pending
        // slot.
        if shared.config.use_work_stealing {
            let mut target = None;
            let mut shortest = usize::MAX;
            for (peer, queue) in shared.local.iter().enumerate() {
                if peer != id && queue.is_live() && queue.len() < shortest {
                    shortest = queue.len();
                    target = Some(peer);
                }
            }
            match target {
                Some(peer) => shared.local[peer].insert(task),
                None => shared.global.push(task),
            }
        } else {
            shared.global.push(task);
        }
        shared.wake_one();
    }

    debug!(worker = id, reason, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    fn shared(config: ExecutorConfig) -> Arc<PoolShared> {
        Arc::new(PoolShared::new(config.normalized()))
    }

    #[test]
    fn test_enqueue_rejected_when_stopped() {
        let shared = shared(ExecutorConfig::default());
        let failed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed);
        let task = Task::with_payload(
            Priority::Normal,
            Box::new(|| {}),
            Box::new(move |err| {
                assert_eq!(err, crate::TaskError::PoolShutdown);
                flag.store(true, Ordering::SeqCst);
            }),
        );
        shared.enqueue(task);
        assert!(failed.load(Ordering::SeqCst));
        assert_eq!(shared.queue_size(), 0);
    }

    #[test]
    fn test_enqueue_targets_shortest_live_queue() {
        let config = ExecutorConfig {
            min_threads: 3,
            max_threads: 3,
            ..ExecutorConfig::default()
        };
        let shared = shared(config);
        shared.running.store(true, Ordering::Release);
        for queue in shared.local.iter() {
            queue.set_live(true);
        }

        // Preload queues 0 and 1 so the next submission lands on 2.
        shared.local[0].insert(Task::new(Priority::Normal, || {}));
        shared.local[1].insert(Task::new(Priority::Normal, || {}));
        shared.enqueue(Task::new(Priority::Normal, || {}));
        assert_eq!(shared.local[2].len(), 1);

        // Tie between all three: lowest id wins.
        shared.local[2].drain();
        shared.local[0].drain();
        shared.local[1].drain();
        shared.enqueue(Task::new(Priority::Normal, || {}));
        assert_eq!(shared.local[0].len(), 1);
    }

    #[test]
    fn test_steal_scans_round_robin_from_next_peer() {
        let config = ExecutorConfig {
            min_threads: 4,
            max_threads: 4,
            ..ExecutorConfig::default()
        };
        let shared = shared(config);
        shared.local[3].insert(Task::new(Priority::Normal, || {}));

        // Worker 1 scans 2, 3, 0 and finds the task on 3.
        let stolen = shared.steal(1);
        assert!(stolen.is_some());
        assert_eq!(shared.local[3].len(), 0);
    }

    #[test]
    fn test_global_queue_used_without_stealing() {
        let config = ExecutorConfig {
            use_work_stealing: false,
            ..ExecutorConfig::default()
        };
        let shared = shared(config);
        shared.running.store(true, Ordering::Release);
        shared.enqueue(Task::new(Priority::High, || {}));
        assert_eq!(shared.global.len(), 1);
        assert!(shared.dequeue(0).is_some());
    }

    #[test]
    fn test_claim_idle_exit_respects_minimum() {
        let config = ExecutorConfig {
            min_threads: 2,
            max_threads: 4,
            ..ExecutorConfig::default()
        };
        let shared = shared(config);
        shared.live_workers.store(3, Ordering::Release);
        assert!(shared.claim_idle_exit());
        assert!(!shared.claim_idle_exit());
        assert_eq!(shared.live_workers.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_drain_immediate_resets_pending() {
        let shared = shared(ExecutorConfig::default());
        shared.running.store(true, Ordering::Release);
        shared.local[0].set_live(true);
        for _ in 0..3 {
            shared.enqueue(Task::new(Priority::Normal, || {}));
        }
        assert_eq!(shared.queue_size(), 3);
        let drained = shared.drain_immediate();
        assert_eq!(drained.len(), 3);
        assert_eq!(shared.queue_size(), 0);
    }
}
