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

use crate::config::ExecutorConfig;
use crate::handle::{self, TaskHandle};
use crate::panic_message;
use crate::pool::{PoolShared, WorkerState, spawn_worker};
use crate::scheduler::{TimerShared, spawn_timer};
use crate::task::{ExecutionStrategy, Priority, Task};
use crate::{ExecutorError, ExecutorResult, TaskError};
use dotsync_lockfree::LockFreeStack;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct WorkerHandle {
    id: usize,
    join: JoinHandle<()>,
}

struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Point-in-time snapshot of the pool gauges.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Tasks waiting in immediate queues
    pub queue_size: usize,
    /// Tasks currently held by workers
    pub active: usize,
    /// Tasks that finished execution
    pub completed: u64,
    /// Tasks whose payload panicked
    pub panicked: u64,
    /// Live worker threads
    pub workers: usize,
    /// Deferred tasks not yet flushed
    pub deferred: usize,
    /// Scheduled tasks still parked on the timer heap
    pub scheduled: usize,
}

/// High-level executor over a priority thread pool, with immediate,
/// deferred and scheduled execution strategies.
///
/// # Lifecycle
/// `Stopped → Running` on [`start`](Self::start), back on
/// [`stop`](Self::stop); both are idempotent. `stop` drains the queues,
/// fails the orphaned result handles with `PoolShutdown` and joins every
/// pool thread, so it must not be called from inside a task.
///
/// # Workflow
/// 1. `submit` wraps the closure, assigns a submission sequence and routes
///    it per strategy
/// 2. Workers drain their deques highest-priority-first and steal from
///    peers when idle
/// 3. The outcome lands in the returned [`TaskHandle`]
pub struct AsyncExecutor {
    shared: Arc<PoolShared>,
    timer: Arc<TimerShared>,
    /// Deferred submissions park here until explicitly flushed.
    deferred: LockFreeStack<Task>,
    workers: Mutex<Vec<WorkerHandle>>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
    stats_thread: Mutex<Option<JoinHandle<()>>>,
    stats_signal: Arc<StopSignal>,
}

impl AsyncExecutor {
    /// Build an executor from `config` (normalized per
    /// [`ExecutorConfig::normalized`]). No threads run until `start`.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared::new(config.normalized())),
            timer: Arc::new(TimerShared::new()),
            deferred: LockFreeStack::new(),
            workers: Mutex::new(Vec::new()),
            timer_thread: Mutex::new(None),
            stats_thread: Mutex::new(None),
            stats_signal: Arc::new(StopSignal {
                stopped: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Whether the pool is in the `Running` state.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Spawn `min_threads` workers and the timer thread. A second call on
    /// a running pool is a no-op; a spawn failure rolls the executor back
    /// to `Stopped` before returning the error.
    pub fn start(&self) -> ExecutorResult<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(
            min_threads = self.shared.config.min_threads,
            max_threads = self.shared.config.max_threads,
            work_stealing = self.shared.config.use_work_stealing,
            "starting executor"
        );

        {
            let mut workers = self.workers.lock();
            for id in 0..self.shared.config.min_threads {
                match spawn_worker(&self.shared, id) {
                    Ok(join) => workers.push(WorkerHandle { id, join }),
                    Err(e) => {
                        drop(workers);
                        self.halt();
                        return Err(ExecutorError::Spawn(e));
                    }
                }
            }
        }

        match spawn_timer(Arc::clone(&self.shared), Arc::clone(&self.timer)) {
            Ok(join) => *self.timer_thread.lock() = Some(join),
            Err(e) => {
                self.halt();
                return Err(ExecutorError::Spawn(e));
            }
        }

        if self.shared.config.stats_interval > Duration::ZERO {
            *self.stats_signal.stopped.lock() = false;
            match self.spawn_stats() {
                Ok(join) => *self.stats_thread.lock() = Some(join),
                Err(e) => {
                    self.halt();
                    return Err(ExecutorError::Spawn(e));
                }
            }
        }

        Ok(())
    }

    /// Stop the pool: workers finish the task in hand, pick no new work
    /// and join; every still-pending task fails its handle with
    /// `PoolShutdown`. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.halt();
    }

    fn halt(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.timer.stop();
        self.shared.wake_all();
        {
            let mut stopped = self.stats_signal.stopped.lock();
            *stopped = true;
            self.stats_signal.cond.notify_all();
        }

        let handles: Vec<WorkerHandle> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join.join().is_err() {
                warn!(worker = handle.id, "worker thread panicked outside a task");
            }
        }
        if let Some(timer) = self.timer_thread.lock().take() {
            let _ = timer.join();
        }
        if let Some(stats) = self.stats_thread.lock().take() {
            let _ = stats.join();
        }

        for task in self.shared.drain_immediate() {
            task.fail(TaskError::PoolShutdown);
        }
        while let Some(task) = self.deferred.pop() {
            task.fail(TaskError::PoolShutdown);
        }

        self.shared.threads_to_stop.store(0, Ordering::Release);
        self.shared.notify_if_all_done();
        debug!("executor stopped");
    }

    /// Submit a closure with an execution strategy and priority, returning
    /// the one-shot handle for its outcome.
    pub fn submit<F, R>(&self, f: F, strategy: ExecutionStrategy, priority: Priority) -> ExecutorResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = make_task(priority, f);
        self.submit_task(task, strategy)?;
        Ok(handle)
    }

    /// Submit a raw task record. Rejects records without a payload.
    pub fn submit_task(&self, task: Task, strategy: ExecutionStrategy) -> ExecutorResult<()> {
        if task.is_empty() {
            return Err(ExecutorError::EmptyTask);
        }
        match strategy {
            ExecutionStrategy::Immediate | ExecutionStrategy::Scheduled => {
                if !self.shared.is_running() {
                    return Err(ExecutorError::PoolShutdown);
                }
                self.shared.enqueue(task);
                Ok(())
            }
            ExecutionStrategy::Deferred => {
                self.deferred.push(task);
                Ok(())
            }
        }
    }

    /// Run `f` no earlier than `delay` from now. A zero delay is rejected
    /// as `InvalidDelay`.
    pub fn schedule_after<F, R>(&self, delay: Duration, priority: Priority, f: F) -> ExecutorResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if delay.is_zero() {
            return Err(ExecutorError::InvalidDelay);
        }
        self.schedule_at(Instant::now() + delay, priority, f)
    }

    /// Run `f` no earlier than `not_before`. Past instants dispatch
    /// immediately.
    pub fn schedule_at<F, R>(&self, not_before: Instant, priority: Priority, f: F) -> ExecutorResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.shared.is_running() {
            return Err(ExecutorError::PoolShutdown);
        }
        let (task, handle) = make_task(priority, f);
        self.timer.push(not_before, task);
        Ok(handle)
    }

    /// Move every deferred task into the immediate queues.
    pub fn execute_deferred(&self) {
        while let Some(task) = self.deferred.pop() {
            // `enqueue` fails the task with PoolShutdown on a stopped pool.
            self.shared.enqueue(task);
        }
    }

    /// Flush deferred work, then block until `pending == 0 && active == 0`.
    ///
    /// Scheduled tasks whose deadline has not arrived are not waited for.
    pub fn wait_for_all(&self) {
        self.execute_deferred();
        self.shared.wait_for_all();
    }

    /// Grow or shrink the live worker set to `n` (clamped to
    /// `max_threads`). Requires a running pool.
    pub fn resize(&self, n: usize) -> ExecutorResult<()> {
        if n == 0 {
            return Err(ExecutorError::InvalidSize);
        }
        if !self.shared.is_running() {
            return Err(ExecutorError::PoolShutdown);
        }
        let target = n.min(self.shared.config.max_threads);
        if target < n {
            warn!(requested = n, clamped = target, "resize clamped to max_threads");
        }

        let mut workers = self.workers.lock();
        workers.retain(|handle| !handle.join.is_finished());
        let live = self.shared.live_workers.load(Ordering::Acquire);

        if target > live {
            let mut used: HashSet<usize> = workers.iter().map(|handle| handle.id).collect();
            for _ in live..target {
                let mut id = 0;
                while used.contains(&id) {
                    id += 1;
                }
                if id >= self.shared.config.max_threads {
                    break;
                }
                match spawn_worker(&self.shared, id) {
                    Ok(join) => {
                        used.insert(id);
                        workers.push(WorkerHandle { id, join });
                    }
                    Err(e) => return Err(ExecutorError::Spawn(e)),
                }
            }
        } else if target < live {
            self.shared.threads_to_stop.fetch_add(live - target, Ordering::Release);
            // Exits are voluntary: nudge sleepers until the count settles.
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.shared.live_workers.load(Ordering::Acquire) > target && Instant::now() < deadline {
                self.shared.wake_all();
                std::thread::sleep(Duration::from_millis(1));
            }
            workers.retain(|handle| !handle.join.is_finished());
        }
        Ok(())
    }

    /// Remove every task from the immediate queues, failing their handles
    /// with `Cancelled`. Returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        let drained = self.shared.drain_immediate();
        let count = drained.len();
        for task in drained {
            task.fail(TaskError::Cancelled);
        }
        count
    }

    /// Tasks waiting in immediate queues.
    pub fn queue_size(&self) -> usize {
        self.shared.queue_size()
    }

    /// Tasks currently held by workers.
    pub fn active_count(&self) -> usize {
        self.shared.active_count()
    }

    /// Live worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.live_workers.load(Ordering::Acquire)
    }

    /// Tasks that finished execution (successfully or panicking).
    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Tasks whose payload panicked.
    pub fn panicked_count(&self) -> u64 {
        self.shared.panicked.load(Ordering::Relaxed)
    }

    /// Deferred tasks not yet flushed.
    pub fn deferred_size(&self) -> usize {
        self.deferred.len()
    }

    /// Scheduled tasks still parked on the timer heap.
    pub fn scheduled_size(&self) -> usize {
        self.timer.len()
    }

    /// Snapshot every pool gauge at once.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_size: self.queue_size(),
            active: self.active_count(),
            completed: self.completed_count(),
            panicked: self.panicked_count(),
            workers: self.worker_count(),
            deferred: self.deferred_size(),
            scheduled: self.scheduled_size(),
        }
    }

    /// Diagnostic states of the live workers.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared
            .local
            .iter()
            .filter(|queue| queue.is_live())
            .map(|queue| WorkerState::from_u8(queue.state()))
            .collect()
    }

    fn spawn_stats(&self) -> Result<JoinHandle<()>, std::io::Error> {
        let shared = Arc::clone(&self.shared);
        let signal = Arc::clone(&self.stats_signal);
        let interval = self.shared.config.stats_interval;
        std::thread::Builder::new().name("dotsync-stats".into()).spawn(move || {
            let mut stopped = signal.stopped.lock();
            while !*stopped {
                signal.cond.wait_for(&mut stopped, interval);
                if *stopped {
                    break;
                }
                debug!(
                    queue_size = shared.queue_size(),
                    active = shared.active_count(),
                    completed = shared.completed.load(Ordering::Relaxed),
                    workers = shared.live_workers.load(Ordering::Acquire),
                    "pool stats"
                );
            }
        })
    }
}

impl Default for AsyncExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wrap a typed closure into a task record plus its result handle. The
/// payload completes the handle with the value or the panic message; a
/// panic is re-raised so the worker can account for it.
fn make_task<F, R>(priority: Priority, f: F) -> (Task, TaskHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (handle, state) = handle::channel::<R>();
    let run_state = Arc::clone(&state);
    let payload: Box<dyn FnOnce() + Send> = Box::new(move || match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => run_state.complete(Ok(value)),
        Err(panic) => {
            run_state.complete(Err(TaskError::Panicked(panic_message(&panic))));
            resume_unwind(panic);
        }
    });
    let fail = Box::new(move |err: TaskError| state.complete(Err(err)));
    (Task::with_payload(priority, payload, fail), handle)
}
