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

use crate::TaskError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Outcome delivered through a [`TaskHandle`].
pub type TaskOutcome<T> = Result<T, TaskError>;

pub(crate) struct HandleState<T> {
    slot: Mutex<Option<TaskOutcome<T>>>,
    ready: Condvar,
}

impl<T> HandleState<T> {
    /// Write-once completion; later writes are ignored.
    pub(crate) fn complete(&self, outcome: TaskOutcome<T>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_all();
        }
    }
}

/// One-shot result handle for a submitted task.
///
/// The executor writes the slot exactly once (the payload's value, its
/// panic, or a shutdown notice) and the handle side reads it out.
pub struct TaskHandle<T> {
    state: Arc<HandleState<T>>,
}

/// Create a connected handle/state pair.
pub(crate) fn channel<T>() -> (TaskHandle<T>, Arc<HandleState<T>>) {
    let state = Arc::new(HandleState {
        slot: Mutex::new(None),
        ready: Condvar::new(),
    });
    (TaskHandle { state: Arc::clone(&state) }, state)
}

impl<T> TaskHandle<T> {
    /// Block until the outcome arrives and take it.
    pub fn wait(self) -> TaskOutcome<T> {
        let state = &self.state;
        let mut slot = state.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            state.ready.wait(&mut slot);
        }
    }

    /// Block until the outcome arrives or `timeout` elapses. Returns
    /// whether the task has finished; the outcome stays in the slot.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.state.slot.lock();
        if slot.is_some() {
            return true;
        }
        self.state.ready.wait_for(&mut slot, timeout);
        slot.is_some()
    }

    /// Take the outcome if it has already arrived.
    pub fn try_take(&self) -> Option<TaskOutcome<T>> {
        self.state.slot.lock().take()
    }

    /// Whether the outcome has been written and not yet taken.
    pub fn is_finished(&self) -> bool {
        self.state.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_returns_completed_value() {
        let (handle, state) = channel::<u32>();
        state.complete(Ok(7));
        assert_eq!(handle.wait(), Ok(7));
    }

    #[test]
    fn test_wait_blocks_until_completion() {
        let (handle, state) = channel::<&'static str>();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            state.complete(Ok("done"));
        });
        let started = Instant::now();
        assert_eq!(handle.wait(), Ok("done"));
        assert!(started.elapsed() >= Duration::from_millis(25));
        writer.join().unwrap();
    }

    #[test]
    fn test_write_once_keeps_first_outcome() {
        let (handle, state) = channel::<i32>();
        state.complete(Ok(1));
        state.complete(Ok(2));
        state.complete(Err(TaskError::Cancelled));
        assert_eq!(handle.wait(), Ok(1));
    }

    #[test]
    fn test_wait_timeout_before_and_after() {
        let (handle, state) = channel::<()>();
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
        state.complete(Err(TaskError::PoolShutdown));
        assert!(handle.wait_timeout(Duration::from_millis(10)));
        assert_eq!(handle.try_take(), Some(Err(TaskError::PoolShutdown)));
    }

    #[test]
    fn test_try_take_polls() {
        let (handle, state) = channel::<i32>();
        assert!(!handle.is_finished());
        assert_eq!(handle.try_take(), None);
        state.complete(Ok(3));
        assert!(handle.is_finished());
        assert_eq!(handle.try_take(), Some(Ok(3)));
        // One-shot: the value is gone after the first take.
        assert_eq!(handle.try_take(), None);
    }
}
