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
use std::fmt;

/// Task execution priority levels
///
/// # Variants
/// - Low: Background/non-critical tasks
/// - Normal: Default execution priority
/// - High: Time-sensitive operations
/// - Critical: System-critical tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// Convert to numeric representation for array indexing
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Normal => write!(f, "Normal"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// How a submission enters the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Enqueue for the worker set right away
    Immediate,
    /// Park on the deferred queue until explicitly flushed
    Deferred,
    /// Hand to the timer; without an explicit deadline this dispatches
    /// immediately (use `schedule_after`/`schedule_at` for real deadlines)
    Scheduled,
}

type Payload = Box<dyn FnOnce() + Send + 'static>;
type FailFn = Box<dyn FnOnce(TaskError) + Send + 'static>;

/// A schedulable unit of work: an opaque payload with a priority and a
/// submission sequence number assigned at enqueue.
///
/// The payload slot is optional so that a consumed or deliberately empty
/// record stays representable; submitting such a record is rejected with
/// `EmptyTask`. A task that still carries a payload when dropped reports
/// `Cancelled` through its failure channel, so no result handle is ever
/// left dangling.
pub struct Task {
    payload: Option<Payload>,
    fail: Option<FailFn>,
    priority: Priority,
    pub(crate) seq: u64,
}

impl Task {
    /// Create a fire-and-forget task from a closure.
    pub fn new<F>(priority: Priority, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            payload: Some(Box::new(f)),
            fail: None,
            priority,
            seq: 0,
        }
    }

    /// Create a placeholder record without a payload, the analogue of a
    /// default-constructed callable. Rejected by submission.
    pub fn empty(priority: Priority) -> Self {
        Self {
            payload: None,
            fail: None,
            priority,
            seq: 0,
        }
    }

    pub(crate) fn with_payload(priority: Priority, payload: Payload, fail: FailFn) -> Self {
        Self {
            payload: Some(payload),
            fail: Some(fail),
            priority,
            seq: 0,
        }
    }

    /// The priority fixed at construction.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether the record has no payload left to run.
    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// Execute the payload. At most one invocation ever runs: the payload
    /// is taken out of the record first.
    pub(crate) fn run(mut self) {
        if let Some(job) = self.payload.take() {
            job();
        }
    }

    /// Report `err` through the failure channel instead of running.
    pub(crate) fn fail(mut self, err: TaskError) {
        self.payload = None;
        if let Some(fail) = self.fail.take() {
            fail(err);
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // A task dropped with its payload intact never ran; complete the
        // handle so waiters are released.
        if self.payload.is_some()
            && let Some(fail) = self.fail.take()
        {
            fail(TaskError::Cancelled);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("empty", &self.payload.is_none())
            .finish()
    }
}
