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

//! Priority-aware thread-pool executor with work stealing, deferred and
//! scheduled execution strategies.
//!
//! Work enters through [`AsyncExecutor::submit`] (or the `schedule_*`
//! methods) and is drained by a bounded set of OS worker threads. Every
//! submission returns a one-shot [`TaskHandle`] that delivers the
//! payload's value, its panic, or a shutdown notice; a task failure never
//! tears down a worker.

pub mod config;
pub mod executor;
pub mod handle;
mod platform;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use config::ExecutorConfig;
pub use executor::{AsyncExecutor, PoolStats};
pub use handle::TaskHandle;
pub use pool::WorkerState;
pub use task::{ExecutionStrategy, Priority, Task};

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Error types for the executor surface
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A task record without a payload was submitted
    #[error("cannot submit an empty task")]
    EmptyTask,
    /// The executor was stopped before the work could be accepted
    #[error("executor is stopped")]
    PoolShutdown,
    /// `resize` was asked for a zero-sized worker set
    #[error("worker count must be greater than zero")]
    InvalidSize,
    /// `schedule_after` was given a zero delay
    #[error("scheduling delay must be greater than zero")]
    InvalidDelay,
    /// Worker thread creation failed during `start` or `resize`
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Error delivered through a [`TaskHandle`] when the payload did not
/// produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The payload panicked; the message is preserved
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The executor stopped before the task could run
    #[error("executor stopped before the task could run")]
    PoolShutdown,
    /// The task was dropped from a queue before it could run
    #[error("task was cancelled before it could run")]
    Cancelled,
}

pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
