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

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction-time configuration for [`crate::AsyncExecutor`].
///
/// Unknown fields are rejected when deserializing; every option has a
/// documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutorConfig {
    /// Workers never drop below this count (default 1, minimum 1).
    pub min_threads: usize,
    /// Hard upper bound on the worker set (default: logical CPU count).
    pub max_threads: usize,
    /// Per-worker deques with stealing when true, otherwise a single
    /// global priority queue (default true).
    pub use_work_stealing: bool,
    /// An idle worker above `min_threads` exits after this (default 30s).
    pub thread_idle_timeout: Duration,
    /// Best-effort CPU pinning per worker (default false).
    pub pin_threads: bool,
    /// Apply `thread_priority` to workers when true (default false).
    pub set_priority: bool,
    /// Relative priority hint in [-100, 100] mapped onto the platform
    /// range (default 0).
    pub thread_priority: i32,
    /// Cadence of the stats sampler; zero disables it (default zero).
    pub stats_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: num_cpus::get().max(1),
            use_work_stealing: true,
            thread_idle_timeout: Duration::from_secs(30),
            pin_threads: false,
            set_priority: false,
            thread_priority: 0,
            stats_interval: Duration::ZERO,
        }
    }
}

impl ExecutorConfig {
    /// Clamp inconsistent values into the documented ranges: a zero
    /// `min_threads` becomes 1, `max_threads` is raised to `min_threads`,
    /// and `thread_priority` is clamped to [-100, 100].
    pub fn normalized(mut self) -> Self {
        if self.min_threads < 1 {
            self.min_threads = 1;
        }
        if self.max_threads < self.min_threads {
            self.max_threads = self.min_threads;
        }
        self.thread_priority = self.thread_priority.clamp(-100, 100);
        self
    }
}
