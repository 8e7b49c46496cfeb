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

//! Best-effort OS hints for worker threads. Unsupported platforms compile
//! to no-ops; failures are traced and otherwise ignored.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Pin the current thread to a CPU derived from the worker id.
        pub(crate) fn pin_current_thread(worker_id: usize) {
            let cpus = num_cpus::get().max(1);
            let cpu = worker_id % cpus;
            unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                libc::CPU_SET(cpu, &mut set);
                if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                    tracing::trace!(worker_id, cpu, "failed to set thread affinity");
                }
            }
        }

        /// Map a [-100, 100] priority hint onto the nice range and apply it
        /// to the current thread.
        pub(crate) fn set_current_thread_priority(priority: i32) {
            let nice = (-(priority as i64) * 20 / 100).clamp(-20, 19) as i32;
            unsafe {
                if libc::setpriority(libc::PRIO_PROCESS, 0, nice) != 0 {
                    tracing::trace!(priority, nice, "failed to set thread priority");
                }
            }
        }
    } else {
        pub(crate) fn pin_current_thread(_worker_id: usize) {}

        pub(crate) fn set_current_thread_priority(_priority: i32) {}
    }
}
