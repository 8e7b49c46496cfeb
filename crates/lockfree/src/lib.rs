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

//! Concurrent containers safe for multi-producer/multi-consumer access
//! without coarse locks.
//!
//! The stack, list and hash map are lock-free linked structures whose
//! unlinked nodes are retired through epoch-based reclamation
//! (`crossbeam-epoch`), so no reader can ever observe freed memory. The
//! resizable vector synchronizes element slots individually and only takes
//! a writer lock for the capacity-doubling copy.
//!
//! Every operation is linearizable on its own; no cross-operation
//! transactional guarantees are provided.

pub mod list;
pub mod map;
pub mod stack;
pub mod vector;

pub use list::LockFreeList;
pub use map::LockFreeHashMap;
pub use stack::LockFreeStack;
pub use vector::ConcurrentVec;

/// Result type for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Error types for the concurrent containers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    /// Indexed access past the current element count
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },
}
