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

//! Signal/slot dispatch: a family of observer primitives sharing one
//! connect/disconnect/emit vocabulary and differing only in emission and
//! lifetime policy.
//!
//! Every variant obeys the same emission snapshot rule: `emit` copies the
//! slot set under the signal's lock, releases the lock, then invokes the
//! slots. Slots may therefore reconnect, disconnect or re-emit on the
//! very signal that is dispatching them; slots connected during an emit
//! are not observed by that emit.

pub mod async_signal;
pub mod auto_disconnect;
pub mod chained;
pub mod limited;
pub mod scoped;
pub mod sync_signal;
pub mod thread_safe;

pub use async_signal::AsyncSignal;
pub use auto_disconnect::AutoDisconnectSignal;
pub use chained::ChainedSignal;
pub use limited::LimitedSignal;
pub use scoped::ScopedSignal;
pub use sync_signal::Signal;
pub use thread_safe::ThreadSafeSignal;

use std::sync::Arc;

/// Identifies a connection within one signal; monotonic, never reused.
pub type ConnectionId = u64;

/// The callable interface every variant stores.
pub type SlotFn<A> = dyn Fn(&A) -> Result<(), SlotError> + Send + Sync;

/// A reference-counted slot.
pub type Slot<A> = Arc<SlotFn<A>>;

/// Wrap a closure into a [`Slot`].
pub fn slot<A, F>(f: F) -> Slot<A>
where
    F: Fn(&A) -> Result<(), SlotError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Failure raised by an individual slot during emission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SlotError(pub String);

impl From<&str> for SlotError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for SlotError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Result type for signal operations
pub type SignalResult<T> = Result<T, SignalError>;

/// Error types for the signal family
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// `connect` was handed a dead slot reference
    #[error("cannot connect an expired slot")]
    InvalidSlot,
    /// A limited signal has spent its emission budget
    #[error("signal emission budget exhausted")]
    Exhausted,
    /// A limited signal was constructed with a zero budget
    #[error("emission budget must be greater than zero")]
    ZeroBudget,
    /// One or more slots raised during emission; carries every cause
    #[error("emission failed: {}", format_causes(.0))]
    EmissionFailure(Vec<SlotError>),
}

fn format_causes(causes: &[SlotError]) -> String {
    let joined: Vec<&str> = causes.iter().map(|c| c.0.as_str()).collect();
    format!("{} slot(s) raised [{}]", causes.len(), joined.join("; "))
}

/// Collects per-slot failures during an emit and folds them into the
/// final result.
pub(crate) struct EmissionOutcome {
    failures: Vec<SlotError>,
}

impl EmissionOutcome {
    pub(crate) fn new() -> Self {
        Self { failures: Vec::new() }
    }

    pub(crate) fn record(&mut self, result: Result<(), SlotError>) {
        if let Err(failure) = result {
            self.failures.push(failure);
        }
    }

    pub(crate) fn push(&mut self, failure: SlotError) {
        self.failures.push(failure);
    }

    pub(crate) fn extend(&mut self, failures: Vec<SlotError>) {
        self.failures.extend(failures);
    }

    pub(crate) fn finish(self) -> SignalResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(SignalError::EmissionFailure(self.failures))
        }
    }
}
