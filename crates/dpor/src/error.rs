//! Error and verdict types.
//!
//! Infeasibility, failed promises and uninitialized reads steer the search and
//! are never returned as `Err`. `ModelError` is reserved for a host driving
//! the engine in a way its contract forbids.

use thiserror::Error;

use crate::action::{ActionId, Location, ThreadId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),

    #[error("thread {0} is not runnable")]
    ThreadNotRunnable(ThreadId),

    #[error("thread {thread} completed an RMW without a preceding RMW read")]
    UnmatchedRmw { thread: ThreadId },

    #[error("an execution is already in progress")]
    ExecutionInProgress,

    #[error("no execution is in progress")]
    NoExecution,

    #[error("a bug was asserted; exploration has stopped")]
    Asserted,

    #[error("replay diverged at step {step}: thread {thread} issued a different action")]
    ReplayMismatch { step: usize, thread: ThreadId },

    #[error("thread {0} has not issued any action yet")]
    ThreadNotStarted(ThreadId),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Why the current execution cannot be completed consistently.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Infeasibility {
    #[error("modification order has a cycle")]
    ModificationOrderCycle,

    #[error("a promise can no longer be satisfied")]
    FailedPromise,

    #[error("a read exceeded the recency bound")]
    TooManyReads,
}

/// Outcome of a finished execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Feasible,
    /// Consistent so far, but some reads still wait on promised values.
    UnresolvedPromises(usize),
    Infeasible(Infeasibility),
}

impl Verdict {
    pub fn is_feasible(self) -> bool {
        self == Verdict::Feasible
    }
}

/// Non-fatal findings about the program under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A read had no write it could observe; it returned `VALUE_NONE`.
    UninitializedRead { action: ActionId, location: Location },
    /// Two accesses to a plain location were not ordered by happens-before.
    DataRace {
        location: Location,
        first: ThreadId,
        second: ThreadId,
        /// Both accesses were writes; otherwise one side was a read.
        write_write: bool,
    },
}
