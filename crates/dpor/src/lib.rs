//! Stateless model checking for the C11 memory model.
//!
//! The checker explores every behavior a small concurrent program may exhibit
//! under C11 atomics: not only thread interleavings (pruned with dynamic
//! partial order reduction) but also which write each atomic load observes,
//! including values that are only written later in the execution (promises).
//! Executions are checked for modification-order consistency and promise
//! satisfiability, and discarded when they cannot be completed consistently.
//!
//! A host runs the program under test one thread at a time, reporting every
//! atomic and thread-lifecycle action to [`ModelChecker::step`]. The
//! [`program`] module provides such a host for straight-line programs.

pub mod action;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod mo_graph;
pub mod path;
pub mod program;
pub mod promise;
pub mod race;
pub mod schedule;
pub mod snapshot;
pub mod thread;

pub use action::{Action, ActionId, ActionKind, Location, MemoryOrder, SeqNum, ThreadId, VALUE_NONE};
pub use clock::ClockVector;
pub use config::ModelConfig;
pub use engine::{ModelChecker, RunStats};
pub use error::{Diagnostic, Infeasibility, ModelError, ModelResult, Verdict};
pub use mo_graph::ModificationOrderGraph;
pub use path::{Exploration, Node, NodeId, NodeStack};
pub use program::{run_model, ExplorationResult, Op, Operand, Outcome, Program, Register};
pub use promise::Promise;
pub use race::RaceDetector;
pub use schedule::{FifoScheduler, Scheduler};
pub use snapshot::{NullSnapshot, RecordingSnapshot, SnapshotStore};
pub use thread::{ThreadState, ThreadStatus};
