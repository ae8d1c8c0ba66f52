//! Clock vectors for happens-before tracking.
//!
//! Entries are action sequence numbers rather than per-thread event counts:
//! entry `t` holds the sequence number of the latest action of thread `t`
//! known to happen-before the owner.

use crate::action::{SeqNum, ThreadId};

/// A clock vector indexed by thread ID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClockVector {
    clocks: Vec<SeqNum>,
}

impl ClockVector {
    pub fn new(num_threads: usize) -> Self {
        Self {
            clocks: vec![0; num_threads],
        }
    }

    /// Clock for an action of `tid` with sequence number `seq`, inheriting
    /// everything its parent (previous action of the thread, or the creating
    /// action) had seen.
    pub fn for_action(
        parent: Option<&ClockVector>,
        num_threads: usize,
        tid: ThreadId,
        seq: SeqNum,
    ) -> Self {
        let mut cv = match parent {
            Some(p) => p.clone(),
            None => ClockVector::new(num_threads),
        };
        if cv.clocks.len() < num_threads {
            cv.clocks.resize(num_threads, 0);
        }
        cv.set(tid, seq);
        cv
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn get(&self, tid: ThreadId) -> SeqNum {
        self.clocks.get(tid).copied().unwrap_or(0)
    }

    pub fn set(&mut self, tid: ThreadId, seq: SeqNum) {
        if tid >= self.clocks.len() {
            self.clocks.resize(tid + 1, 0);
        }
        self.clocks[tid] = seq;
    }

    /// Point-wise maximum: self = max(self, other). Returns true if any entry grew.
    pub fn merge(&mut self, other: &ClockVector) -> bool {
        if other.clocks.len() > self.clocks.len() {
            self.clocks.resize(other.clocks.len(), 0);
        }
        let mut changed = false;
        for (a, b) in self.clocks.iter_mut().zip(other.clocks.iter()) {
            if *b > *a {
                *a = *b;
                changed = true;
            }
        }
        changed
    }

    /// True if this clock has observed the action `(tid, seq)` or something
    /// later from the same thread.
    pub fn synchronized_since(&self, tid: ThreadId, seq: SeqNum) -> bool {
        tid < self.clocks.len() && seq <= self.clocks[tid]
    }

    /// Returns true if self <= other (component-wise).
    pub fn partial_le(&self, other: &ClockVector) -> bool {
        let max_len = self.clocks.len().max(other.clocks.len());
        (0..max_len).all(|i| self.get(i) <= other.get(i))
    }
}

impl std::fmt::Display for ClockVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c:2}")?;
        }
        write!(f, ")")
    }
}
