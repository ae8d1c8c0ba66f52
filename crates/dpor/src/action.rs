//! Memory-model actions.
//!
//! One `Action` is recorded for every synchronization-relevant operation a
//! thread performs. Its identity (thread, sequence number, location, kind) is
//! fixed once recorded; the reads-from choice and clock vector are derived
//! state that the engine recomputes whenever the step is replayed.

use std::fmt;

use crate::clock::ClockVector;
use crate::path::NodeId;

/// Dense, 0-indexed thread identifier.
pub type ThreadId = usize;

/// Per-execution action sequence number. The first action is numbered 1.
pub type SeqNum = u32;

/// Value returned for actions that do not produce one.
pub const VALUE_NONE: u64 = u64::MAX;

/// Index of an action in the choice tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub(crate) usize);

impl ActionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The object an action operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// An atomic (or plain) memory cell, identified by an opaque address.
    Memory(u64),
    /// A thread, as the target of create and join.
    Thread(ThreadId),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Memory(addr) => write!(f, "{addr:#x}"),
            Location::Thread(tid) => write!(f, "thread {tid}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AtomicRead,
    AtomicWrite,
    /// First half of a read-modify-write: the read.
    AtomicRmwRead,
    /// Completed read-modify-write (read and write).
    AtomicRmw,
    /// Second half of a failed compare-exchange: the RMW degrades to a read.
    AtomicRmwCompareFail,
    ThreadCreate,
    ThreadStart,
    ThreadJoin,
    ThreadFinish,
}

impl ActionKind {
    fn name(self) -> &'static str {
        match self {
            ActionKind::AtomicRead => "atomic read",
            ActionKind::AtomicWrite => "atomic write",
            ActionKind::AtomicRmwRead => "atomic rmwr",
            ActionKind::AtomicRmw => "atomic rmw",
            ActionKind::AtomicRmwCompareFail => "atomic rmwc",
            ActionKind::ThreadCreate => "thread create",
            ActionKind::ThreadStart => "thread start",
            ActionKind::ThreadJoin => "thread join",
            ActionKind::ThreadFinish => "thread finish",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl MemoryOrder {
    pub fn is_acquire(self) -> bool {
        matches!(self, MemoryOrder::Acquire | MemoryOrder::AcqRel | MemoryOrder::SeqCst)
    }

    pub fn is_release(self) -> bool {
        matches!(self, MemoryOrder::Release | MemoryOrder::AcqRel | MemoryOrder::SeqCst)
    }

    fn name(self) -> &'static str {
        match self {
            MemoryOrder::Relaxed => "relaxed",
            MemoryOrder::Acquire => "acquire",
            MemoryOrder::Release => "release",
            MemoryOrder::AcqRel => "acq_rel",
            MemoryOrder::SeqCst => "seq_cst",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Action {
    pub(crate) kind: ActionKind,
    pub(crate) order: MemoryOrder,
    pub(crate) location: Location,
    pub(crate) value: u64,
    pub(crate) seq: SeqNum,
    pub(crate) tid: ThreadId,
    pub(crate) cv: ClockVector,
    pub(crate) reads_from: Option<ActionId>,
    pub(crate) node: Option<NodeId>,
}

impl Action {
    pub fn new(
        kind: ActionKind,
        order: MemoryOrder,
        location: Location,
        value: u64,
        tid: ThreadId,
        seq: SeqNum,
    ) -> Self {
        Self {
            kind,
            order,
            location,
            value,
            seq,
            tid,
            cv: ClockVector::default(),
            reads_from: None,
            node: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn order(&self) -> MemoryOrder {
        self.order
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn cv(&self) -> &ClockVector {
        &self.cv
    }

    pub fn reads_from(&self) -> Option<ActionId> {
        self.reads_from
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicRead | ActionKind::AtomicRmwRead | ActionKind::AtomicRmw
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, ActionKind::AtomicWrite | ActionKind::AtomicRmw)
    }

    pub fn is_rmw_read(&self) -> bool {
        self.kind == ActionKind::AtomicRmwRead
    }

    pub fn is_rmw(&self) -> bool {
        self.kind == ActionKind::AtomicRmw
    }

    pub fn is_rmw_compare_fail(&self) -> bool {
        self.kind == ActionKind::AtomicRmwCompareFail
    }

    pub fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicRead
                | ActionKind::AtomicWrite
                | ActionKind::AtomicRmwRead
                | ActionKind::AtomicRmw
                | ActionKind::AtomicRmwCompareFail
        )
    }

    pub fn is_acquire(&self) -> bool {
        self.order.is_acquire()
    }

    pub fn is_release(&self) -> bool {
        self.order.is_release()
    }

    pub fn is_seqcst(&self) -> bool {
        self.order == MemoryOrder::SeqCst
    }

    pub fn same_var(&self, other: &Action) -> bool {
        self.location == other.location
    }

    pub fn same_thread(&self, other: &Action) -> bool {
        self.tid == other.tid
    }

    /// True if `self` happens-before `later`, judged by `later`'s clock.
    pub fn happens_before(&self, later: &Action) -> bool {
        later.cv.synchronized_since(self.tid, self.seq)
    }

    /// Whether reordering `self` and `other` could change which
    /// synchronization is established, i.e. whether DPOR must explore both
    /// orders. Accesses that only differ in reads-from are covered by the
    /// reads-from enumeration instead.
    pub fn is_synchronizing(&self, other: &Action) -> bool {
        if self.same_thread(other) || !self.same_var(other) {
            return false;
        }
        if self.is_write() && self.is_seqcst() && other.is_write() && other.is_seqcst() {
            return true;
        }
        if self.is_read() && self.is_acquire() && other.is_write() && other.is_release() {
            return true;
        }
        self.is_write() && self.is_release() && other.is_read() && other.is_acquire()
    }

    /// Fold the second half of an RMW into this read half.
    pub(crate) fn process_rmw(&mut self, completion: &Action) {
        self.order = completion.order;
        if completion.is_rmw_compare_fail() {
            self.kind = ActionKind::AtomicRead;
        } else if completion.is_rmw() {
            self.kind = ActionKind::AtomicRmw;
            self.value = completion.value;
        }
    }

    /// Restore kind and order from a freshly issued RMW read half; a prior
    /// execution may have folded a completion into this action.
    pub(crate) fn restore_kind_and_order(&mut self, kind: ActionKind, order: MemoryOrder) {
        self.kind = kind;
        self.order = order;
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:3}) t{:<2} {:<14} {:<8} {:<12} {:#x}",
            self.seq,
            self.tid,
            self.kind.name(),
            self.order.name(),
            self.location.to_string(),
            self.value
        )?;
        if let Some(rf) = self.reads_from {
            write!(f, " rf#{}", rf.0)?;
        }
        write!(f, " {}", self.cv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(kind: ActionKind, order: MemoryOrder, tid: ThreadId, seq: SeqNum) -> Action {
        Action::new(kind, order, Location::Memory(0x10), 0, tid, seq)
    }

    #[test]
    fn test_kind_predicates() {
        let rmw = act(ActionKind::AtomicRmw, MemoryOrder::Relaxed, 0, 1);
        assert!(rmw.is_read());
        assert!(rmw.is_write());
        let rmwr = act(ActionKind::AtomicRmwRead, MemoryOrder::Relaxed, 0, 1);
        assert!(rmwr.is_read());
        assert!(!rmwr.is_write());
        let start = act(ActionKind::ThreadStart, MemoryOrder::SeqCst, 0, 1);
        assert!(!start.is_atomic());
    }

    #[test]
    fn test_memory_order_predicates() {
        assert!(MemoryOrder::AcqRel.is_acquire());
        assert!(MemoryOrder::AcqRel.is_release());
        assert!(MemoryOrder::SeqCst.is_release());
        assert!(!MemoryOrder::Acquire.is_release());
        assert!(!MemoryOrder::Relaxed.is_acquire());
    }

    #[test]
    fn test_happens_before_uses_later_clock() {
        let mut w = act(ActionKind::AtomicWrite, MemoryOrder::Release, 0, 3);
        w.cv = ClockVector::for_action(None, 2, 0, 3);
        let mut r = act(ActionKind::AtomicRead, MemoryOrder::Acquire, 1, 5);
        r.cv = ClockVector::for_action(None, 2, 1, 5);
        assert!(!w.happens_before(&r));
        r.cv.merge(&w.cv);
        assert!(w.happens_before(&r));
        assert!(!r.happens_before(&w));
    }

    #[test]
    fn test_is_synchronizing_release_acquire() {
        let w = act(ActionKind::AtomicWrite, MemoryOrder::Release, 0, 1);
        let r = act(ActionKind::AtomicRead, MemoryOrder::Acquire, 1, 2);
        assert!(w.is_synchronizing(&r));
        assert!(r.is_synchronizing(&w));
    }

    #[test]
    fn test_relaxed_pairs_do_not_synchronize() {
        let w = act(ActionKind::AtomicWrite, MemoryOrder::Relaxed, 0, 1);
        let r = act(ActionKind::AtomicRead, MemoryOrder::Acquire, 1, 2);
        assert!(!w.is_synchronizing(&r));
        let same_thread = act(ActionKind::AtomicWrite, MemoryOrder::SeqCst, 1, 3);
        let other = act(ActionKind::AtomicWrite, MemoryOrder::SeqCst, 1, 4);
        assert!(!same_thread.is_synchronizing(&other));
    }

    #[test]
    fn test_seqcst_writes_synchronize() {
        let a = act(ActionKind::AtomicWrite, MemoryOrder::SeqCst, 0, 1);
        let b = act(ActionKind::AtomicWrite, MemoryOrder::SeqCst, 1, 2);
        assert!(a.is_synchronizing(&b));
    }

    #[test]
    fn test_process_rmw() {
        let mut read = act(ActionKind::AtomicRmwRead, MemoryOrder::Relaxed, 0, 1);
        let mut done = act(ActionKind::AtomicRmw, MemoryOrder::AcqRel, 0, 2);
        done.value = 7;
        read.process_rmw(&done);
        assert_eq!(read.kind(), ActionKind::AtomicRmw);
        assert_eq!(read.order(), MemoryOrder::AcqRel);
        assert_eq!(read.value(), 7);

        let mut read = act(ActionKind::AtomicRmwRead, MemoryOrder::Relaxed, 0, 1);
        let fail = act(ActionKind::AtomicRmwCompareFail, MemoryOrder::Acquire, 0, 2);
        read.process_rmw(&fail);
        assert_eq!(read.kind(), ActionKind::AtomicRead);
        assert_eq!(read.order(), MemoryOrder::Acquire);
    }
}
