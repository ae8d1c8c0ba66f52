//! Data-race detection for plain (non-atomic) locations.
//!
//! Each location keeps the last writer and the most recent read of every
//! thread. An access that is not ordered after a conflicting one is recorded
//! as an *unrealized* race: lazily resolved release sequences may still add
//! the missing happens-before edge, so races are only reported once the
//! execution prefix is known to be feasible.

use std::collections::HashMap;

use crate::action::{ActionId, Location, SeqNum, ThreadId};
use crate::clock::ClockVector;
use crate::error::Diagnostic;

/// One plain access. It follows the thread's latest action in program order,
/// so it is stamped one past that action's sequence number: only a thread
/// that has seen a later action of `tid` is ordered after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PlainAccess {
    tid: ThreadId,
    seq: SeqNum,
}

impl PlainAccess {
    fn after(tid: ThreadId, cv: &ClockVector) -> Self {
        Self {
            tid,
            seq: cv.get(tid) + 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct ShadowState {
    last_write: Option<PlainAccess>,
    reads: HashMap<ThreadId, PlainAccess>,
}

#[derive(Clone, Debug)]
struct PendingRace {
    location: Location,
    old: PlainAccess,
    new_tid: ThreadId,
    /// The action whose clock vector orders the later access.
    new_action: ActionId,
    write_write: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RaceDetector {
    shadow: HashMap<Location, ShadowState>,
    unrealized: Vec<PendingRace>,
}

fn may_race(cv: &ClockVector, new_tid: ThreadId, old: PlainAccess) -> bool {
    old.tid != new_tid && !cv.synchronized_since(old.tid, old.seq)
}

impl RaceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a plain read by `tid`, whose latest action is `action` with clock
    /// `cv`. Returns true if a potential race was recorded.
    pub fn check_read(
        &mut self,
        location: Location,
        tid: ThreadId,
        action: ActionId,
        cv: &ClockVector,
    ) -> bool {
        let state = self.shadow.entry(location).or_default();
        let mut raced = false;
        if let Some(write) = state.last_write {
            if may_race(cv, tid, write) {
                self.unrealized.push(PendingRace {
                    location,
                    old: write,
                    new_tid: tid,
                    new_action: action,
                    write_write: false,
                });
                raced = true;
            }
        }
        state.reads.insert(tid, PlainAccess::after(tid, cv));
        raced
    }

    /// Check a plain write; conflicts with the last write and every read.
    pub fn check_write(
        &mut self,
        location: Location,
        tid: ThreadId,
        action: ActionId,
        cv: &ClockVector,
    ) -> bool {
        let state = self.shadow.entry(location).or_default();
        let mut conflicts: Vec<(PlainAccess, bool)> =
            state.last_write.map(|write| (write, true)).into_iter().collect();
        conflicts.extend(state.reads.values().map(|&read| (read, false)));
        let before = self.unrealized.len();
        for (old, write_write) in conflicts {
            if may_race(cv, tid, old) {
                self.unrealized.push(PendingRace {
                    location,
                    old,
                    new_tid: tid,
                    new_action: action,
                    write_write,
                });
            }
        }
        state.last_write = Some(PlainAccess::after(tid, cv));
        state.reads.clear();
        self.unrealized.len() > before
    }

    /// Re-check every pending race against the current clock of its later
    /// action and drain the queue. Races that are still unordered are
    /// returned.
    pub fn realize<'a>(
        &mut self,
        clock_of: impl Fn(ActionId) -> &'a ClockVector,
    ) -> Vec<Diagnostic> {
        self.unrealized
            .drain(..)
            .filter(|race| may_race(clock_of(race.new_action), race.new_tid, race.old))
            .map(|race| Diagnostic::DataRace {
                location: race.location,
                first: race.old.tid,
                second: race.new_tid,
                write_write: race.write_write,
            })
            .collect()
    }
}
