//! Release sequences.
//!
//! An acquire read synchronizes with the release head of the sequence its
//! write belongs to. For a relaxed write the head is the latest release by
//! the same thread, but only if no other thread's write can sit between the
//! two in modification order. While that is undecided the read is queued and
//! retried whenever the location's modification order grows.

use tracing::{debug, trace, warn};

use super::ModelChecker;
use crate::action::{ActionId, Location, ThreadId};

impl ModelChecker {
    /// Collect the release heads `rf` synchronizes an acquire by `reader`
    /// with. Returns true if the set is final, false if later writes could
    /// still break (or complete) the sequence.
    pub(super) fn release_seq_head(
        &self,
        rf: Option<ActionId>,
        reader: ThreadId,
        release_heads: &mut Vec<ActionId>,
    ) -> bool {
        let Some(mut rf) = rf else {
            return false;
        };

        // Every RMW extends the release sequence of the write it read.
        loop {
            let action = self.tree.action(rf);
            if action.is_release() {
                release_heads.push(rf);
            }
            if !action.is_rmw() {
                break;
            }
            if action.is_acquire() && action.is_release() {
                return true;
            }
            match action.reads_from() {
                Some(prev) => rf = prev,
                // Reads from the future; the chain is unknown.
                None => return false,
            }
        }

        let rf_action = self.tree.action(rf);
        if rf_action.is_release() {
            return true;
        }

        let lists = self.thread_lists(rf_action.location());
        let own = lists.get(rf_action.tid()).map(Vec::as_slice).unwrap_or(&[]);
        // `rf` may be the write being processed, not yet in its list.
        let upto = own.iter().position(|&a| a == rf).map_or(own.len(), |p| p + 1);
        let release = own[..upto].iter().rev().copied().find(|&a| {
            let action = self.tree.action(a);
            action.is_write() && action.is_release()
        });
        let Some(release) = release else {
            return true;
        };
        let release_action = self.tree.action(release);
        let mo = &self.exec.mo_graph;

        let mut certain = true;
        for tid in 0..self.num_threads() {
            if tid == rf_action.tid() {
                continue;
            }
            // Future writes by a finished thread or by the reader itself
            // cannot land between the release and `rf`.
            let mut future_ordered = tid == reader || self.exec.threads[tid].is_complete();
            let list = lists.get(tid).map(Vec::as_slice).unwrap_or(&[]);
            for &act in list.iter().rev() {
                let action = self.tree.action(act);
                if !action.is_write() {
                    continue;
                }
                if action.happens_before(release_action) {
                    break;
                }
                if rf_action.happens_before(action) || mo.is_reachable(rf, act) {
                    future_ordered = true;
                    continue;
                }
                if mo.is_reachable(act, release) {
                    break;
                }
                if mo.is_reachable(release, act) && mo.is_reachable(act, rf) {
                    // Sequence provably broken; no head from this write.
                    return true;
                }
                certain = false;
            }
            if !future_ordered {
                return false;
            }
        }

        if certain {
            release_heads.push(release);
        }
        certain
    }

    /// Retry every queued acquire on `location`. Newly found heads are
    /// synchronized with, and the new knowledge is pushed to every later
    /// action that happens after the read. Returns true if any clock grew.
    pub(super) fn resolve_release_sequences(&mut self, location: Location) -> bool {
        let Some(queued) = self.exec.lazy_sync_with_release.remove(&location) else {
            return false;
        };
        let mut updated = false;
        let mut pending = Vec::new();

        for act in queued {
            let (rf, reader) = {
                let action = self.tree.action(act);
                (action.reads_from(), action.tid())
            };
            let mut heads = Vec::new();
            let complete = self.release_seq_head(rf, reader, &mut heads);

            let mut synced = false;
            for head in heads {
                let already = self
                    .tree
                    .action(head)
                    .cv()
                    .partial_le(self.tree.action(act).cv());
                if !already {
                    self.synchronize_with(act, head);
                    synced = true;
                }
            }
            if synced {
                updated = true;
                self.propagate_synchronization(act);
            }

            if complete {
                self.exec.lazy_sync_size -= 1;
                debug!(read = %self.tree.action(act), "release sequence resolved");
            } else {
                pending.push(act);
            }
        }

        if !pending.is_empty() {
            self.exec.lazy_sync_with_release.insert(location, pending);
        }
        if self.check_data_races() {
            self.assert_bug("data race detected");
        }
        updated
    }

    /// Push `act`'s clock into every later action that happens after it.
    pub(super) fn propagate_synchronization(&mut self, act: ActionId) {
        let Some(pos) = self.exec.action_trace.iter().position(|&a| a == act) else {
            return;
        };
        let later = self.exec.action_trace[pos + 1..].to_vec();
        for other in later {
            if self.happens_before(act, other) {
                trace!(to = %self.tree.action(other), "propagating release synchronization");
                self.synchronize_with(other, act);
            }
        }
    }

    /// Report races that survived all pending synchronization. Only done once
    /// the prefix can no longer gain happens-before edges.
    pub(super) fn check_data_races(&mut self) -> bool {
        if !self.config.check_data_races || !self.is_feasible_prefix() {
            return false;
        }
        let tree = &self.tree;
        let races = self.exec.races.realize(|id| tree.action(id).cv());
        for race in &races {
            warn!(?race, "data race");
        }
        let found = !races.is_empty();
        self.diagnostics.extend(races);
        found
    }
}
