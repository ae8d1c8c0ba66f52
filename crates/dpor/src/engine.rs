//! The model checker: orchestrates systematic exploration of C11 executions.
//!
//! The checker keeps the choice tree across executions and rebuilds the
//! per-execution state (traces, clock vectors, modification order, promises)
//! from scratch each time. A host drives it by running one thread at a time
//! and reporting every atomic or thread-lifecycle action through [`step`];
//! the checker answers with the thread that must run next.
//!
//! Within an execution each step goes through the same pipeline: match the
//! action against the recorded path, derive its clock vector, resolve its
//! reads-from choice (retrying alternatives until one is consistent), extend
//! the modification order, satisfy promised values, and finally record
//! backtracking points for DPOR.
//!
//! [`step`]: ModelChecker::step

use std::collections::HashMap;

use tracing::{debug, info, trace, warn};

use crate::action::{
    Action, ActionId, ActionKind, Location, MemoryOrder, SeqNum, ThreadId, VALUE_NONE,
};
use crate::clock::ClockVector;
use crate::config::ModelConfig;
use crate::error::{Diagnostic, Infeasibility, ModelError, ModelResult, Verdict};
use crate::mo_graph::ModificationOrderGraph;
use crate::path::{Exploration, NodeStack};
use crate::promise::Promise;
use crate::race::RaceDetector;
use crate::schedule::{FifoScheduler, Scheduler};
use crate::snapshot::{NullSnapshot, SnapshotStore};
use crate::thread::{ThreadState, ThreadStatus};

mod release;

/// Per-execution state. Reset at the start of each execution.
#[derive(Default)]
struct Execution {
    /// Per-thread state, indexed by thread id.
    threads: Vec<ThreadState>,

    /// Every processed action in execution order.
    action_trace: Vec<ActionId>,

    /// Actions per location, in execution order.
    obj_map: HashMap<Location, Vec<ActionId>>,

    /// Actions per location, split by thread.
    obj_thrd_map: HashMap<Location, Vec<Vec<ActionId>>>,

    /// The most recent action of each thread.
    thrd_last_action: Vec<Option<ActionId>>,

    /// Reads that observed a value no write has produced yet.
    promises: Vec<Promise>,

    /// Acquire reads whose release heads are not fully known, per location.
    lazy_sync_with_release: HashMap<Location, Vec<ActionId>>,

    /// Total entries in `lazy_sync_with_release`.
    lazy_sync_size: usize,

    mo_graph: ModificationOrderGraph,

    races: RaceDetector,

    failed_promise: bool,

    too_many_reads: bool,

    used_sequence_numbers: SeqNum,

    /// The latest action that still has an unexplored alternative.
    next_backtrack: Option<ActionId>,

    /// The thread currently allowed to issue actions.
    current: Option<ThreadId>,

    steps: usize,

    started: bool,
}

/// Summary returned when the checker is shut down.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub executions: u64,
    pub feasible_executions: u64,
    pub total_nodes: usize,
    pub bugs: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// The stateless C11 model checker.
pub struct ModelChecker {
    config: ModelConfig,

    scheduler: Box<dyn Scheduler>,

    snapshot: Box<dyn SnapshotStore>,

    /// The choice tree, persisted across executions.
    tree: NodeStack,

    exec: Execution,

    /// The action whose node will take its next alternative in the upcoming
    /// execution.
    diverge: Option<ActionId>,

    num_executions: u64,

    num_feasible: u64,

    /// Once set, exploration is over for the lifetime of the checker.
    asserted: bool,

    bugs: Vec<String>,

    diagnostics: Vec<Diagnostic>,
}

impl Default for ModelChecker {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl ModelChecker {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            scheduler: Box::new(FifoScheduler::new()),
            snapshot: Box::new(NullSnapshot),
            tree: NodeStack::new(),
            exec: Execution::default(),
            diverge: None,
            num_executions: 0,
            num_feasible: 0,
            asserted: false,
            bugs: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_snapshot_store(mut self, snapshot: Box<dyn SnapshotStore>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    // ----- lifecycle -----

    /// Begin an execution. Creates the initial thread and returns its id; it
    /// must issue `ThreadStart` first.
    pub fn start_execution(&mut self) -> ModelResult<ThreadId> {
        if self.asserted {
            return Err(ModelError::Asserted);
        }
        if self.exec.started {
            return Err(ModelError::ExecutionInProgress);
        }
        if self.num_executions == 0 {
            self.snapshot.snapshot_step(0);
        }
        self.exec.started = true;
        let main = self.add_thread(None);
        let first = self.scheduler.next_thread(None).unwrap_or(main);
        self.exec.threads[first].status = ThreadStatus::Running;
        self.exec.current = Some(first);
        debug!(execution = self.num_executions + 1, "starting execution");
        Ok(first)
    }

    /// Register a thread created by `parent`. The parent must report the
    /// matching `ThreadCreate` as its next action.
    pub fn spawn_thread(&mut self, parent: ThreadId) -> ModelResult<ThreadId> {
        self.thread(parent)?;
        Ok(self.add_thread(Some(parent)))
    }

    fn add_thread(&mut self, parent: Option<ThreadId>) -> ThreadId {
        let tid = self.exec.threads.len();
        self.exec.threads.push(ThreadState::new(tid, parent));
        self.exec.thrd_last_action.push(None);
        self.scheduler.add_thread(tid);
        trace!(tid, ?parent, "thread added");
        tid
    }

    /// Build an action for `tid`, stamped with the next sequence number.
    pub fn new_action(
        &mut self,
        tid: ThreadId,
        kind: ActionKind,
        order: MemoryOrder,
        location: Location,
        value: u64,
    ) -> Action {
        self.exec.used_sequence_numbers += 1;
        Action::new(kind, order, location, value, tid, self.exec.used_sequence_numbers)
    }

    /// Process the current thread's action and pick the next thread.
    ///
    /// Returns `None` when the execution is over: every thread finished or
    /// blocked, the execution became infeasible, the step limit was hit, or a
    /// bug was asserted. The host must then call [`next_execution`].
    ///
    /// [`next_execution`]: ModelChecker::next_execution
    pub fn step(&mut self, action: Action) -> ModelResult<Option<ThreadId>> {
        if self.asserted {
            return Err(ModelError::Asserted);
        }
        if !self.exec.started {
            return Err(ModelError::NoExecution);
        }
        let tid = action.tid();
        if self.exec.current != Some(tid) {
            return Err(ModelError::ThreadNotRunnable(tid));
        }
        self.exec.steps += 1;

        let hint = self.check_current_action(action)?;

        let thread = &mut self.exec.threads[tid];
        if !thread.is_blocked() && !thread.is_complete() {
            thread.status = ThreadStatus::Ready;
            self.scheduler.add_thread(tid);
        }

        if !self.is_feasible() {
            debug!(verdict = ?self.verdict(), "execution became infeasible");
            return Ok(self.halt());
        }
        if self.asserted {
            return Ok(self.halt());
        }
        if self.exec.steps >= self.config.max_steps {
            warn!(steps = self.exec.steps, "step limit reached; abandoning execution");
            return Ok(self.halt());
        }

        let next = self.scheduler.next_thread(hint);
        if let Some(next) = next {
            self.exec.threads[next].status = ThreadStatus::Running;
        }
        self.exec.current = next;
        Ok(next)
    }

    fn halt(&mut self) -> Option<ThreadId> {
        self.exec.current = None;
        None
    }

    /// Finish the current execution and set up the next one.
    ///
    /// Returns false when exploration is complete: no action has an
    /// unexplored alternative, the execution limit was reached, or a bug was
    /// asserted.
    pub fn next_execution(&mut self) -> bool {
        if self.is_feasible_prefix() && self.check_data_races() {
            self.assert_bug("data race detected");
        }
        self.num_executions += 1;
        let verdict = self.verdict();
        if verdict.is_feasible() {
            self.num_feasible += 1;
        }
        debug!(
            execution = self.num_executions,
            ?verdict,
            actions = self.exec.action_trace.len(),
            "execution finished"
        );
        self.exec.started = false;
        self.exec.current = None;

        if self.asserted {
            info!(executions = self.num_executions, "stopping after asserted bug");
            return false;
        }
        if self
            .config
            .max_executions
            .is_some_and(|max| self.num_executions >= max)
        {
            info!(executions = self.num_executions, "execution limit reached");
            return false;
        }
        self.diverge = self.exec.next_backtrack.take();
        let Some(diverge) = self.diverge else {
            info!(
                executions = self.num_executions,
                feasible = self.num_feasible,
                nodes = self.tree.total_nodes(),
                "exploration complete"
            );
            return false;
        };
        debug!(diverge = %self.tree.action(diverge), "next execution diverges");
        self.reset_to_initial_state();
        true
    }

    /// Clear per-execution state and rewind the choice tree to its root.
    pub fn reset_to_initial_state(&mut self) {
        trace!("resetting to initial state");
        self.tree.reset_execution();
        self.exec = Execution::default();
        self.scheduler.reset();
        self.snapshot.backtrack_before_step(0);
    }

    /// Record a user-visible safety violation. Exploration stops.
    pub fn assert_bug(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "bug asserted");
        self.bugs.push(message);
        self.asserted = true;
    }

    pub fn shutdown(self) -> RunStats {
        self.stats()
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            executions: self.num_executions,
            feasible_executions: self.num_feasible,
            total_nodes: self.tree.total_nodes(),
            bugs: self.bugs.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    // ----- feasibility -----

    pub fn is_feasible(&self) -> bool {
        !self.exec.mo_graph.has_cycles() && !self.exec.failed_promise && !self.exec.too_many_reads
    }

    /// Feasible, and no read is still waiting on a promised value.
    pub fn is_final_feasible(&self) -> bool {
        self.is_feasible() && self.exec.promises.is_empty()
    }

    /// No outstanding promises or unresolved release sequences: the prefix
    /// can no longer gain synchronization retroactively.
    pub fn is_feasible_prefix(&self) -> bool {
        self.exec.promises.is_empty() && self.exec.lazy_sync_size == 0
    }

    pub fn verdict(&self) -> Verdict {
        if self.exec.mo_graph.has_cycles() {
            Verdict::Infeasible(Infeasibility::ModificationOrderCycle)
        } else if self.exec.failed_promise {
            Verdict::Infeasible(Infeasibility::FailedPromise)
        } else if self.exec.too_many_reads {
            Verdict::Infeasible(Infeasibility::TooManyReads)
        } else if !self.exec.promises.is_empty() {
            Verdict::UnresolvedPromises(self.exec.promises.len())
        } else {
            Verdict::Feasible
        }
    }

    // ----- accessors -----

    pub fn num_threads(&self) -> usize {
        self.exec.threads.len()
    }

    pub fn thread(&self, tid: ThreadId) -> ModelResult<&ThreadState> {
        self.exec.threads.get(tid).ok_or(ModelError::UnknownThread(tid))
    }

    fn thread_mut(&mut self, tid: ThreadId) -> ModelResult<&mut ThreadState> {
        self.exec
            .threads
            .get_mut(tid)
            .ok_or(ModelError::UnknownThread(tid))
    }

    /// The value the thread's latest action observed (`VALUE_NONE` if none).
    pub fn return_value(&self, tid: ThreadId) -> ModelResult<u64> {
        Ok(self.thread(tid)?.return_value)
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.exec.current
    }

    pub fn action(&self, id: ActionId) -> &Action {
        self.tree.action(id)
    }

    pub fn action_trace(&self) -> impl Iterator<Item = &Action> + '_ {
        self.exec.action_trace.iter().map(|&id| self.tree.action(id))
    }

    pub fn action_ids(&self) -> &[ActionId] {
        &self.exec.action_trace
    }

    pub fn mo_graph(&self) -> &ModificationOrderGraph {
        &self.exec.mo_graph
    }

    pub fn promises(&self) -> &[Promise] {
        &self.exec.promises
    }

    pub fn lazy_sync_size(&self) -> usize {
        self.exec.lazy_sync_size
    }

    pub fn num_executions(&self) -> u64 {
        self.num_executions
    }

    pub fn total_nodes(&self) -> usize {
        self.tree.total_nodes()
    }

    pub fn has_asserted(&self) -> bool {
        self.asserted
    }

    pub fn bugs(&self) -> &[String] {
        &self.bugs
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn get_last_action(&self, tid: ThreadId) -> Option<ActionId> {
        self.exec.thrd_last_action.get(tid).copied().flatten()
    }

    /// The action a thread's next action follows in program order: its latest
    /// action, or the `ThreadCreate` that spawned it.
    pub fn get_parent_action(&self, tid: ThreadId) -> Option<ActionId> {
        self.get_last_action(tid)
            .or_else(|| self.exec.threads.get(tid).and_then(|t| t.creation))
    }

    fn happens_before(&self, earlier: ActionId, later: ActionId) -> bool {
        self.tree
            .action(earlier)
            .happens_before(self.tree.action(later))
    }

    fn thread_lists(&self, location: Location) -> &[Vec<ActionId>] {
        self.exec
            .obj_thrd_map
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ----- the step pipeline -----

    /// Process one action and return the thread that must run next, if the
    /// checker has a preference (replay, RMW atomicity, a new child).
    pub fn check_current_action(&mut self, curr: Action) -> ModelResult<Option<ThreadId>> {
        let tid = curr.tid();
        self.thread(tid)?;
        let second_part_of_rmw = curr.is_rmw() || curr.is_rmw_compare_fail();

        let id = if second_part_of_rmw {
            self.process_rmw(&curr)?
        } else {
            self.explore(curr)?
        };
        trace!(action = %self.tree.action(id), "processing");

        let (kind, location) = {
            let action = self.tree.action(id);
            (action.kind(), action.location())
        };
        self.process_thread_action(id, tid, kind, location)?;

        let mut value = VALUE_NONE;
        let mut updated = false;
        if self.tree.action(id).is_read() {
            (value, updated) = self.process_read(id, second_part_of_rmw);
        } else if self.tree.action(id).is_write() {
            updated |= self.w_modification_order(id);
            updated |= self.resolve_promises(id);
            self.exec.mo_graph.commit();
        }
        self.exec.threads[tid].return_value = value;

        if !second_part_of_rmw {
            self.add_action_to_lists(id);
        }
        if updated {
            self.resolve_release_sequences(location);
        }

        let node = self.tree.node_of(id);
        let parent_has_backtrack = self
            .tree
            .node(node)
            .parent()
            .is_some_and(|p| !self.tree.node(p).backtrack_empty());
        if parent_has_backtrack || self.tree.node(node).has_value_alternatives() {
            self.update_next_backtrack(id);
        }
        self.set_backtracking(id);

        let action = self.tree.action(id);
        if action.is_rmw_read() {
            return Ok(Some(tid));
        }
        if let (ActionKind::ThreadCreate, Location::Thread(child)) = (kind, location) {
            return Ok(Some(child));
        }
        Ok(self.get_next_replay_thread())
    }

    /// Match `curr` against the recorded path, then derive its clock vector.
    fn explore(&mut self, curr: Action) -> ModelResult<ActionId> {
        let (tid, kind, order, location) = (curr.tid(), curr.kind(), curr.order(), curr.location());
        let num_threads = self.num_threads();
        match self.tree.explore_action(curr, num_threads) {
            Exploration::Replay(id) => {
                let recorded = self.tree.action(id);
                if recorded.tid() != tid || recorded.location() != location {
                    return Err(ModelError::ReplayMismatch {
                        step: self.exec.steps,
                        thread: tid,
                    });
                }
                let action = self.tree.action_mut(id);
                if kind == ActionKind::AtomicRmwRead {
                    action.restore_kind_and_order(kind, order);
                }
                action.reads_from = None;
                self.create_cv(id);
                Ok(id)
            }
            Exploration::Fresh(id) => {
                self.create_cv(id);
                if self.tree.action(id).is_read() {
                    self.build_reads_from_past(id);
                }
                if self.tree.action(id).is_write() {
                    self.compute_promises(id);
                }
                Ok(id)
            }
        }
    }

    fn create_cv(&mut self, id: ActionId) {
        let (tid, seq) = {
            let action = self.tree.action(id);
            (action.tid(), action.seq())
        };
        let parent_cv = self
            .get_parent_action(tid)
            .map(|p| self.tree.action(p).cv().clone());
        let cv = ClockVector::for_action(parent_cv.as_ref(), self.num_threads(), tid, seq);
        self.tree.action_mut(id).cv = cv;
    }

    /// Fold an RMW completion into the thread's pending RMW read.
    fn process_rmw(&mut self, completion: &Action) -> ModelResult<ActionId> {
        let tid = completion.tid();
        let last = self
            .get_last_action(tid)
            .filter(|&last| self.tree.action(last).is_rmw_read())
            .ok_or(ModelError::UnmatchedRmw { thread: tid })?;
        self.tree.action_mut(last).process_rmw(completion);
        let action = self.tree.action(last);
        if action.is_rmw() {
            if let Some(rf) = action.reads_from() {
                self.exec.mo_graph.add_rmw_edge(rf, last);
            }
        }
        Ok(last)
    }

    fn process_thread_action(
        &mut self,
        id: ActionId,
        tid: ThreadId,
        kind: ActionKind,
        location: Location,
    ) -> ModelResult<()> {
        match (kind, location) {
            (ActionKind::ThreadCreate, Location::Thread(child)) => {
                self.thread_mut(child)?.creation = Some(id);
            }
            (ActionKind::ThreadJoin, Location::Thread(target)) => {
                if self.thread(target)?.is_complete() {
                    if let Some(last) = self.get_last_action(target) {
                        self.synchronize_with(id, last);
                    }
                } else {
                    debug!(tid, target, "join blocks");
                    self.scheduler.wait(tid, target);
                    self.exec.threads[target].wait_list.push(tid);
                    self.exec.threads[tid].status = ThreadStatus::Blocked;
                }
            }
            (ActionKind::ThreadFinish, _) => {
                let waiters = std::mem::take(&mut self.exec.threads[tid].wait_list);
                for waiter in waiters {
                    self.exec.threads[waiter].status = ThreadStatus::Ready;
                    self.scheduler.wake(waiter);
                }
                self.exec.threads[tid].status = ThreadStatus::Complete;
                self.eliminate_finished_thread(tid);
            }
            (ActionKind::ThreadStart, _) => {
                let cv = self.tree.action(id).cv().clone();
                self.check_promises(None, &cv, tid);
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve a read's value: the next reads-from candidate that keeps the
    /// execution consistent, else a promised future value. Returns the value
    /// and whether the modification order gained edges.
    fn process_read(&mut self, id: ActionId, second_part_of_rmw: bool) -> (u64, bool) {
        let node = self.tree.node_of(id);
        loop {
            let Some(rf) = self.tree.node(node).get_read_from() else {
                return (self.read_future_value(id, second_part_of_rmw), false);
            };

            let saved_cv = self.tree.action(id).cv().clone();
            let saved_promises = self.exec.promises.clone();
            let saved_failed = self.exec.failed_promise;

            let complete = self.read_from(id, rf);
            if !second_part_of_rmw {
                self.check_recency(id);
            }
            let updated = self.r_modification_order(id, rf);

            if !second_part_of_rmw && !self.is_feasible() {
                let n = self.tree.node_mut(node);
                if n.increment_read_from() || n.increment_future_value() {
                    trace!(read = %self.tree.action(id), "reads-from candidate infeasible");
                    self.exec.mo_graph.rollback();
                    let action = self.tree.action_mut(id);
                    action.cv = saved_cv;
                    action.reads_from = None;
                    self.exec.promises = saved_promises;
                    self.exec.failed_promise = saved_failed;
                    self.exec.too_many_reads = false;
                    continue;
                }
            }

            self.exec.mo_graph.commit();
            if !complete {
                self.queue_lazy_release(id);
            }
            return (self.tree.action(rf).value(), updated);
        }
    }

    fn read_future_value(&mut self, id: ActionId, second_part_of_rmw: bool) -> u64 {
        self.tree.action_mut(id).reads_from = None;
        let node = self.tree.node_of(id);
        match self.tree.node(node).get_future_value() {
            Some(value) => {
                // The read half already registered the promise.
                if !second_part_of_rmw {
                    let tid = self.tree.action(id).tid();
                    debug!(tid, value, "read promises a future value");
                    self.exec.promises.push(Promise::new(id, tid, value));
                }
                value
            }
            None => VALUE_NONE,
        }
    }

    /// Point `id` at `rf` and synchronize with its release heads. Returns
    /// false if the heads could not all be determined yet.
    fn read_from(&mut self, id: ActionId, rf: ActionId) -> bool {
        self.tree.action_mut(id).reads_from = Some(rf);
        let action = self.tree.action(id);
        if !action.is_acquire() {
            return true;
        }
        let reader = action.tid();
        let mut heads = Vec::new();
        let complete = self.release_seq_head(Some(rf), reader, &mut heads);
        for head in heads {
            self.synchronize_with(id, head);
        }
        complete
    }

    fn queue_lazy_release(&mut self, id: ActionId) {
        let location = self.tree.action(id).location();
        let queued = self.exec.lazy_sync_with_release.entry(location).or_default();
        if !queued.contains(&id) {
            queued.push(id);
            self.exec.lazy_sync_size += 1;
            debug!(read = %self.tree.action(id), "release sequence pending");
        }
    }

    /// Merge `other`'s clock into `id`'s. Returns true if the clock grew.
    fn synchronize_with(&mut self, id: ActionId, other: ActionId) -> bool {
        let other_cv = self.tree.action(other).cv().clone();
        let (tid, old_cv) = {
            let action = self.tree.action(id);
            (action.tid(), action.cv().clone())
        };
        self.check_promises(Some(&old_cv), &other_cv, tid);
        self.tree.action_mut(id).cv.merge(&other_cv)
    }

    /// Thread `tid` just learned everything in `merge_cv`. Any promised read
    /// it newly happens after can no longer be satisfied by `tid`.
    fn check_promises(
        &mut self,
        old_cv: Option<&ClockVector>,
        merge_cv: &ClockVector,
        tid: ThreadId,
    ) {
        let num_threads = self.num_threads();
        for i in 0..self.exec.promises.len() {
            let read = self.exec.promises[i].read();
            let (rtid, rseq) = {
                let action = self.tree.action(read);
                (action.tid(), action.seq())
            };
            let newly_synced = old_cv.map_or(true, |cv| !cv.synchronized_since(rtid, rseq))
                && merge_cv.synchronized_since(rtid, rseq);
            if !newly_synced {
                continue;
            }
            let promise = &mut self.exec.promises[i];
            promise.eliminate_thread(tid);
            if promise.has_failed(num_threads) {
                debug!(read = %self.tree.action(read), "promise failed");
                self.exec.failed_promise = true;
                return;
            }
        }
    }

    /// A finished thread issues no more writes, so it can no longer satisfy
    /// any pending promise.
    fn eliminate_finished_thread(&mut self, tid: ThreadId) {
        let num_threads = self.num_threads();
        for promise in &mut self.exec.promises {
            if promise.eliminate_thread(tid) && promise.has_failed(num_threads) {
                debug!(read = %self.tree.action(promise.read()), "promise failed");
                self.exec.failed_promise = true;
            }
        }
    }

    /// Candidate writes for a new read: per thread, newest first, up to and
    /// including the first write that happens before the read.
    fn build_reads_from_past(&mut self, curr: ActionId) {
        let action = self.tree.action(curr);
        let location = action.location();
        let last_sc = if action.is_seqcst() {
            self.get_last_seq_cst(location)
        } else {
            None
        };
        let mut initialized = last_sc.is_some();
        let mut candidates = Vec::new();
        for list in self.thread_lists(location) {
            for &act in list.iter().rev() {
                let write = self.tree.action(act);
                if !write.is_write() {
                    continue;
                }
                // A seq_cst read may only see the latest seq_cst write.
                if !(write.is_seqcst() && action.is_seqcst()) || Some(act) == last_sc {
                    candidates.push(act);
                }
                if write.happens_before(action) {
                    initialized = true;
                    break;
                }
            }
        }
        trace!(read = %action, candidates = candidates.len(), "built may-read-from set");

        if !initialized {
            warn!(read = %action, "read may observe an uninitialized location");
            self.diagnostics.push(Diagnostic::UninitializedRead {
                action: curr,
                location,
            });
        }
        let node = self.tree.node_of(curr);
        for write in candidates {
            self.tree.node_mut(node).add_read_from(write);
        }
    }

    fn get_last_seq_cst(&self, location: Location) -> Option<ActionId> {
        self.exec.obj_map.get(&location).and_then(|list| {
            list.iter().rev().copied().find(|&id| {
                let action = self.tree.action(id);
                action.is_write() && action.is_seqcst()
            })
        })
    }

    /// Mark every pending promise this fresh write could satisfy.
    fn compute_promises(&mut self, curr: ActionId) {
        let write = self.tree.action(curr);
        let satisfiable: Vec<usize> = self
            .exec
            .promises
            .iter()
            .enumerate()
            .filter(|(_, promise)| {
                let read = self.tree.action(promise.read());
                !read.happens_before(write)
                    && read.is_read()
                    && read.same_var(write)
                    && !read.is_synchronizing(write)
                    && !read.same_thread(write)
                    && promise.value() == write.value()
                    && promise.is_thread_available(write.tid())
            })
            .map(|(i, _)| i)
            .collect();
        let node = self.tree.node_of(curr);
        for i in satisfiable {
            self.tree.node_mut(node).set_promise(i);
        }
    }

    /// Satisfy the promises this write's node chose to fulfil.
    fn resolve_promises(&mut self, write: ActionId) -> bool {
        let node = self.tree.node_of(write);
        let mut resolved = false;
        let mut choice = 0;
        let mut idx = 0;
        while idx < self.exec.promises.len() {
            if self.tree.node(node).get_promise(choice) {
                let read = self.exec.promises.remove(idx).read();
                debug!(
                    read = %self.tree.action(read),
                    write = %self.tree.action(write),
                    "promise resolved"
                );
                let before = self.tree.action(read).cv().clone();
                let complete = self.read_from(read, write);
                if *self.tree.action(read).cv() != before {
                    self.propagate_synchronization(read);
                }
                self.r_modification_order(read, write);
                self.post_r_modification_order(read, write);
                if !complete {
                    self.queue_lazy_release(read);
                }
                resolved = true;
            } else {
                idx += 1;
            }
            choice += 1;
        }
        resolved
    }

    /// Edges forced by `curr` reading from `rf`: the latest write each thread
    /// made visible to `curr` precedes `rf`.
    fn r_modification_order(&mut self, curr: ActionId, rf: ActionId) -> bool {
        let location = self.tree.action(curr).location();
        let mut edges = Vec::new();
        for list in self.thread_lists(location) {
            for &act in list.iter().rev() {
                if act == curr || !self.happens_before(act, curr) {
                    continue;
                }
                // An RMW sits in the order itself; test for writes first.
                let action = self.tree.action(act);
                if action.is_write() {
                    if act != rf {
                        edges.push((act, rf));
                    }
                } else if let Some(prev) = action.reads_from().filter(|&prev| prev != rf) {
                    edges.push((prev, rf));
                }
                break;
            }
        }
        let added = !edges.is_empty();
        for (from, to) in edges {
            self.exec.mo_graph.add_edge(from, to);
        }
        added
    }

    /// Edges forced on writes that happen after a read that was resolved
    /// late: they must follow `rf` in the modification order.
    fn post_r_modification_order(&mut self, curr: ActionId, rf: ActionId) -> bool {
        let location = self.tree.action(curr).location();
        let mut edges = Vec::new();
        for list in self.thread_lists(location) {
            let mut earliest_after = None;
            for &act in list.iter().rev() {
                if act == curr || !self.happens_before(curr, act) {
                    break;
                }
                earliest_after = Some(act);
            }
            let Some(act) = earliest_after else { continue };
            let action = self.tree.action(act);
            if action.is_write() {
                if act != rf {
                    edges.push((rf, act));
                }
            } else if let Some(post) = action.reads_from().filter(|&post| post != rf) {
                edges.push((rf, post));
            }
        }
        let added = !edges.is_empty();
        for (from, to) in edges {
            self.exec.mo_graph.add_edge(from, to);
        }
        added
    }

    /// Edges forced by a new write, plus future values it offers to reads
    /// that could not have seen it.
    fn w_modification_order(&mut self, curr: ActionId) -> bool {
        let write = self.tree.action(curr);
        let location = write.location();
        let value = write.value();
        let mut edges = Vec::new();
        if write.is_seqcst() {
            if let Some(last) = self.get_last_seq_cst(location) {
                edges.push((last, curr));
            }
        }
        let mut future_readers = Vec::new();
        for list in self.thread_lists(location) {
            for &act in list.iter().rev() {
                let action = self.tree.action(act);
                if action.happens_before(write) {
                    if action.is_write() {
                        edges.push((act, curr));
                    } else if let Some(rf) = action.reads_from() {
                        edges.push((rf, curr));
                    }
                    break;
                }
                if action.is_read()
                    && !action.is_synchronizing(write)
                    && !action.same_thread(write)
                {
                    future_readers.push(act);
                }
            }
        }

        let added = !edges.is_empty();
        for (from, to) in edges {
            self.exec.mo_graph.add_edge(from, to);
        }
        for read in future_readers {
            let node = self.tree.node_of(read);
            if self.tree.node_mut(node).add_future_value(value) {
                trace!(read = %self.tree.action(read), value, "future value offered");
                self.update_next_backtrack(read);
            }
        }
        added
    }

    /// Recency bound: a thread that keeps reading the same write while a
    /// newer feasible write exists cannot go on forever.
    fn check_recency(&mut self, curr: ActionId) {
        let max_reads = self.config.max_reads as usize;
        if max_reads == 0 {
            return;
        }
        let node = self.tree.node_of(curr);
        if self.tree.node(node).read_from_size() <= 1 || !self.is_feasible() {
            return;
        }
        let action = self.tree.action(curr);
        let rf = action.reads_from();
        let prior: Vec<ActionId> = match self.thread_lists(action.location()).get(action.tid()) {
            Some(list) => list.iter().rev().take(max_reads).copied().collect(),
            None => return,
        };
        if prior.len() < max_reads {
            return;
        }
        let all_same = prior.iter().all(|&act| {
            let prev = self.tree.action(act);
            prev.is_read()
                && prev.reads_from() == rf
                && self.tree.node(self.tree.node_of(act)).read_from_size() > 1
        });
        if !all_same {
            return;
        }

        let alternatives: Vec<ActionId> = self
            .tree
            .node(node)
            .may_read_from()
            .iter()
            .copied()
            .filter(|&w| Some(w) != rf)
            .collect();
        for write in alternatives {
            self.r_modification_order(curr, write);
            let feasible = self.is_feasible();
            self.exec.mo_graph.rollback();
            if !feasible {
                continue;
            }
            let offered_to_all = prior.iter().all(|&act| {
                self.tree
                    .node(self.tree.node_of(act))
                    .may_read_from()
                    .contains(&write)
            });
            if offered_to_all {
                debug!(read = %self.tree.action(curr), "recency bound exceeded");
                self.exec.too_many_reads = true;
                return;
            }
        }
    }

    fn add_action_to_lists(&mut self, id: ActionId) {
        let num_threads = self.num_threads();
        let (tid, location) = {
            let action = self.tree.action(id);
            (action.tid(), action.location())
        };
        self.exec.action_trace.push(id);
        self.exec.obj_map.entry(location).or_default().push(id);
        let lists = self.exec.obj_thrd_map.entry(location).or_default();
        if lists.len() < num_threads {
            lists.resize_with(num_threads, Vec::new);
        }
        lists[tid].push(id);
        if self.exec.thrd_last_action.len() < num_threads {
            self.exec.thrd_last_action.resize(num_threads, None);
        }
        self.exec.thrd_last_action[tid] = Some(id);
    }

    fn update_next_backtrack(&mut self, candidate: ActionId) {
        let seq = self.tree.action(candidate).seq();
        let newer = self
            .exec
            .next_backtrack
            .map_or(true, |nb| seq > self.tree.action(nb).seq());
        if newer {
            self.exec.next_backtrack = Some(candidate);
        }
    }

    // ----- DPOR -----

    /// The most recent action on the same location whose order relative to
    /// `curr` affects synchronization.
    fn get_last_conflict(&self, curr: ActionId) -> Option<ActionId> {
        let action = self.tree.action(curr);
        if !action.is_atomic() {
            return None;
        }
        self.exec
            .obj_map
            .get(&action.location())?
            .iter()
            .rev()
            .copied()
            .find(|&prev| action.is_synchronizing(self.tree.action(prev)))
    }

    /// Ask the node before the last conflict to also try running `curr`'s
    /// thread (or the nearest ancestor enabled there).
    fn set_backtracking(&mut self, curr: ActionId) {
        let Some(prev) = self.get_last_conflict(curr) else {
            return;
        };
        let Some(node) = self.tree.node(self.tree.node_of(prev)).parent() else {
            return;
        };
        let mut tid = self.tree.action(curr).tid();
        while !self.tree.node(node).is_enabled(tid) {
            match self.exec.threads[tid].parent {
                Some(parent) => tid = parent,
                None => return,
            }
        }
        if self.tree.node(node).has_been_explored(tid) {
            return;
        }
        self.update_next_backtrack(prev);
        if self.tree.node_mut(node).set_backtrack(tid) {
            debug!(
                tid,
                conflict = %self.tree.action(prev),
                "backtrack point added"
            );
        }
    }

    /// During replay, the thread of the next recorded step. At the divergence
    /// point, advance that node to its next alternative and cut the path.
    fn get_next_replay_thread(&mut self) -> Option<ThreadId> {
        let diverge = self.diverge?;
        let Some(next) = self.tree.next() else {
            self.diverge = None;
            return None;
        };
        let next_action = self.tree.node(next).action()?;
        if next_action != diverge {
            return Some(self.tree.action(next_action).tid());
        }

        self.diverge = None;
        let tid = self.tree.action(diverge).tid();
        let node = self.tree.node_mut(next);
        let chosen = if node.increment_promise()
            || node.increment_read_from()
            || node.increment_future_value()
        {
            self.tree.pop_restofstack(2);
            Some(tid)
        } else {
            let parent = node.parent()?;
            let tid = self.tree.node_mut(parent).get_next_backtrack();
            self.tree.pop_restofstack(1);
            tid
        };
        debug!(?chosen, "diverging from recorded path");
        chosen
    }

    // ----- plain accesses -----

    /// Record a plain (non-atomic) read for race detection.
    pub fn record_plain_read(&mut self, tid: ThreadId, location: Location) -> ModelResult<()> {
        self.record_plain_access(tid, location, false)
    }

    /// Record a plain (non-atomic) write for race detection.
    pub fn record_plain_write(&mut self, tid: ThreadId, location: Location) -> ModelResult<()> {
        self.record_plain_access(tid, location, true)
    }

    fn record_plain_access(
        &mut self,
        tid: ThreadId,
        location: Location,
        is_write: bool,
    ) -> ModelResult<()> {
        self.thread(tid)?;
        if !self.config.check_data_races {
            return Ok(());
        }
        let last = self
            .get_parent_action(tid)
            .ok_or(ModelError::ThreadNotStarted(tid))?;
        let cv = self.tree.action(last).cv();
        let raced = if is_write {
            self.exec.races.check_write(location, tid, last, cv)
        } else {
            self.exec.races.check_read(location, tid, last, cv)
        };
        if raced && self.check_data_races() {
            self.assert_bug(format!("data race on {location}"));
        }
        Ok(())
    }
}
