//! Exploration tree for DPOR over the C11 memory model.
//!
//! The tree is stored as the currently recorded path: one `Node` per executed
//! step, in an arena addressed by `NodeId`. Node 0 is the root and carries no
//! action; the action recorded at node `n` lives at `ActionId(n - 1)`. Each
//! node enumerates four independent choice dimensions: which thread runs next
//! (backtrack set), which past write a read observes, which future value a
//! read predicts, and which pending promises a write satisfies. Candidate
//! lists only grow; exploring them only moves cursors.

use crate::action::{Action, ActionId, ThreadId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PromiseChoice {
    /// The write cannot satisfy this promise.
    Ignore,
    Unfulfilled,
    Fulfilled,
}

#[derive(Clone, Debug)]
pub struct Node {
    action: Option<ActionId>,
    parent: Option<NodeId>,
    /// Threads that existed when this node was created.
    num_threads: usize,
    explored_children: Vec<bool>,
    backtrack: Vec<bool>,
    num_backtracks: usize,
    may_read_from: Vec<ActionId>,
    /// Past `may_read_from.len()` the read observes `future_values[future_index]`.
    read_from_index: usize,
    future_values: Vec<u64>,
    future_index: usize,
    promises: Vec<PromiseChoice>,
}

impl Node {
    fn new(action: Option<ActionId>, parent: Option<NodeId>, num_threads: usize) -> Self {
        Self {
            action,
            parent,
            num_threads,
            explored_children: vec![false; num_threads],
            backtrack: vec![false; num_threads],
            num_backtracks: 0,
            may_read_from: Vec::new(),
            read_from_index: 0,
            future_values: Vec::new(),
            future_index: 0,
            promises: Vec::new(),
        }
    }

    pub fn action(&self) -> Option<ActionId> {
        self.action
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    // ----- thread choices -------------------------------------------------

    /// Whether `tid` existed (and so could have been scheduled) at this node.
    pub fn is_enabled(&self, tid: ThreadId) -> bool {
        tid < self.num_threads
    }

    pub fn has_been_explored(&self, tid: ThreadId) -> bool {
        self.explored_children.get(tid).copied().unwrap_or(false)
    }

    fn explore(&mut self, tid: ThreadId) {
        if tid >= self.explored_children.len() {
            self.explored_children.resize(tid + 1, false);
            self.backtrack.resize(tid + 1, false);
        }
        if self.backtrack[tid] {
            self.backtrack[tid] = false;
            self.num_backtracks -= 1;
        }
        self.explored_children[tid] = true;
    }

    /// Mark `tid` to be tried from this node. Returns false if it already was.
    pub fn set_backtrack(&mut self, tid: ThreadId) -> bool {
        if tid >= self.backtrack.len() {
            self.backtrack.resize(tid + 1, false);
            self.explored_children.resize(tid + 1, false);
        }
        if self.backtrack[tid] {
            return false;
        }
        self.backtrack[tid] = true;
        self.num_backtracks += 1;
        true
    }

    /// Take the lowest pending backtrack thread.
    pub fn get_next_backtrack(&mut self) -> Option<ThreadId> {
        let tid = self.backtrack.iter().position(|&b| b)?;
        self.backtrack[tid] = false;
        self.num_backtracks -= 1;
        Some(tid)
    }

    pub fn backtrack_empty(&self) -> bool {
        self.num_backtracks == 0
    }

    // ----- reads-from choices ---------------------------------------------

    pub fn add_read_from(&mut self, write: ActionId) {
        self.may_read_from.push(write);
    }

    pub fn read_from_size(&self) -> usize {
        self.may_read_from.len()
    }

    pub fn may_read_from(&self) -> &[ActionId] {
        &self.may_read_from
    }

    /// The past write currently chosen, or `None` once past writes are
    /// exhausted and the read predicts a future value instead.
    pub fn get_read_from(&self) -> Option<ActionId> {
        self.may_read_from.get(self.read_from_index).copied()
    }

    fn reading_future(&self) -> bool {
        self.read_from_index >= self.may_read_from.len()
    }

    pub fn increment_read_from(&mut self) -> bool {
        if self.read_from_index + 1 < self.may_read_from.len() {
            self.read_from_index += 1;
            true
        } else {
            false
        }
    }

    pub fn read_from_empty(&self) -> bool {
        self.read_from_index + 1 >= self.may_read_from.len()
    }

    // ----- future values --------------------------------------------------

    /// Record a value some later write may supply. Returns false if the value
    /// was already a candidate.
    pub fn add_future_value(&mut self, value: u64) -> bool {
        if self.future_values.contains(&value) {
            return false;
        }
        self.future_values.push(value);
        true
    }

    pub fn get_future_value(&self) -> Option<u64> {
        if self.reading_future() {
            self.future_values.get(self.future_index).copied()
        } else {
            None
        }
    }

    /// Advance to the next future value, leaving the past-write phase first
    /// if necessary.
    pub fn increment_future_value(&mut self) -> bool {
        if !self.reading_future() {
            if self.future_values.is_empty() {
                return false;
            }
            self.read_from_index = self.may_read_from.len();
            self.future_index = 0;
            return true;
        }
        if self.future_index + 1 < self.future_values.len() {
            self.future_index += 1;
            true
        } else {
            false
        }
    }

    pub fn future_value_empty(&self) -> bool {
        if self.reading_future() {
            self.future_index + 1 >= self.future_values.len()
        } else {
            self.future_values.is_empty()
        }
    }

    // ----- promise choices ------------------------------------------------

    /// Note that this node's write may satisfy promise `i`.
    pub fn set_promise(&mut self, i: usize) {
        if i >= self.promises.len() {
            self.promises.resize(i + 1, PromiseChoice::Ignore);
        }
        self.promises[i] = PromiseChoice::Unfulfilled;
    }

    /// Whether the current choice has this node's write satisfy promise `i`.
    pub fn get_promise(&self, i: usize) -> bool {
        self.promises.get(i) == Some(&PromiseChoice::Fulfilled)
    }

    /// Enumerate subsets of satisfiable promises as a binary counter.
    pub fn increment_promise(&mut self) -> bool {
        let Some(i) = self.promises.iter().position(|p| *p == PromiseChoice::Unfulfilled) else {
            return false;
        };
        self.promises[i] = PromiseChoice::Fulfilled;
        for p in &mut self.promises[..i] {
            if *p == PromiseChoice::Fulfilled {
                *p = PromiseChoice::Unfulfilled;
            }
        }
        true
    }

    pub fn promise_empty(&self) -> bool {
        !self.promises.contains(&PromiseChoice::Unfulfilled)
    }

    /// True if any dimension other than thread choice still has an
    /// unexplored alternative.
    pub fn has_value_alternatives(&self) -> bool {
        !self.read_from_empty() || !self.future_value_empty() || !self.promise_empty()
    }
}

/// Result of offering an action to the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exploration {
    /// The step was recorded by an earlier execution; use this action.
    Replay(ActionId),
    /// A new node was created for the offered action.
    Fresh(ActionId),
}

impl Exploration {
    pub fn action(self) -> ActionId {
        match self {
            Exploration::Replay(id) | Exploration::Fresh(id) => id,
        }
    }
}

/// The recorded path plus a cursor marking the current step of the
/// execution being replayed or extended.
#[derive(Clone, Debug)]
pub struct NodeStack {
    nodes: Vec<Node>,
    actions: Vec<Action>,
    head: usize,
    total_nodes: usize,
}

impl Default for NodeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStack {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, None, 1)],
            actions: Vec::new(),
            head: 0,
            total_nodes: 0,
        }
    }

    /// Advance one step. On replay the recorded action is returned and the
    /// candidate is dropped; otherwise the candidate is recorded in a new node
    /// that enables `num_threads` threads.
    pub fn explore_action(&mut self, mut candidate: Action, num_threads: usize) -> Exploration {
        if self.head + 1 < self.nodes.len() {
            self.head += 1;
            return Exploration::Replay(ActionId(self.head - 1));
        }
        self.nodes[self.head].explore(candidate.tid);
        let id = ActionId(self.actions.len());
        let node = NodeId(self.nodes.len());
        candidate.node = Some(node);
        self.actions.push(candidate);
        self.nodes
            .push(Node::new(Some(id), Some(NodeId(self.head)), num_threads));
        self.head += 1;
        self.total_nodes += 1;
        Exploration::Fresh(id)
    }

    /// The node after the cursor, if the recorded path continues.
    pub fn next(&self) -> Option<NodeId> {
        (self.head + 1 < self.nodes.len()).then_some(NodeId(self.head + 1))
    }

    /// Drop every node more than `num_ahead - 1` steps past the cursor.
    pub fn pop_restofstack(&mut self, num_ahead: usize) {
        let keep = (self.head + num_ahead).max(1);
        if keep < self.nodes.len() {
            self.nodes.truncate(keep);
            self.actions.truncate(keep - 1);
        }
    }

    /// Rewind the cursor to the root, keeping the recorded path.
    pub fn reset_execution(&mut self) {
        self.head = 0;
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn node_of(&self, action: ActionId) -> NodeId {
        NodeId(action.0 + 1)
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.0]
    }

    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id.0]
    }

    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }
}
