//! Modification-order constraint graph.
//!
//! Nodes are write actions, an edge `a -> b` means `a` precedes `b` in the
//! modification order of their location. Edges are staged first and either
//! committed or rolled back, which lets the engine test a reads-from
//! candidate without polluting the graph. The cycle flag is maintained on
//! every insertion so `has_cycles` is O(1).

use std::collections::HashMap;

use crate::action::ActionId;

#[derive(Clone, Debug, Default)]
struct CycleNode {
    edges: Vec<usize>,
    /// The RMW that read from this write; it must directly follow it.
    rmw: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ModificationOrderGraph {
    nodes: Vec<CycleNode>,
    actions: Vec<ActionId>,
    index: HashMap<ActionId, usize>,
    has_cycles: bool,
    committed_cycles: bool,
    /// Nodes whose most recent edge is staged, in insertion order.
    staged_edges: Vec<usize>,
    /// Nodes whose RMW link is staged.
    staged_rmw: Vec<usize>,
}

impl ModificationOrderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, action: ActionId) -> usize {
        if let Some(&idx) = self.index.get(&action) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(CycleNode::default());
        self.actions.push(action);
        self.index.insert(action, idx);
        idx
    }

    fn push_edge(&mut self, from: usize, to: usize) {
        if self.nodes[from].edges.contains(&to) {
            return;
        }
        if !self.has_cycles {
            self.has_cycles = self.reachable(to, from);
        }
        self.nodes[from].edges.push(to);
        self.staged_edges.push(from);
    }

    /// Stage `from -> to`. If `from` already has an RMW successor, that RMW
    /// must precede `to` as well.
    pub fn add_edge(&mut self, from: ActionId, to: ActionId) {
        let from = self.node(from);
        let to = self.node(to);
        self.push_edge(from, to);
        if let Some(rmw) = self.nodes[from].rmw {
            if rmw != to {
                self.push_edge(rmw, to);
            }
        }
    }

    /// Place `rmw` immediately after the write it read from. Two RMWs reading
    /// the same write can never both be adjacent to it, so that case marks
    /// the graph as cyclic.
    pub fn add_rmw_edge(&mut self, from: ActionId, rmw: ActionId) {
        let from = self.node(from);
        let rmw = self.node(rmw);
        match self.nodes[from].rmw {
            Some(existing) if existing != rmw => self.has_cycles = true,
            Some(_) => {}
            None => {
                self.nodes[from].rmw = Some(rmw);
                self.staged_rmw.push(from);
            }
        }
        let successors = self.nodes[from].edges.clone();
        for to in successors {
            if to != rmw {
                self.push_edge(rmw, to);
            }
        }
        self.push_edge(from, rmw);
    }

    pub fn commit(&mut self) {
        self.staged_edges.clear();
        self.staged_rmw.clear();
        self.committed_cycles = self.has_cycles;
    }

    pub fn rollback(&mut self) {
        for from in self.staged_edges.drain(..).rev() {
            self.nodes[from].edges.pop();
        }
        for from in self.staged_rmw.drain(..) {
            self.nodes[from].rmw = None;
        }
        self.has_cycles = self.committed_cycles;
    }

    pub fn has_cycles(&self) -> bool {
        self.has_cycles
    }

    pub fn has_staged_changes(&self) -> bool {
        !self.staged_edges.is_empty() || !self.staged_rmw.is_empty()
    }

    /// True if `to` is reachable from `from` (reflexively).
    pub fn is_reachable(&self, from: ActionId, to: ActionId) -> bool {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&f), Some(&t)) => self.reachable(f, t),
            _ => false,
        }
    }

    fn reachable(&self, from: usize, to: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        visited[from] = true;
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            for &next in &self.nodes[n].edges {
                if !visited[next] {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
        false
    }

    /// All edges currently in the graph, staged ones included.
    pub fn edges(&self) -> Vec<(ActionId, ActionId)> {
        let mut out = Vec::new();
        for (from, node) in self.nodes.iter().enumerate() {
            for &to in &node.edges {
                out.push((self.actions[from], self.actions[to]));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn a(i: usize) -> ActionId {
        ActionId(i)
    }

    #[test]
    fn test_acyclic_chain() {
        let mut g = ModificationOrderGraph::new();
        g.add_edge(a(1), a(2));
        g.add_edge(a(2), a(3));
        g.commit();
        assert!(!g.has_cycles());
        assert!(g.is_reachable(a(1), a(3)));
        assert!(!g.is_reachable(a(3), a(1)));
    }

    #[test]
    fn test_cycle_detected_on_insertion() {
        let mut g = ModificationOrderGraph::new();
        g.add_edge(a(1), a(2));
        g.add_edge(a(2), a(3));
        g.add_edge(a(3), a(1));
        assert!(g.has_cycles());
    }

    #[test]
    fn test_rollback_discards_staged_edges_and_cycle() {
        let mut g = ModificationOrderGraph::new();
        g.add_edge(a(1), a(2));
        g.commit();
        g.add_edge(a(2), a(1));
        assert!(g.has_cycles());
        g.rollback();
        assert!(!g.has_cycles());
        assert_eq!(g.edges(), vec![(a(1), a(2))]);
        assert!(!g.has_staged_changes());
    }

    #[test]
    fn test_duplicate_edge_is_not_staged_twice() {
        let mut g = ModificationOrderGraph::new();
        g.add_edge(a(1), a(2));
        g.commit();
        g.add_edge(a(1), a(2));
        assert!(!g.has_staged_changes());
        g.rollback();
        assert!(g.is_reachable(a(1), a(2)));
    }

    #[test]
    fn test_rmw_inherits_successors() {
        let mut g = ModificationOrderGraph::new();
        g.add_edge(a(1), a(3));
        g.add_rmw_edge(a(1), a(2));
        g.commit();
        assert!(g.is_reachable(a(1), a(2)));
        assert!(g.is_reachable(a(2), a(3)));
        // Later successors of the write are pushed behind the RMW too.
        g.add_edge(a(1), a(4));
        assert!(g.is_reachable(a(2), a(4)));
        assert!(!g.has_cycles());
    }

    #[test]
    fn test_two_rmws_reading_same_write_is_infeasible() {
        let mut g = ModificationOrderGraph::new();
        g.add_rmw_edge(a(1), a(2));
        g.commit();
        g.add_rmw_edge(a(1), a(3));
        assert!(g.has_cycles());
        g.rollback();
        assert!(!g.has_cycles());
    }

    #[test]
    fn test_rollback_clears_staged_rmw_link() {
        let mut g = ModificationOrderGraph::new();
        g.add_rmw_edge(a(1), a(2));
        g.rollback();
        g.add_rmw_edge(a(1), a(3));
        assert!(!g.has_cycles());
    }

    #[test]
    fn test_unknown_nodes_are_unreachable() {
        let g = ModificationOrderGraph::new();
        assert!(!g.is_reachable(a(1), a(2)));
    }

    fn arb_edges() -> impl Strategy<Value = Vec<(usize, usize)>> {
        proptest::collection::vec((0usize..8, 0usize..8), 0..16)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn test_rollback_restores_committed_graph(committed in arb_edges(), staged in arb_edges()) {
            let mut g = ModificationOrderGraph::new();
            for &(x, y) in &committed {
                g.add_edge(a(x), a(y));
            }
            g.commit();
            let before = g.edges();
            let cyclic = g.has_cycles();

            for &(x, y) in &staged {
                g.add_edge(a(x), a(y));
            }
            g.rollback();

            prop_assert_eq!(g.edges(), before);
            prop_assert_eq!(g.has_cycles(), cyclic);
            prop_assert!(!g.has_staged_changes());
        }

        #[test]
        fn test_cycle_flag_matches_reachability(edges in arb_edges()) {
            let mut g = ModificationOrderGraph::new();
            for &(x, y) in &edges {
                g.add_edge(a(x), a(y));
            }
            let closes_cycle = edges.iter().any(|&(x, y)| g.is_reachable(a(y), a(x)));
            prop_assert_eq!(g.has_cycles(), closes_cycle);
        }
    }
}
