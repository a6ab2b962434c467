//! Dominator analysis over the control nodes of a Sea-of-Nodes graph.
//!
//! Every CFG node is its own block here: the loop optimizer reasons about
//! individual branches and projections, so there is no basic-block layer.
//! Idoms are computed with the Cooper-Harvey-Kennedy iteration over
//! reverse postorder from `Start`.
//!
//! Floating data nodes get a control placement through
//! [`DominatorTree::ctrl_of`]: the deepest control among their pinned
//! control input and the placements of their inputs.

use rustc_hash::FxHashMap;

use super::arena::{BitSet, SecondaryMap};
use super::graph::Graph;
use super::node::{Node, NodeId};
use super::operators::Operator;

// =============================================================================
// Dominator Tree
// =============================================================================

#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator (INVALID for `Start` and unreachable nodes).
    idom: SecondaryMap<Node, NodeId>,

    depth: SecondaryMap<Node, u32>,

    /// Postorder number, used by the intersection walk.
    postorder: SecondaryMap<Node, u32>,

    reachable: BitSet,

    /// Reachable CFG nodes in reverse postorder.
    rpo: Vec<NodeId>,

    entry: NodeId,
}

impl DominatorTree {
    pub fn build(graph: &Graph) -> Self {
        let entry = graph.start;
        let mut dom = DominatorTree {
            idom: SecondaryMap::new(),
            depth: SecondaryMap::new(),
            postorder: SecondaryMap::new(),
            reachable: BitSet::with_capacity(graph.len()),
            rpo: Vec::new(),
            entry,
        };

        let postorder = dom.compute_postorder(graph);
        for (i, &n) in postorder.iter().enumerate() {
            dom.postorder.set(n, i as u32);
        }
        dom.rpo = postorder.into_iter().rev().collect();

        let mut done = BitSet::with_capacity(graph.len());
        done.insert(entry.as_usize());

        // Cooper-Harvey-Kennedy
        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..dom.rpo.len() {
                let n = dom.rpo[i];
                let mut new_idom = NodeId::INVALID;
                for pred in graph.cfg_preds(n) {
                    if !done.contains(pred.as_usize()) {
                        continue;
                    }
                    new_idom = if new_idom.is_valid() {
                        dom.intersect(pred, new_idom)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && dom.idom[n] != new_idom {
                    dom.idom.set(n, new_idom);
                    done.insert(n.as_usize());
                    changed = true;
                }
            }
        }

        for i in 1..dom.rpo.len() {
            let n = dom.rpo[i];
            let idom = dom.idom[n];
            if idom.is_valid() {
                let d = dom.depth[idom] + 1;
                dom.depth.set(n, d);
            }
        }

        dom
    }

    fn compute_postorder(&mut self, graph: &Graph) -> Vec<NodeId> {
        let mut postorder = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(self.entry, 0)];
        self.reachable.insert(self.entry.as_usize());

        while let Some((n, next)) = stack.pop() {
            let succs = graph.cfg_succs(n);
            if let Some(&succ) = succs.get(next) {
                stack.push((n, next + 1));
                if self.reachable.insert(succ.as_usize()) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(n);
            }
        }
        postorder
    }

    fn intersect(&self, mut a: NodeId, mut b: NodeId) -> NodeId {
        while a != b {
            while self.postorder[a] < self.postorder[b] {
                a = self.idom[a];
                if !a.is_valid() {
                    return b;
                }
            }
            while self.postorder[b] < self.postorder[a] {
                b = self.idom[b];
                if !b.is_valid() {
                    return a;
                }
            }
        }
        a
    }

    /// Immediate dominator, `INVALID` for `Start`.
    #[inline]
    pub fn idom(&self, n: NodeId) -> NodeId {
        self.idom[n]
    }

    #[inline]
    pub fn depth(&self, n: NodeId) -> u32 {
        self.depth[n]
    }

    #[inline]
    pub fn is_reachable(&self, n: NodeId) -> bool {
        self.reachable.contains(n.as_usize())
    }

    /// Reachable CFG nodes in reverse postorder.
    pub fn rpo(&self) -> &[NodeId] {
        &self.rpo
    }

    /// Record `idom` as the immediate dominator of a node created after the
    /// tree was built.
    pub fn set_idom(&mut self, n: NodeId, idom: NodeId) {
        self.idom.set(n, idom);
        let d = self.depth[idom] + 1;
        self.depth.set(n, d);
        self.reachable.insert(n.as_usize());
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        let mut current = b;
        while current.is_valid() {
            if current == a {
                return true;
            }
            if self.depth[current] < self.depth[a] {
                return false;
            }
            current = self.idom[current];
        }
        false
    }

    // =========================================================================
    // Data Placement
    // =========================================================================

    /// Control node a data node is placed at. CFG nodes are their own control.
    pub fn ctrl_of(&self, graph: &Graph, n: NodeId, memo: &mut FxHashMap<NodeId, NodeId>) -> NodeId {
        if graph.is_cfg(n) {
            return n;
        }
        if let Some(&ctrl) = memo.get(&n) {
            return ctrl;
        }

        let node = graph.node(n);
        let ctrl = if node.op == Operator::Phi {
            node.input(0)
        } else {
            // Phis break data cycles, so the recursion terminates.
            let mut best = self.entry;
            for (i, &input) in node.inputs.iter().enumerate() {
                if !input.is_valid() || graph.is_dead(input) {
                    continue;
                }
                let c = if i == 0 || graph.is_cfg(input) {
                    input
                } else {
                    self.ctrl_of(graph, input, memo)
                };
                if c.is_valid() && self.depth(c) > self.depth(best) {
                    best = c;
                }
            }
            best
        };
        memo.insert(n, ctrl);
        ctrl
    }
}

// =============================================================================
// Tests
// =============================================================================
