//! Natural loop tree.
//!
//! Loops are discovered from `Loop` heads whose backedge is dominated by the
//! head. Every node (control and data) is assigned to its innermost loop;
//! nodes outside all loops belong to [`LoopTree::ROOT`].
//!
//! A [`LoopInfo`] stores only the nodes whose innermost loop it is. Use
//! [`LoopTree::subtree_body`] for a loop including its nested loops.

use rustc_hash::FxHashMap;

use super::arena::{Arena, BitSet, Id, SecondaryMap};
use super::cfg::DominatorTree;
use super::graph::Graph;
use super::node::{LoopFlags, LoopHead, Node, NodeId};
use super::operators::{ControlOp, LoopKind, Operator};

pub type LoopId = Id<LoopInfo>;

// =============================================================================
// Loop Info
// =============================================================================

#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// Loop head, `INVALID` for the root pseudo-loop.
    pub head: NodeId,
    /// Backedge control (input 2 of the head).
    pub tail: NodeId,
    pub parent: LoopId,
    pub children: Vec<LoopId>,
    /// Nodes whose innermost loop this is.
    pub body: Vec<NodeId>,
    /// Nesting depth; the root is 0.
    pub depth: u32,
}

impl LoopInfo {
    fn new(head: NodeId, tail: NodeId, parent: LoopId) -> Self {
        LoopInfo {
            head,
            tail,
            parent,
            children: Vec::new(),
            body: Vec::new(),
            depth: 0,
        }
    }
}

/// Shape of a counted loop's induction variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountedLoopInfo {
    /// Induction phi at the head.
    pub iv: NodeId,
    /// Value entering the loop.
    pub init: NodeId,
    /// `iv + stride` flowing around the backedge.
    pub incr: NodeId,
    pub stride: NodeId,
    pub stride_con: i32,
}

// =============================================================================
// Loop Tree
// =============================================================================

#[derive(Debug, Clone)]
pub struct LoopTree {
    loops: Arena<LoopInfo>,
    /// Innermost loop of each node. INVALID means the root.
    loop_of: SecondaryMap<Node, LoopId>,
    /// Control placement of data nodes.
    ctrl: SecondaryMap<Node, NodeId>,
    pub dom: DominatorTree,
}

impl LoopTree {
    pub const ROOT: LoopId = Id::new(0);

    pub fn build(graph: &Graph) -> Self {
        let dom = DominatorTree::build(graph);
        let mut loops = Arena::new();
        loops.alloc(LoopInfo::new(NodeId::INVALID, NodeId::INVALID, LoopId::INVALID));

        let mut tree = LoopTree {
            loops,
            loop_of: SecondaryMap::with_capacity(graph.len()),
            ctrl: SecondaryMap::with_capacity(graph.len()),
            dom,
        };

        // Natural loop bodies, control nodes only.
        let mut found: Vec<(NodeId, NodeId, Vec<NodeId>)> = Vec::new();
        for &n in tree.dom.rpo() {
            if !graph.op(n).is_loop() {
                continue;
            }
            let tail = graph.input(n, 2);
            if !tail.is_valid() || graph.is_dead(tail) || !tree.dom.dominates(n, tail) {
                continue;
            }
            found.push((n, tail, natural_loop(graph, n, tail)));
        }

        // Outer loops first, so inner loops overwrite the assignment of
        // their nodes and find their parent at their head.
        found.sort_by_key(|(_, _, body)| std::cmp::Reverse(body.len()));
        for (head, tail, body) in found {
            let parent = tree.loop_of(head);
            let id = tree.loops.alloc(LoopInfo::new(head, tail, parent));
            tree.loops[parent].children.push(id);
            tree.loops[id].depth = tree.loops[parent].depth + 1;
            for n in body {
                tree.loop_of.set(n, id);
            }
        }

        let mut memo = FxHashMap::default();
        for (n, node) in graph.iter() {
            if node.is_cfg() {
                if tree.dom.is_reachable(n) {
                    let l = tree.loop_of(n);
                    tree.loops[l].body.push(n);
                }
                continue;
            }
            let c = tree.dom.ctrl_of(graph, n, &mut memo);
            if !c.is_valid() || !tree.dom.is_reachable(c) {
                continue;
            }
            tree.ctrl.set(n, c);
            let l = tree.loop_of(c);
            tree.loop_of.set(n, l);
            tree.loops[l].body.push(n);
        }

        tree
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub fn get(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id]
    }

    /// Number of loops, the root included.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.len() <= 1
    }

    /// Innermost loop of a node.
    #[inline]
    pub fn loop_of(&self, n: NodeId) -> LoopId {
        let l = self.loop_of[n];
        if l.is_valid() {
            l
        } else {
            Self::ROOT
        }
    }

    /// Loop whose head is `head`.
    pub fn loop_for_head(&self, head: NodeId) -> Option<LoopId> {
        let l = self.loop_of(head);
        (l != Self::ROOT && self.loops[l].head == head).then_some(l)
    }

    /// All real loops, innermost first.
    pub fn innermost_first(&self) -> Vec<LoopId> {
        let mut ids: Vec<LoopId> = self.loops.ids().skip(1).collect();
        ids.sort_by_key(|&l| std::cmp::Reverse(self.loops[l].depth));
        ids
    }

    /// Control placement of a node. CFG nodes are their own control.
    #[inline]
    pub fn get_ctrl(&self, graph: &Graph, n: NodeId) -> NodeId {
        if graph.is_cfg(n) {
            n
        } else {
            self.ctrl[n]
        }
    }

    /// `inner` is `outer` or nested in it.
    pub fn is_member(&self, outer: LoopId, inner: LoopId) -> bool {
        let mut l = inner;
        while l.is_valid() {
            if l == outer {
                return true;
            }
            l = self.loops[l].parent;
        }
        false
    }

    /// `n` is placed in `l` or a loop nested in it.
    pub fn contains(&self, l: LoopId, n: NodeId) -> bool {
        self.is_member(l, self.loop_of(n))
    }

    /// The value of `n` does not change across iterations of `l`.
    pub fn is_invariant(&self, graph: &Graph, l: LoopId, n: NodeId) -> bool {
        let c = self.get_ctrl(graph, n);
        !c.is_valid() || !self.contains(l, c)
    }

    /// An `If` inside `l` with a projection leaving the loop.
    pub fn is_loop_exit(&self, graph: &Graph, l: LoopId, iff: NodeId) -> bool {
        if !graph.op(iff).is_if() || graph.outcnt(iff) != 2 {
            return false;
        }
        graph
            .uses(iff)
            .iter()
            .any(|&proj| !self.contains(l, proj))
    }

    /// `l` and all loops nested in it, `l` first.
    pub fn subtree(&self, l: LoopId) -> Vec<LoopId> {
        let mut out = vec![l];
        let mut i = 0;
        while i < out.len() {
            out.extend_from_slice(&self.loops[out[i]].children);
            i += 1;
        }
        out
    }

    /// Every node of `l` and its nested loops.
    pub fn subtree_body(&self, l: LoopId) -> Vec<NodeId> {
        self.subtree(l)
            .into_iter()
            .flat_map(|id| self.loops[id].body.iter().copied())
            .collect()
    }

    /// Membership set over [`LoopTree::subtree_body`].
    pub fn subtree_set(&self, l: LoopId) -> BitSet {
        let mut set = BitSet::new();
        for n in self.subtree_body(l) {
            set.insert(n.as_usize());
        }
        set
    }

    /// Number of nodes in `l` and its nested loops.
    pub fn body_size(&self, l: LoopId) -> usize {
        self.subtree(l)
            .into_iter()
            .map(|id| self.loops[id].body.len())
            .sum()
    }

    /// The outer strip-mined loop around `l`, or `l` itself.
    pub fn skip_strip_mined_loop(&self, graph: &Graph, l: LoopId) -> LoopId {
        let head = self.loops[l].head;
        let outer = skip_strip_mined(graph, head);
        if outer == head {
            l
        } else {
            self.loop_for_head(outer).unwrap_or(l)
        }
    }

    // =========================================================================
    // Registration of New Nodes
    // =========================================================================

    /// Create a loop entry for a head created by a transformation.
    pub fn add_loop(&mut self, head: NodeId, tail: NodeId, parent: LoopId) -> LoopId {
        let id = self.loops.alloc(LoopInfo::new(head, tail, parent));
        self.loops[parent].children.push(id);
        self.loops[id].depth = self.loops[parent].depth + 1;
        id
    }

    /// Place a new control node in `l` with immediate dominator `idom`.
    pub fn register_control(&mut self, n: NodeId, l: LoopId, idom: NodeId) {
        self.loop_of.set(n, l);
        self.loops[l].body.push(n);
        if idom.is_valid() {
            self.dom.set_idom(n, idom);
        }
    }

    /// Place a new data node at control `c`.
    pub fn register_new_node(&mut self, graph: &Graph, n: NodeId, c: NodeId) {
        let l = self.loop_of(c);
        self.loop_of.set(n, l);
        self.loops[l].body.push(n);
        if !graph.is_cfg(n) {
            self.ctrl.set(n, c);
        }
    }

    /// Move a data node's placement.
    pub fn set_ctrl(&mut self, n: NodeId, c: NodeId) {
        self.ctrl.set(n, c);
    }

    /// Rebuild the dominator tree after control flow changed.
    pub fn recompute_dom_depth(&mut self, graph: &Graph) {
        self.dom = DominatorTree::build(graph);
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Control nodes of the natural loop of `head` with backedge `tail`.
fn natural_loop(graph: &Graph, head: NodeId, tail: NodeId) -> Vec<NodeId> {
    let mut seen = BitSet::with_capacity(graph.len());
    seen.insert(head.as_usize());
    let mut body = vec![head];
    let mut stack = Vec::new();
    if seen.insert(tail.as_usize()) {
        body.push(tail);
        stack.push(tail);
    }
    while let Some(n) = stack.pop() {
        for pred in graph.cfg_preds(n) {
            if seen.insert(pred.as_usize()) {
                body.push(pred);
                stack.push(pred);
            }
        }
    }
    body
}

/// For the inner loop of a strip-mined nest, the enclosing outer loop head.
/// Any other node maps to itself.
pub fn skip_strip_mined(graph: &Graph, head: NodeId) -> NodeId {
    let is_strip_mined = graph
        .node(head)
        .loop_head()
        .is_some_and(|h| h.flags.contains(LoopFlags::STRIP_MINED));
    if !is_strip_mined {
        return head;
    }
    let outer = graph.input(head, 1);
    if outer.is_valid()
        && graph.op(outer) == Operator::Control(ControlOp::Loop(LoopKind::OuterStripMined))
    {
        outer
    } else {
        head
    }
}

pub fn loop_head(graph: &Graph, head: NodeId) -> Option<LoopHead> {
    graph.node(head).loop_head().copied()
}

pub fn is_counted_loop(graph: &Graph, head: NodeId) -> bool {
    graph.op(head) == Operator::Control(ControlOp::Loop(LoopKind::Counted))
}

/// Induction variable shape of a counted loop head.
pub fn counted_loop_info(graph: &Graph, head: NodeId) -> Option<CountedLoopInfo> {
    if !is_counted_loop(graph, head) {
        return None;
    }
    let iv = graph.node(head).loop_head()?.iv.valid()?;
    if graph.is_dead(iv) || graph.op(iv) != Operator::Phi || graph.input(iv, 0) != head {
        return None;
    }
    let init = graph.input(iv, 1);
    let incr = graph.input(iv, 2);
    if !incr.is_valid() || graph.input(incr, 1) != iv {
        return None;
    }
    let stride = graph.input(incr, 2);
    let stride_con = graph.find_int_con(stride)?;
    Some(CountedLoopInfo {
        iv,
        init,
        incr,
        stride,
        stride_con,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::BranchProfile;
    use crate::ir::operators::{BoolTest, CmpKind, IfKind, ParmKind, Width};
    use crate::ir::types::ValueType;

    /// `for (i = 0; i < n; i++) {}` with a single exit test.
    fn simple_loop(g: &mut Graph) -> (NodeId, NodeId, NodeId) {
        let start = g.start;
        let n = g.parm(ParmKind::Int(1));
        let head = g.loop_node(LoopKind::Counted, start, NodeId::INVALID);
        let zero = g.con_i(0);
        let one = g.con_i(1);
        let iv = g.phi(head, &[zero, NodeId::INVALID], ValueType::INT);
        let incr = g.add_i(iv, one);
        g.replace_input(iv, 2, incr);
        if let Some(h) = g.node_mut(head).loop_head_mut() {
            h.iv = iv;
        }
        let cmp = g.cmp(CmpKind::Signed, Width::Int, incr, n);
        let b = g.bool(BoolTest::Lt, cmp);
        let exit_test = g.if_node(IfKind::Plain, head, b, BranchProfile::UNKNOWN);
        let back = g.if_true(exit_test);
        let exit = g.if_false(exit_test);
        g.replace_input(head, 2, back);
        g.ret(exit, incr);
        (head, exit_test, exit)
    }

    #[test]
    fn test_single_loop_membership() {
        let mut g = Graph::new();
        let (head, exit_test, exit) = simple_loop(&mut g);
        let tree = LoopTree::build(&g);

        let l = tree.loop_for_head(head).unwrap();
        assert_eq!(tree.get(l).parent, LoopTree::ROOT);
        assert_eq!(tree.get(l).depth, 1);
        assert!(tree.contains(l, exit_test));
        assert!(!tree.contains(l, exit));
        assert!(tree.is_loop_exit(&g, l, exit_test));
    }

    #[test]
    fn test_invariance() {
        let mut g = Graph::new();
        let (head, ..) = simple_loop(&mut g);
        let tree = LoopTree::build(&g);
        let l = tree.loop_for_head(head).unwrap();
        let info = counted_loop_info(&g, head).unwrap();
        let cmp = g.input(g.input(g.input(g.input(head, 2), 0), 1), 1);

        assert_eq!(info.stride_con, 1);
        assert!(!tree.is_invariant(&g, l, info.iv));
        assert!(!tree.is_invariant(&g, l, info.incr));
        assert!(tree.is_invariant(&g, l, info.init));
        assert!(tree.body_size(l) >= 6);
        // The compare of incr against n sits in the loop.
        assert!(!tree.is_invariant(&g, l, cmp));
    }

    #[test]
    fn test_nested_loops() {
        let mut g = Graph::new();
        let start = g.start;
        let outer = g.loop_node(LoopKind::Plain, start, NodeId::INVALID);
        let inner = g.loop_node(LoopKind::Plain, outer, NodeId::INVALID);
        let flag = g.parm(ParmKind::Int(0));
        let iff = g.if_node(IfKind::Plain, inner, flag, BranchProfile::UNKNOWN);
        let inner_back = g.if_true(iff);
        let inner_exit = g.if_false(iff);
        g.replace_input(inner, 2, inner_back);
        let iff2 = g.if_node(IfKind::Plain, inner_exit, flag, BranchProfile::UNKNOWN);
        let outer_back = g.if_true(iff2);
        let outer_exit = g.if_false(iff2);
        g.replace_input(outer, 2, outer_back);
        let zero = g.con_i(0);
        g.ret(outer_exit, zero);

        let tree = LoopTree::build(&g);
        let lo = tree.loop_for_head(outer).unwrap();
        let li = tree.loop_for_head(inner).unwrap();

        assert_eq!(tree.get(li).parent, lo);
        assert!(tree.is_member(lo, li));
        assert!(!tree.is_member(li, lo));
        assert_eq!(tree.innermost_first()[0], li);
        assert!(tree.contains(lo, iff));
        assert_eq!(tree.loop_of(iff2), lo);
        assert_eq!(tree.subtree(lo), vec![lo, li]);
    }
}
