//! Loop optimizer state.
//!
//! A [`LoopOptimizer`] borrows the graph for one round of loop
//! optimizations and owns everything the transformations share: the loop
//! tree with its dominators and control placement, the IGVN worklist and
//! the node budget.
//!
//! Transformations register every node they create so that the loop tree
//! stays usable until the next [`LoopOptimizer::rebuild`]. Dominator depths
//! of rewired control are only approximate until
//! [`LoopOptimizer::recompute_dom_depth`] runs.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use super::config::LoopOptsConfig;
use super::igvn::{Igvn, Worklist};
use crate::error::{LoopOptError, Result};
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::loops::{skip_strip_mined, LoopId, LoopTree};
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;

/// Map from original nodes to their clones.
pub type OldNew = FxHashMap<NodeId, NodeId>;

/// How much of a strip-mined nest [`LoopOptimizer::clone_loop`] copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneLoopMode {
    /// Clone only the given loop.
    IgnoreStripMined,
    /// Clone the outer strip-mined loop together with the inner loop.
    CloneIncludesStripMined,
}

// =============================================================================
// Loop Optimizer
// =============================================================================

pub struct LoopOptimizer<'g> {
    graph: &'g mut Graph,
    tree: LoopTree,
    worklist: Worklist,
    config: LoopOptsConfig,
    major_progress: bool,
    /// Nodes promised to transformations since the last
    /// [`LoopOptimizer::require_nodes_begin`].
    nodes_required: usize,
    /// Live nodes when the current budget was opened.
    nodes_at_begin: usize,
}

impl<'g> LoopOptimizer<'g> {
    pub fn new(graph: &'g mut Graph, config: LoopOptsConfig) -> Self {
        let tree = LoopTree::build(graph);
        let nodes_at_begin = graph.live_nodes();
        Self {
            graph,
            tree,
            worklist: Worklist::new(),
            config,
            major_progress: false,
            nodes_required: 0,
            nodes_at_begin,
        }
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut Graph {
        self.graph
    }

    #[inline]
    pub fn tree(&self) -> &LoopTree {
        &self.tree
    }

    #[inline]
    pub fn config(&self) -> &LoopOptsConfig {
        &self.config
    }

    #[inline]
    pub fn worklist_mut(&mut self) -> &mut Worklist {
        &mut self.worklist
    }

    pub fn major_progress(&self) -> bool {
        self.major_progress
    }

    pub fn set_major_progress(&mut self) {
        self.major_progress = true;
    }

    /// Recompute the loop tree from scratch.
    pub fn rebuild(&mut self) {
        self.tree = LoopTree::build(self.graph);
    }

    /// Drain the worklist through IGVN, then rebuild the loop tree.
    pub fn run_igvn(&mut self) -> bool {
        let changed = Igvn::new().optimize(self.graph, &mut self.worklist);
        self.rebuild();
        changed
    }

    // =========================================================================
    // Loop Tree Queries
    // =========================================================================

    /// Innermost loop of a control node.
    #[inline]
    pub fn get_loop(&self, n: NodeId) -> LoopId {
        self.tree.loop_of(n)
    }

    /// Control placement of `n`. Nodes created without registration get
    /// their earliest legal control.
    pub fn get_ctrl(&self, n: NodeId) -> NodeId {
        let c = self.tree.get_ctrl(self.graph, n);
        if c.is_valid() {
            c
        } else {
            self.early_ctrl(n)
        }
    }

    fn early_ctrl(&self, n: NodeId) -> NodeId {
        let mut memo = FxHashMap::default();
        self.tree.dom.ctrl_of(self.graph, n, &mut memo)
    }

    #[inline]
    pub fn idom(&self, n: NodeId) -> NodeId {
        self.tree.dom.idom(n)
    }

    #[inline]
    pub fn dom_depth(&self, n: NodeId) -> u32 {
        self.tree.dom.depth(n)
    }

    /// `a` dominates the control point `b`.
    pub fn is_dominator(&self, a: NodeId, b: NodeId) -> bool {
        self.tree.dom.dominates(a, b)
    }

    pub fn is_invariant(&self, l: LoopId, n: NodeId) -> bool {
        self.tree.is_invariant(self.graph, l, n)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Place a new control node in loop `l` below `idom`.
    pub fn register_control(&mut self, n: NodeId, l: LoopId, idom: NodeId) {
        self.tree.register_control(n, l, idom);
        self.worklist.push(n);
    }

    /// Place a new data node at control `c`.
    pub fn register_new_node(&mut self, n: NodeId, c: NodeId) {
        self.tree.register_new_node(self.graph, n, c);
        self.worklist.push(n);
    }

    /// Register `n` at `ctrl`: control nodes join the loop of `ctrl` with
    /// `ctrl` as their idom, data nodes are placed at `ctrl`.
    pub fn register_node(&mut self, n: NodeId, ctrl: NodeId) {
        if self.graph.is_cfg(n) {
            let l = self.get_loop(ctrl);
            self.register_control(n, l, ctrl);
        } else {
            self.register_new_node(n, ctrl);
        }
    }

    /// Clone `n` and place the clone at `ctrl`.
    pub fn clone_and_register(&mut self, n: NodeId, ctrl: NodeId) -> NodeId {
        let clone = self.graph.clone_node(n);
        self.register_new_node(clone, ctrl);
        clone
    }

    pub fn set_ctrl(&mut self, n: NodeId, c: NodeId) {
        self.tree.set_ctrl(n, c);
    }

    // =========================================================================
    // Control Rewiring
    // =========================================================================

    /// Make `entry` the entry control of loop head `head`.
    pub fn replace_loop_entry(&mut self, head: NodeId, entry: NodeId) {
        self.graph.replace_input(head, 1, entry);
        self.tree.dom.set_idom(head, entry);
        self.worklist.push(head);
    }

    /// Make `ctrl` the control input of `n`, which stays in its loop.
    pub fn replace_control_same_loop(&mut self, n: NodeId, ctrl: NodeId) {
        self.graph.replace_input(n, 0, ctrl);
        self.tree.dom.set_idom(n, ctrl);
        self.worklist.push(n);
    }

    /// `iff` is dominated by the projection `prevdom` of an `If` with the
    /// same condition. Hardwire `iff` to the direction `prevdom` took and
    /// move nodes depending only on that test up to `prevdom`.
    pub fn dominated_by(&mut self, prevdom: NodeId, iff: NodeId) -> Result<()> {
        if !self.graph.op(iff).is_if() {
            return Err(LoopOptError::MalformedPredicate {
                node: iff,
                reason: "dominated test is not an If",
            });
        }
        let taken = self.graph.is_if_true(prevdom);
        trace!(target: "loopopts", "dominated_by {prevdom:?} hardwires {iff:?} to {taken}");

        let con = self.graph.con_i(i32::from(taken));
        self.graph.replace_input(iff, 1, con);

        if self.graph.outcnt(iff) == 2 {
            let dp = self
                .graph
                .proj_out(iff, taken)
                .ok_or(LoopOptError::MissingProjection(iff))?;
            let mut dependents: Vec<NodeId> = self
                .graph
                .uses(dp)
                .iter()
                .copied()
                .filter(|&u| {
                    let node = self.graph.node(u);
                    !node.is_cfg() && node.op.depends_only_on_test() && node.input(0) == dp
                })
                .collect();
            dependents.sort_unstable();
            dependents.dedup();
            for u in dependents {
                self.graph.replace_input(u, 0, prevdom);
                let early = self.early_ctrl(u);
                self.set_ctrl(u, early);
                self.worklist.push(u);
            }
        }

        self.worklist.push(iff);
        Ok(())
    }

    /// Rebuild dominators after control flow was rewired.
    pub fn recompute_dom_depth(&mut self) {
        self.tree.recompute_dom_depth(self.graph);
    }

    // =========================================================================
    // Node Budget
    // =========================================================================

    /// Open a fresh budget for one loop transformation.
    pub fn require_nodes_begin(&mut self) {
        self.nodes_required = 0;
        self.nodes_at_begin = self.graph.live_nodes();
    }

    /// Close the current budget. Returns whether the transformation stayed
    /// within what it asked for.
    pub fn require_nodes_final(&mut self) -> bool {
        let grown = self.graph.live_nodes().saturating_sub(self.nodes_at_begin);
        let within = grown <= self.nodes_required.max(self.config.node_budget_reserve);
        if !within {
            debug!(
                target: "loopopts",
                "node budget exceeded: grew by {grown}, required {}",
                self.nodes_required
            );
        }
        self.nodes_required = 0;
        within
    }

    /// Adding `required` nodes would leave less than the reserve below the
    /// node limit.
    pub fn exceeding_node_budget(&self, required: usize) -> bool {
        let available = self
            .config
            .max_node_limit
            .saturating_sub(self.graph.live_nodes());
        available < required + self.nodes_required + self.config.node_budget_reserve
    }

    /// Ask for `required` more nodes. On success, at least the reserve is
    /// added to the current budget.
    pub fn may_require_nodes(&mut self, required: usize) -> bool {
        if self.exceeding_node_budget(required) {
            return false;
        }
        self.nodes_required += required.max(self.config.node_budget_reserve);
        true
    }

    /// Estimated node growth of cloning loop `l` `factor` times, including
    /// the merges created at its exits.
    pub fn est_loop_clone_sz(&self, l: LoopId, factor: usize) -> usize {
        let info = self.tree.get(l);
        let body = info.body.len();
        let sz = body + (body + 7) / 2;
        let estimate = factor * (sz + 13) + 17;

        let mut ctrl_out = 0;
        let mut data_out = 0;
        for &n in &info.body {
            for &u in self.graph.uses(n) {
                if self.graph.is_dead(u) {
                    continue;
                }
                if self.graph.is_cfg(u) {
                    if !self.tree.contains(l, u) {
                        ctrl_out += 1;
                    }
                } else {
                    let c = self.get_ctrl(u);
                    if !self.tree.contains(l, c) {
                        data_out += 1;
                    }
                }
            }
        }
        let merge = if ctrl_out > 0 && data_out > 0 {
            2 * (ctrl_out + data_out)
        } else {
            0
        };
        estimate + merge
    }

    // =========================================================================
    // Loop Cloning
    // =========================================================================

    /// Clone loop `l` (and the loops nested in it) next to the original.
    ///
    /// The clone head keeps the original entry; callers rewire it with
    /// [`LoopOptimizer::replace_loop_entry`]. Every exit projection of the
    /// original is merged with its clone in a new `Region`, and values
    /// defined in the loop and used after it flow through new `Phi`s at
    /// those regions. Control clones whose idom lies outside the loop are
    /// placed below `side_by_side_idom`.
    pub fn clone_loop(
        &mut self,
        l: LoopId,
        mode: CloneLoopMode,
        side_by_side_idom: NodeId,
    ) -> Result<OldNew> {
        let head = self.tree.get(l).head;
        let root = match mode {
            CloneLoopMode::CloneIncludesStripMined => self.tree.skip_strip_mined_loop(self.graph, l),
            CloneLoopMode::IgnoreStripMined => l,
        };
        let root_head = self.tree.get(root).head;
        let first = self.graph.unique();

        let body: Vec<NodeId> = self
            .tree
            .subtree_body(root)
            .into_iter()
            .filter(|&n| !self.graph.is_dead(n))
            .collect();
        let mut in_body = BitSet::with_capacity(self.graph.len());
        for &n in &body {
            in_body.insert(n.as_usize());
        }

        let mut old_new = OldNew::default();
        for &n in &body {
            let clone = self.graph.clone_node(n);
            old_new.insert(n, clone);
        }
        trace!(target: "loopopts", "clone_loop {head:?}: {} nodes from {first}", body.len());

        // Point clones at clones.
        for &n in &body {
            let clone = old_new[&n];
            for i in 0..self.graph.req(clone) {
                let input = self.graph.input(clone, i);
                if let Some(&mapped) = old_new.get(&input) {
                    self.graph.replace_input(clone, i, mapped);
                }
            }
            if let Some(h) = self.graph.node_mut(clone).loop_head_mut() {
                if let Some(&iv) = old_new.get(&h.iv) {
                    h.iv = iv;
                }
            }
        }

        self.clone_loop_tree(root, &body, &old_new, side_by_side_idom)?;

        let entry_idom = if side_by_side_idom.is_valid() {
            side_by_side_idom
        } else {
            self.idom(root_head)
        };
        let exits = self.merge_loop_exits(&body, &in_body, &old_new, entry_idom)?;
        self.merge_data_uses(&body, &in_body, &old_new, &exits, first)?;

        Ok(old_new)
    }

    /// Mirror the loops under `root` for the clones and register every
    /// clone with its loop and control.
    fn clone_loop_tree(
        &mut self,
        root: LoopId,
        body: &[NodeId],
        old_new: &OldNew,
        side_by_side_idom: NodeId,
    ) -> Result<()> {
        let mut loop_map: FxHashMap<LoopId, LoopId> = FxHashMap::default();
        for lid in self.tree.subtree(root) {
            let info = self.tree.get(lid);
            let parent = if lid == root {
                info.parent
            } else {
                *loop_map
                    .get(&info.parent)
                    .ok_or(LoopOptError::UnknownLoop(info.head))?
            };
            let new_head = *old_new
                .get(&info.head)
                .ok_or(LoopOptError::CloneMissing(info.head))?;
            let new_tail = old_new.get(&info.tail).copied().unwrap_or(NodeId::INVALID);
            let id = self.tree.add_loop(new_head, new_tail, parent);
            loop_map.insert(lid, id);
        }

        // Control first, by dominator depth, so every clone's idom already
        // has its depth when the clone is placed.
        let mut cfg: Vec<NodeId> = body
            .iter()
            .copied()
            .filter(|&n| self.graph.is_cfg(n))
            .collect();
        cfg.sort_by_key(|&n| self.dom_depth(n));
        for n in cfg {
            let clone = old_new[&n];
            let l = loop_map
                .get(&self.tree.loop_of(n))
                .copied()
                .ok_or(LoopOptError::UnknownLoop(n))?;
            let idom = self.idom(n);
            let new_idom = old_new.get(&idom).copied().unwrap_or(side_by_side_idom);
            self.register_control(clone, l, new_idom);
        }

        let data: Vec<NodeId> = body.iter().copied().filter(|&n| !self.graph.is_cfg(n)).collect();
        for n in data {
            let clone = old_new[&n];
            let c = self.get_ctrl(n);
            let new_c = old_new.get(&c).copied().unwrap_or(c);
            self.register_new_node(clone, new_c);
        }
        Ok(())
    }

    /// Merge each projection leaving the loop with its clone. Returns the
    /// new regions keyed by the original projection.
    fn merge_loop_exits(
        &mut self,
        body: &[NodeId],
        in_body: &BitSet,
        old_new: &OldNew,
        entry_idom: NodeId,
    ) -> Result<FxHashMap<NodeId, NodeId>> {
        let mut exits: Vec<NodeId> = Vec::new();
        for &n in body.iter().filter(|&&n| self.graph.is_cfg(n)) {
            for succ in self.graph.cfg_succs(n) {
                if in_body.contains(succ.as_usize()) {
                    continue;
                }
                if !self.graph.op(succ).is_if_proj() {
                    return Err(LoopOptError::UnsupportedLoopExit(succ));
                }
                if !exits.contains(&succ) {
                    exits.push(succ);
                }
            }
        }

        let mut regions = FxHashMap::default();
        for exit in exits {
            let iff = self.graph.input(exit, 0);
            let new_iff = *old_new.get(&iff).ok_or(LoopOptError::CloneMissing(iff))?;
            let new_exit = self.graph.clone_node(exit);
            self.graph.replace_input(new_exit, 0, new_iff);
            let region = self.graph.region(&[exit, new_exit]);
            self.graph.replace_uses_except(exit, region, region);

            let l = self.get_loop(exit);
            self.register_control(new_exit, l, new_iff);
            self.register_control(region, l, entry_idom);
            trace!(target: "loopopts", "exit {exit:?} merged with {new_exit:?} at {region:?}");
            regions.insert(exit, region);
        }
        Ok(regions)
    }

    /// Route uses after the loop of values defined inside it through phis
    /// at the exit regions.
    fn merge_data_uses(
        &mut self,
        body: &[NodeId],
        in_body: &BitSet,
        old_new: &OldNew,
        exits: &FxHashMap<NodeId, NodeId>,
        first: u32,
    ) -> Result<()> {
        let merge_regions: FxHashMap<NodeId, NodeId> =
            exits.values().map(|&r| (r, r)).collect();
        let mut phis: FxHashMap<(NodeId, NodeId), NodeId> = FxHashMap::default();

        let defs: Vec<NodeId> = body.iter().copied().filter(|&n| !self.graph.is_cfg(n)).collect();
        for def in defs {
            let mut users: Vec<NodeId> = self.graph.uses(def).to_vec();
            users.sort_unstable();
            users.dedup();
            for user in users {
                if user.index() >= first
                    || in_body.contains(user.as_usize())
                    || self.graph.is_dead(user)
                {
                    continue;
                }
                for i in 0..self.graph.req(user) {
                    if self.graph.input(user, i) != def {
                        continue;
                    }
                    let use_ctrl = self.use_ctrl(user, i);
                    let region = self.find_exit_region(use_ctrl, exits, &merge_regions)?;
                    let phi = match phis.get(&(def, region)) {
                        Some(&phi) => phi,
                        None => {
                            let clone = *old_new.get(&def).ok_or(LoopOptError::CloneMissing(def))?;
                            let ty = self.graph.node(def).ty;
                            let phi = self.graph.phi(region, &[def, clone], ty);
                            self.register_new_node(phi, region);
                            phis.insert((def, region), phi);
                            phi
                        }
                    };
                    self.graph.replace_input(user, i, phi);
                }
            }
        }
        Ok(())
    }

    /// Control at which input `i` of `user` is needed.
    fn use_ctrl(&self, user: NodeId, i: usize) -> NodeId {
        let node = self.graph.node(user);
        if node.op == Operator::Phi {
            self.graph.input(node.input(0), i)
        } else if node.is_cfg() {
            node.input(0)
        } else {
            self.get_ctrl(user)
        }
    }

    fn find_exit_region(
        &self,
        use_ctrl: NodeId,
        exits: &FxHashMap<NodeId, NodeId>,
        merge_regions: &FxHashMap<NodeId, NodeId>,
    ) -> Result<NodeId> {
        let mut c = use_ctrl;
        while c.is_valid() {
            if let Some(&r) = merge_regions.get(&c).or_else(|| exits.get(&c)) {
                return Ok(r);
            }
            c = self.idom(c);
        }
        Err(LoopOptError::UnsupportedLoopExit(use_ctrl))
    }

    /// The loop head whose entry edge the predicates of `head` hang off.
    pub fn entry_head(&self, head: NodeId) -> NodeId {
        skip_strip_mined(self.graph, head)
    }

    /// Control entering the predicates of loop head `head`.
    pub fn loop_entry(&self, head: NodeId) -> NodeId {
        self.graph.input(self.entry_head(head), 1)
    }
}

impl std::fmt::Debug for LoopOptimizer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopOptimizer")
            .field("loops", &self.tree.len())
            .field("worklist", &self.worklist.len())
            .field("major_progress", &self.major_progress)
            .field("nodes_required", &self.nodes_required)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{DiamondKind, LoopGraphBuilder};

    #[test]
    fn test_budget_accounting() {
        let (mut g, _) = LoopGraphBuilder::new().build();
        let config = LoopOptsConfig {
            max_node_limit: g.live_nodes() + 200,
            ..Default::default()
        };
        let mut opt = LoopOptimizer::new(&mut g, config);

        assert!(!opt.exceeding_node_budget(100));
        assert!(opt.may_require_nodes(10));
        // The reserve is charged even for small requests.
        assert!(opt.exceeding_node_budget(61));
        assert!(!opt.exceeding_node_budget(60));
        assert!(!opt.may_require_nodes(200));
        opt.require_nodes_begin();
        assert!(!opt.exceeding_node_budget(100));
    }

    #[test]
    fn test_est_loop_clone_sz_grows_with_factor() {
        let (mut g, shape) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        let opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        let one = opt.est_loop_clone_sz(l, 1);
        let two = opt.est_loop_clone_sz(l, 2);
        assert!(two > one);
        assert!(one > opt.tree().get(l).body.len());
    }

    #[test]
    fn test_clone_loop_merges_exits() {
        let (mut g, shape) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        let entry = opt.loop_entry(shape.head);
        let first = opt.graph().unique();

        let old_new = opt
            .clone_loop(l, CloneLoopMode::CloneIncludesStripMined, entry)
            .unwrap();

        let head_clone = old_new[&shape.head];
        assert!(head_clone.index() >= first);
        assert!(opt.graph().op(head_clone).is_loop());
        assert_eq!(opt.graph().input(head_clone, 1), entry);
        // The clone's backedge is the cloned backedge.
        assert_eq!(opt.graph().input(head_clone, 2), old_new[&opt.graph().input(shape.head, 2)]);
        let iv_clone = opt.graph().node(head_clone).loop_head().unwrap().iv;
        assert_eq!(iv_clone, old_new[&shape.iv]);

        // The returned value now merges both loops.
        let ret_value = opt.graph().input(shape.ret, 1);
        assert_eq!(opt.graph().op(ret_value), Operator::Phi);
        assert_eq!(opt.graph().input(ret_value, 1), shape.incr);
        assert_eq!(opt.graph().input(ret_value, 2), old_new[&shape.incr]);
        let region = opt.graph().input(shape.ret, 0);
        assert_eq!(opt.graph().input(ret_value, 0), region);
        assert_eq!(opt.graph().req(region), 3);
        assert!(opt.graph().verify().is_ok());
    }

    #[test]
    fn test_clone_loop_registers_clone_loop() {
        let (mut g, shape) = LoopGraphBuilder::new().strip_mined().build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        let loops_before = opt.tree().len();
        let entry = opt.loop_entry(shape.head);

        let old_new = opt
            .clone_loop(l, CloneLoopMode::CloneIncludesStripMined, entry)
            .unwrap();

        // Outer and inner loop are both mirrored.
        assert_eq!(opt.tree().len(), loops_before + 2);
        assert!(old_new.contains_key(&shape.outer_head));
        let inner_clone = opt.tree().loop_for_head(old_new[&shape.head]).unwrap();
        let outer_clone = opt.tree().loop_for_head(old_new[&shape.outer_head]).unwrap();
        assert_eq!(opt.tree().get(inner_clone).parent, outer_clone);
        assert_eq!(opt.entry_head(old_new[&shape.head]), old_new[&shape.outer_head]);
    }

    #[test]
    fn test_dominated_by_hardwires_test() {
        let (mut g, shape) = LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .check_cast()
            .build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let d = shape.diamonds[0];
        let cast = shape.check_cast;
        let cond = opt.graph().input(d.iff, 1);
        let entry = opt.loop_entry(shape.head);
        let sel = opt.graph_mut().if_node(
            crate::ir::IfKind::Plain,
            entry,
            cond,
            crate::ir::BranchProfile::UNKNOWN,
        );
        let sel_true = opt.graph_mut().if_true(sel);
        let l = opt.get_loop(entry);
        opt.register_control(sel, l, entry);
        opt.register_control(sel_true, l, sel);

        opt.dominated_by(sel_true, d.iff).unwrap();

        let con = opt.graph().input(d.iff, 1);
        assert_eq!(opt.graph().find_int_con(con), Some(1));
        assert_eq!(opt.graph().input(cast, 0), sel_true);
        assert!(opt.worklist_mut().contains(d.iff));
    }
}
