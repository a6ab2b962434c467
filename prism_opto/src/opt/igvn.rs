//! Iterative global value numbering, reduced to the cleanup loop
//! optimizations depend on.
//!
//! Transforms mark nodes for cleanup by pushing them on a [`Worklist`].
//! [`Igvn::optimize`] then folds and sweeps until the worklist is empty:
//!
//! - `If` nodes with a constant condition keep their live projection
//!   (replaced by the `If`'s control) and drop the dead one
//! - useless Parse Predicates fold as if their condition were true; live
//!   Parse Predicates are never folded, even though their condition is `1`
//! - useless Template Assertion Predicates are bypassed
//! - dead control propagates: regions drop dead inputs and collapse, loops
//!   lose their backedge or die with their entry, `Root` drops dead terminators
//! - data nodes with a dead input die; unused data nodes without side
//!   effects are swept

use log::trace;

use super::OptimizationPass;
use crate::error::Result;
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, IfKind, Operator};

// =============================================================================
// Worklist
// =============================================================================

/// Deduplicating stack of nodes to revisit.
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    items: Vec<NodeId>,
    queued: BitSet,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: NodeId) {
        if n.is_valid() && self.queued.insert(n.as_usize()) {
            self.items.push(n);
        }
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        let n = self.items.pop()?;
        self.queued.remove(n.as_usize());
        Some(n)
    }

    pub fn contains(&self, n: NodeId) -> bool {
        n.is_valid() && self.queued.contains(n.as_usize())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// IGVN
// =============================================================================

/// Worklist-driven graph cleanup.
#[derive(Debug, Default)]
pub struct Igvn {
    /// Nodes removed over the lifetime of this pass.
    removed: usize,
}

impl Igvn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Process `worklist` until empty. Returns whether anything changed.
    pub fn optimize(&mut self, graph: &mut Graph, worklist: &mut Worklist) -> bool {
        let live_before = graph.live_nodes();
        let mut changed = false;
        while let Some(n) = worklist.pop() {
            if graph.is_dead(n) {
                continue;
            }
            changed |= transform(graph, worklist, n);
        }
        self.removed += live_before.saturating_sub(graph.live_nodes());
        changed
    }
}

impl OptimizationPass for Igvn {
    fn name(&self) -> &'static str {
        "Igvn"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<bool> {
        let mut worklist = Worklist::new();
        let ids: Vec<NodeId> = graph.ids().collect();
        for n in ids.into_iter().rev() {
            worklist.push(n);
        }
        Ok(self.optimize(graph, &mut worklist))
    }
}

// =============================================================================
// Transformations
// =============================================================================

fn transform(graph: &mut Graph, worklist: &mut Worklist, n: NodeId) -> bool {
    let op = graph.op(n);
    match op {
        Operator::Control(ControlOp::Start) => false,
        Operator::Control(ControlOp::Root) => remove_dead_inputs(graph, worklist, n, 1),
        Operator::Control(ControlOp::Region) => transform_region(graph, worklist, n),
        Operator::Control(ControlOp::Loop(_)) => transform_loop(graph, worklist, n),
        Operator::Control(_) if input_is_dead(graph, n, 0) => {
            kill_node(graph, worklist, n);
            true
        }
        Operator::Control(ControlOp::If(kind)) => transform_if(graph, worklist, n, kind),
        Operator::Control(ControlOp::TemplateAssertionPredicate) if graph.node(n).is_useless() => {
            trace!(target: "loopopts", "IGVN: removing useless template {n:?}");
            let ctrl = graph.input(n, 0);
            replace_and_kill(graph, worklist, n, ctrl);
            true
        }
        Operator::Control(_) => false,
        Operator::Phi => {
            if input_is_dead(graph, n, 0) {
                kill_node(graph, worklist, n);
                return true;
            }
            sweep_if_unused(graph, worklist, n)
        }
        _ => {
            let dead_input = (0..graph.req(n)).any(|i| input_is_dead(graph, n, i));
            if dead_input {
                kill_node(graph, worklist, n);
                return true;
            }
            sweep_if_unused(graph, worklist, n)
        }
    }
}

/// Input `i` is set but points at a dead node. Unset slots are not dead.
fn input_is_dead(graph: &Graph, n: NodeId, i: usize) -> bool {
    let input = graph.input(n, i);
    if i == 0 && graph.is_cfg(n) && !matches!(graph.op(n), Operator::Control(ControlOp::Start)) {
        return graph.is_dead(input);
    }
    input.is_valid() && graph.is_dead(input)
}

fn transform_if(
    graph: &mut Graph,
    worklist: &mut Worklist,
    iff: NodeId,
    kind: IfKind,
) -> bool {
    let cond = if matches!(kind, IfKind::ParsePredicate(_)) {
        if !graph.node(iff).is_useless() {
            return false;
        }
        trace!(target: "loopopts", "IGVN: removing useless parse predicate {iff:?}");
        1
    } else {
        match graph.find_int_con(graph.input(iff, 1)) {
            Some(c) => c,
            None => return false,
        }
    };

    let live = graph.proj_out(iff, cond != 0);
    let dead = graph.proj_out(iff, cond == 0);
    let ctrl = graph.input(iff, 0);

    if let Some(dead) = dead {
        kill_node(graph, worklist, dead);
    }
    if let Some(live) = live {
        replace_and_kill(graph, worklist, live, ctrl);
    }
    kill_node(graph, worklist, iff);
    true
}

fn transform_region(graph: &mut Graph, worklist: &mut Worklist, region: NodeId) -> bool {
    let mut changed = false;
    let mut i = 1;
    while i < graph.req(region) {
        let pred = graph.input(region, i);
        if graph.is_dead(pred) {
            let phis: Vec<NodeId> = phis_of(graph, region);
            for phi in phis {
                if i < graph.req(phi) {
                    graph.remove_input(phi, i);
                    worklist.push(phi);
                }
            }
            graph.remove_input(region, i);
            changed = true;
        } else {
            i += 1;
        }
    }

    match graph.req(region) {
        1 => {
            for phi in phis_of(graph, region) {
                kill_node(graph, worklist, phi);
            }
            kill_node(graph, worklist, region);
            true
        }
        2 => {
            let pred = graph.input(region, 1);
            for phi in phis_of(graph, region) {
                let value = graph.input(phi, 1);
                replace_and_kill(graph, worklist, phi, value);
            }
            replace_and_kill(graph, worklist, region, pred);
            true
        }
        _ => changed,
    }
}

fn transform_loop(graph: &mut Graph, worklist: &mut Worklist, head: NodeId) -> bool {
    if input_is_dead(graph, head, 1) || !graph.input(head, 1).is_valid() {
        for phi in phis_of(graph, head) {
            kill_node(graph, worklist, phi);
        }
        kill_node(graph, worklist, head);
        return true;
    }
    if input_is_dead(graph, head, 2) {
        trace!(target: "loopopts", "IGVN: loop {head:?} lost its backedge");
        let entry = graph.input(head, 1);
        for phi in phis_of(graph, head) {
            let value = graph.input(phi, 1);
            replace_and_kill(graph, worklist, phi, value);
        }
        replace_and_kill(graph, worklist, head, entry);
        return true;
    }
    false
}

fn remove_dead_inputs(graph: &mut Graph, worklist: &mut Worklist, n: NodeId, from: usize) -> bool {
    let mut changed = false;
    let mut i = from;
    while i < graph.req(n) {
        if graph.is_dead(graph.input(n, i)) {
            graph.remove_input(n, i);
            changed = true;
        } else {
            i += 1;
        }
    }
    if changed {
        worklist.push(n);
    }
    changed
}

fn sweep_if_unused(graph: &mut Graph, worklist: &mut Worklist, n: NodeId) -> bool {
    if graph.outcnt(n) == 0 && !graph.op(n).has_side_effect() {
        kill_node(graph, worklist, n);
        true
    } else {
        false
    }
}

fn phis_of(graph: &Graph, region: NodeId) -> Vec<NodeId> {
    let mut phis: Vec<NodeId> = graph
        .uses(region)
        .iter()
        .copied()
        .filter(|&u| graph.op(u) == Operator::Phi && graph.input(u, 0) == region)
        .collect();
    phis.sort_unstable();
    phis.dedup();
    phis
}

/// Kill `n`, queueing its inputs (they may lose their last use) and its
/// users (they now have a dead input).
fn kill_node(graph: &mut Graph, worklist: &mut Worklist, n: NodeId) {
    if graph.is_dead(n) {
        return;
    }
    for &input in graph.inputs(n) {
        worklist.push(input);
    }
    for &user in graph.uses(n) {
        worklist.push(user);
    }
    graph.kill(n);
}

/// Rewire the users of `old` to `new` and kill `old`.
fn replace_and_kill(graph: &mut Graph, worklist: &mut Worklist, old: NodeId, new: NodeId) {
    for &user in graph.uses(old) {
        worklist.push(user);
    }
    graph.replace_all_uses(old, new);
    worklist.push(new);
    kill_node(graph, worklist, old);
}

// =============================================================================
// Tests
// =============================================================================
