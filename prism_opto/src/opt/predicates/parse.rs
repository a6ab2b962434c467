//! Cloning Parse Predicates to new loops.

use log::debug;

use super::model::{ParsePredicate, Predicate};
use crate::error::{LoopOptError, Result};
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, DeoptReason, Operator};
use crate::opt::phase::LoopOptimizer;

/// The uncommon trap reached from the failing projection next to
/// `success_proj`, directly or through a shared region.
fn uncommon_trap_of(opt: &LoopOptimizer<'_>, success_proj: NodeId) -> Option<NodeId> {
    let g = opt.graph();
    let fail = g.other_proj(success_proj)?;
    let mut c = g.unique_ctrl_out(fail)?;
    if g.op(c) == Operator::Control(ControlOp::Region) {
        c = g.unique_ctrl_out(c)?;
    }
    matches!(g.op(c), Operator::Control(ControlOp::UncommonTrap(_))).then_some(c)
}

/// Clone the `If` of `old_success_proj` to `new_entry` together with a new
/// uncommon trap for `reason`. Returns the new success projection.
///
/// The trap of the slow loop uses the frame of the original trap; the trap
/// of the fast loop gets a copy of it.
pub fn create_new_if_for_predicate(
    opt: &mut LoopOptimizer<'_>,
    old_success_proj: NodeId,
    new_entry: NodeId,
    reason: DeoptReason,
    slow_loop: bool,
) -> Result<NodeId> {
    let old_trap = uncommon_trap_of(opt, old_success_proj).ok_or(LoopOptError::MalformedPredicate {
        node: old_success_proj,
        reason: "predicate does not reach an uncommon trap",
    })?;
    let iff = opt.graph().input(old_success_proj, 0);
    let old_frame = opt.graph().input(old_trap, 1);
    let l = opt.get_loop(new_entry);

    let new_iff = opt.graph_mut().clone_node(iff);
    opt.graph_mut().replace_input(new_iff, 0, new_entry);
    opt.register_control(new_iff, l, new_entry);
    let success = opt.graph_mut().if_true(new_iff);
    opt.register_control(success, l, new_iff);
    let fail = opt.graph_mut().if_false(new_iff);
    opt.register_control(fail, l, new_iff);

    let frame = if slow_loop {
        old_frame
    } else {
        let start = opt.graph().start;
        opt.clone_and_register(old_frame, start)
    };
    let trap = opt.graph_mut().uncommon_trap(fail, reason, frame);
    opt.register_control(trap, l, fail);
    Ok(success)
}

impl ParsePredicate {
    /// Clone this Parse Predicate to `new_entry` of the fast or slow loop
    /// created by unswitching.
    pub fn clone_to_unswitched_loop(
        &self,
        opt: &mut LoopOptimizer<'_>,
        new_entry: NodeId,
        slow_loop: bool,
    ) -> Result<ParsePredicate> {
        let success =
            create_new_if_for_predicate(opt, self.tail(), new_entry, self.reason(), slow_loop)?;
        debug!(
            target: "loopopts",
            "parse predicate {:?} ({}) cloned to {} loop as {:?}",
            self.head(),
            self.reason(),
            if slow_loop { "slow" } else { "fast" },
            opt.graph().input(success, 0)
        );
        ParsePredicate::new(opt.graph(), success, self.reason()).ok_or(
            LoopOptError::MalformedPredicate {
                node: success,
                reason: "clone of a parse predicate is not a parse predicate",
            },
        )
    }

    /// Mark useless; IGVN removes it.
    pub fn kill(&self, opt: &mut LoopOptimizer<'_>) {
        self.mark_useless(opt.graph_mut());
        opt.worklist_mut().push(self.head());
    }

    pub fn as_predicate(&self) -> Predicate {
        Predicate::Parse(*self)
    }
}

// =============================================================================
// Tests
// =============================================================================
