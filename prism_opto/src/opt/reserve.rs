//! Reserved loop copies for speculative transformations.
//!
//! [`CountedLoopReserveKit`] clones a counted loop behind `If(1)`: the
//! original loop on the true side is transformed, the reserved copy on the
//! false side stays untouched. If the transformation is not committed with
//! [`CountedLoopReserveKit::use_new`], dropping the kit flips the selector
//! to `If(0)` and IGVN removes the transformed loop instead.
//!
//! ```text
//!          If(1)                      If(0) on revert
//!         /     \
//!   transformed   reserved
//!      loop         loop
//! ```

use log::debug;

use crate::error::{LoopOptError, Result};
use crate::ir::loops::{counted_loop_info, LoopId};
use crate::ir::node::{BranchProfile, LoopFlags, NodeId};
use crate::ir::operators::{ControlOp, IfKind, Operator};
use crate::opt::phase::{CloneLoopMode, LoopOptimizer};

/// Guard around a speculative transformation of one counted loop.
pub struct CountedLoopReserveKit<'o, 'g> {
    opt: &'o mut LoopOptimizer<'g>,
    head: NodeId,
    /// Selector between the transformed and the reserved loop.
    iff: NodeId,
    reserved: NodeId,
    has_reserved: bool,
    use_new: bool,
    active: bool,
}

impl<'o, 'g> CountedLoopReserveKit<'o, 'g> {
    /// Reserve a copy of loop `l` if `active` and the loop qualifies: a
    /// valid counted loop that is a main loop, or a post loop marked for
    /// vectorization.
    pub fn create_reserve(opt: &'o mut LoopOptimizer<'g>, l: LoopId, active: bool) -> Result<Self> {
        let head = opt.tree().get(l).head;
        let mut kit = Self {
            opt,
            head,
            iff: NodeId::INVALID,
            reserved: NodeId::INVALID,
            has_reserved: false,
            use_new: false,
            active,
        };
        if active && kit.qualifies() {
            kit.reserve(l)?;
        }
        Ok(kit)
    }

    fn qualifies(&self) -> bool {
        let g = self.opt.graph();
        if counted_loop_info(g, self.head).is_none() {
            return false;
        }
        let Some(info) = g.node(self.head).loop_head() else {
            return false;
        };
        info.flags.contains(LoopFlags::MAIN)
            || info.flags.contains(LoopFlags::POST | LoopFlags::VECTORIZED_POST)
    }

    fn reserve(&mut self, l: LoopId) -> Result<()> {
        let opt = &mut *self.opt;
        let head = self.head;
        let entry = opt.graph().input(head, 1);
        let outer = opt.get_loop(entry);

        let one = opt.graph_mut().con_i(1);
        let iff = opt
            .graph_mut()
            .if_node(IfKind::Plain, entry, one, BranchProfile::ALWAYS);
        opt.register_control(iff, outer, entry);
        let fast = opt.graph_mut().if_true(iff);
        opt.register_control(fast, outer, iff);
        let slow = opt.graph_mut().if_false(iff);
        opt.register_control(slow, outer, iff);

        let old_new = opt.clone_loop(l, CloneLoopMode::IgnoreStripMined, iff)?;
        let reserved = *old_new.get(&head).ok_or(LoopOptError::CloneMissing(head))?;
        opt.replace_loop_entry(head, fast);
        opt.replace_loop_entry(reserved, slow);
        opt.recompute_dom_depth();

        self.iff = iff;
        self.reserved = reserved;
        self.has_reserved = self.reserve_is_wired();
        debug!(
            target: "loopopts",
            "loop {head:?} reserved as {reserved:?} behind {iff:?}: {}",
            self.has_reserved
        );
        Ok(())
    }

    /// The reserved loop hangs off the false projection of the selector,
    /// whose condition is a constant.
    fn reserve_is_wired(&self) -> bool {
        let g = self.opt.graph();
        if counted_loop_info(g, self.reserved).is_none() {
            return false;
        }
        let slow = g.input(self.reserved, 1);
        if g.op(slow) != Operator::Control(ControlOp::IfFalse) {
            return false;
        }
        let iff = g.input(slow, 0);
        iff == self.iff && g.op(g.input(iff, 1)).con_i().is_some()
    }

    /// Commit to the transformed loop.
    pub fn use_new(&mut self) {
        self.use_new = true;
    }

    pub fn has_reserved(&self) -> bool {
        self.has_reserved
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Head of the reserved copy, `INVALID` if none was made.
    pub fn reserved_head(&self) -> NodeId {
        self.reserved
    }

    pub fn selector(&self) -> NodeId {
        self.iff
    }

    /// The optimizer, for transforming the loop while the kit is held.
    pub fn optimizer(&mut self) -> &mut LoopOptimizer<'g> {
        &mut *self.opt
    }
}

impl Drop for CountedLoopReserveKit<'_, '_> {
    fn drop(&mut self) {
        if !self.active || !self.has_reserved || self.use_new {
            return;
        }
        debug!(target: "loopopts", "loop {:?} reverted to reserved copy {:?}", self.head, self.reserved);
        let zero = self.opt.graph_mut().con_i(0);
        self.opt.graph_mut().replace_input(self.iff, 1, zero);
        self.opt.worklist_mut().push(self.iff);
    }
}

impl std::fmt::Debug for CountedLoopReserveKit<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountedLoopReserveKit")
            .field("head", &self.head)
            .field("iff", &self.iff)
            .field("reserved", &self.reserved)
            .field("has_reserved", &self.has_reserved)
            .field("use_new", &self.use_new)
            .field("active", &self.active)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
