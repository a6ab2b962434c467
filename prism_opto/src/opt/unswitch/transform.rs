//! The unswitching transformation.
//!
//! ```text
//!        [Predicates]                    [Runtime Predicates]
//!             |                                   |
//!           Loop                          If(invariant) selector
//!          /    \                           /             \
//!   If(invariant) ...    ==>         [Predicates]      [Predicates]
//!      /     \                             |                 |
//!    ...     ...                       fast Loop         slow Loop
//!                                   If(true) in body  If(false) in body
//! ```
//!
//! The original loop becomes the fast loop on the true projection of the
//! selector, its clone the slow loop on the false projection. Parse and
//! Template Assertion Predicates are cloned to both loops; Runtime
//! Predicates stay above the selector and guard both.

use log::{debug, trace};

use crate::error::{LoopOptError, Result};
use crate::ir::loops::{is_counted_loop, LoopId};
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, IfKind, Operator};
use crate::opt::phase::{CloneLoopMode, LoopOptimizer, OldNew};
use crate::opt::predicates::{
    NodeInTargetLoop, OpaqueLoopTransform, Predicate, PredicateChain, Predicates,
    PredicatesForLoop,
};

// =============================================================================
// Selector
// =============================================================================

/// The `If` above both loop versions that picks one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnswitchedLoopSelector {
    pub iff: NodeId,
    /// True projection, entering the fast loop.
    pub fast: NodeId,
    /// False projection, entering the slow loop.
    pub slow: NodeId,
}

impl UnswitchedLoopSelector {
    /// Create the selector at `entry` with the condition and profile of
    /// `unswitch_iff`.
    fn new(opt: &mut LoopOptimizer<'_>, unswitch_iff: NodeId, entry: NodeId) -> Self {
        let g = opt.graph();
        let kind = match g.op(unswitch_iff) {
            Operator::Control(ControlOp::If(IfKind::RangeCheck)) => IfKind::RangeCheck,
            _ => IfKind::Plain,
        };
        let cond = g.input(unswitch_iff, 1);
        let profile = g.node(unswitch_iff).profile();
        let l = opt.get_loop(entry);

        let iff = opt.graph_mut().if_node(kind, entry, cond, profile);
        opt.register_control(iff, l, entry);
        let fast = opt.graph_mut().if_true(iff);
        opt.register_control(fast, l, iff);
        let slow = opt.graph_mut().if_false(iff);
        opt.register_control(slow, l, iff);
        Self { iff, fast, slow }
    }
}

/// Outcome of unswitching one loop.
#[derive(Debug, Clone)]
pub struct UnswitchResult {
    pub selector: UnswitchedLoopSelector,
    /// Head of the fast loop (the original loop).
    pub fast_head: NodeId,
    /// Head of the slow loop (the clone).
    pub slow_head: NodeId,
    /// Original nodes of the loop to their slow-loop clones.
    pub old_new: OldNew,
    /// Parse Predicates cloned, counted once per source predicate.
    pub parse_predicates_cloned: usize,
    /// Template Assertion Predicates cloned, counted once per source template.
    pub templates_cloned: usize,
    pub casts_hoisted: usize,
}

// =============================================================================
// Unswitching
// =============================================================================

impl LoopOptimizer<'_> {
    /// Unswitch loop `l` on its invariant test. Callers must have checked
    /// [`LoopOptimizer::policy_unswitching`].
    pub fn do_unswitching(&mut self, l: LoopId) -> Result<UnswitchResult> {
        let head = self.tree().get(l).head;
        if is_counted_loop(self.graph(), head) {
            if let Some(h) = self.graph_mut().node_mut(head).loop_head_mut() {
                if !h.is_normal_loop() {
                    h.set_normal_loop();
                }
            }
        }
        let unswitch_iff = self
            .find_unswitching_candidate(l)
            .ok_or(LoopOptError::NoUnswitchingCandidate(head))?;
        let count = self
            .graph()
            .node(head)
            .loop_head()
            .ok_or(LoopOptError::NotALoop(head))?
            .unswitch_count;

        let mut result = self.create_slow_version_of_loop(l, unswitch_iff)?;

        let nct = count + 1;
        for h in [result.fast_head, result.slow_head] {
            if let Some(info) = self.graph_mut().node_mut(h).loop_head_mut() {
                info.unswitch_count = nct;
            }
        }
        debug!(
            target: "loopopts",
            "Unswitch {nct} loop {head:?} on {unswitch_iff:?}: slow loop {:?}",
            result.slow_head
        );

        result.casts_hoisted =
            self.hoist_invariant_check_casts(l, unswitch_iff, &result.selector, &result.old_new)?;

        // Hardwire the tests in the loops to the side their loop was
        // selected for.
        self.dominated_by(result.selector.fast, unswitch_iff)?;
        let unswitch_iff_clone = *result
            .old_new
            .get(&unswitch_iff)
            .ok_or(LoopOptError::CloneMissing(unswitch_iff))?;
        self.dominated_by(result.selector.slow, unswitch_iff_clone)?;

        for n in self.tree().subtree_body(l) {
            self.worklist_mut().push(n);
            if let Some(&clone) = result.old_new.get(&n) {
                self.worklist_mut().push(clone);
            }
        }
        self.set_major_progress();
        Ok(result)
    }

    /// Create the selector above loop `l` and a clone of the loop on its
    /// false projection, with the predicates of `l` cloned to both loops.
    pub fn create_slow_version_of_loop(
        &mut self,
        l: LoopId,
        unswitch_iff: NodeId,
    ) -> Result<UnswitchResult> {
        let head = self.tree().get(l).head;
        let entry_head = self.entry_head(head);
        let entry = self.graph().input(entry_head, 1);

        let selector = UnswitchedLoopSelector::new(self, unswitch_iff, entry);
        let first = self.graph().unique();
        let old_new = self.clone_loop(l, CloneLoopMode::CloneIncludesStripMined, selector.iff)?;
        let slow_head = *old_new.get(&head).ok_or(LoopOptError::CloneMissing(head))?;
        let slow_entry_head = *old_new
            .get(&entry_head)
            .ok_or(LoopOptError::CloneMissing(entry_head))?;

        self.replace_loop_entry(entry_head, selector.fast);
        self.replace_loop_entry(slow_entry_head, selector.slow);

        let (parse_predicates_cloned, templates_cloned) =
            self.clone_predicates_to_unswitched_loops(entry, head, slow_head, first, &old_new)?;
        self.recompute_dom_depth();

        if self.config().verify_predicates {
            self.verify_unswitched_predicates(head, selector.fast)?;
            self.verify_unswitched_predicates(slow_head, selector.slow)?;
        }

        Ok(UnswitchResult {
            selector,
            fast_head: head,
            slow_head,
            old_new,
            parse_predicates_cloned,
            templates_cloned,
            casts_hoisted: 0,
        })
    }

    /// Clone the Parse and Template Assertion Predicates above `entry` to
    /// the fast loop `fast_head` and the slow loop `slow_head`, then kill
    /// the originals. Templates are initialized on both loops right away.
    fn clone_predicates_to_unswitched_loops(
        &mut self,
        entry: NodeId,
        fast_head: NodeId,
        slow_head: NodeId,
        first: u32,
        old_new: &OldNew,
    ) -> Result<(usize, usize)> {
        let clone_parse_predicates = self.can_clone_parse_predicates(entry, first);
        if !clone_parse_predicates {
            debug!(target: "loopopts", "parse predicates above {entry:?} not cloned: data dependencies at loop entry");
        }

        let mut fast_chain = PredicateChain::new(self.graph(), fast_head);
        let mut slow_chain = PredicateChain::new(self.graph(), slow_head);
        let in_fast = NodeInTargetLoop::Original { first, old_new };
        let in_slow = NodeInTargetLoop::Cloned { first };
        let mut parse_predicates = 0;
        let mut templates = 0;

        let walk = PredicatesForLoop::new(entry, self.config());
        walk.for_each(self, |opt, p| {
            match p {
                Predicate::Parse(pp) if clone_parse_predicates && !pp.is_useless(opt.graph()) => {
                    let slow_entry = slow_chain.entry(opt.graph());
                    let slow_pp = pp.clone_to_unswitched_loop(opt, slow_entry, true)?;
                    slow_chain.insert_new_predicate(opt, Predicate::Parse(slow_pp));
                    let fast_entry = fast_chain.entry(opt.graph());
                    let fast_pp = pp.clone_to_unswitched_loop(opt, fast_entry, false)?;
                    fast_chain.insert_new_predicate(opt, Predicate::Parse(fast_pp));
                    pp.kill(opt);
                    parse_predicates += 1;
                }
                Predicate::TemplateAssertion(t) if !t.is_useless(opt.graph()) => {
                    let slow_ctrl = slow_chain.entry(opt.graph());
                    let slow_t = t.clone_to(opt, slow_ctrl, OpaqueLoopTransform::Clone, &in_slow)?;
                    slow_chain.insert_new_predicate(opt, Predicate::TemplateAssertion(slow_t));
                    slow_t.initialize(opt, &mut slow_chain)?;
                    let fast_ctrl = fast_chain.entry(opt.graph());
                    let fast_t = t.clone_to(opt, fast_ctrl, OpaqueLoopTransform::Clone, &in_fast)?;
                    fast_chain.insert_new_predicate(opt, Predicate::TemplateAssertion(fast_t));
                    fast_t.initialize(opt, &mut fast_chain)?;
                    trace!(
                        target: "loopopts",
                        "template {:?} cloned to fast {:?} and slow {:?}",
                        t.head(),
                        fast_t.head(),
                        slow_t.head()
                    );
                    t.kill(opt);
                    templates += 1;
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok((parse_predicates, templates))
    }

    /// Data nodes pinned at the old loop entry must be split evenly between
    /// the two loops: as many slow-loop nodes as fast-loop nodes among the
    /// outputs besides the selector.
    fn can_clone_parse_predicates(&self, entry: NodeId, first: u32) -> bool {
        let g = self.graph();
        let outcnt = g.outcnt(entry);
        if outcnt <= 1 {
            return true;
        }
        let slow_count = g.uses(entry).iter().filter(|u| u.index() >= first).count();
        slow_count * 2 == outcnt - 1
    }

    fn verify_unswitched_predicates(&self, head: NodeId, expected: NodeId) -> Result<()> {
        let predicates = Predicates::new(self.graph(), self.loop_entry(head));
        predicates.verify(self.graph())?;
        let found = predicates.entry();
        if found != expected {
            return Err(LoopOptError::SelectorNotReached {
                head,
                found,
                expected,
            });
        }
        Ok(())
    }

    /// Move `CheckCastPP`s of invariant values under the projections of
    /// `unswitch_iff` to the matching projection of the selector, for both
    /// loops.
    fn hoist_invariant_check_casts(
        &mut self,
        l: LoopId,
        unswitch_iff: NodeId,
        selector: &UnswitchedLoopSelector,
        old_new: &OldNew,
    ) -> Result<usize> {
        let mut hoisted = 0;
        for (on_true, invar_proj) in [(true, selector.fast), (false, selector.slow)] {
            let Some(proj) = self.graph().proj_out(unswitch_iff, on_true) else {
                continue;
            };
            let mut casts: Vec<NodeId> = self
                .graph()
                .uses(proj)
                .iter()
                .copied()
                .filter(|&u| {
                    let g = self.graph();
                    !g.is_dead(u)
                        && g.op(u) == Operator::CheckCastPP
                        && self.is_invariant(l, g.input(u, 1))
                })
                .collect();
            casts.sort_unstable();
            casts.dedup();
            for cast in casts {
                let cast_clone = *old_new.get(&cast).ok_or(LoopOptError::CloneMissing(cast))?;
                let nuse = self.graph_mut().clone_node(cast);
                self.graph_mut().replace_input(nuse, 0, invar_proj);
                self.register_new_node(nuse, invar_proj);
                self.graph_mut().replace_input(cast, 1, nuse);
                self.graph_mut().replace_input(cast_clone, 1, nuse);
                self.worklist_mut().push(cast);
                self.worklist_mut().push(cast_clone);
                trace!(target: "loopopts", "cast {cast:?} hoisted to {invar_proj:?} as {nuse:?}");
                hoisted += 1;
            }
        }
        Ok(hoisted)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{DiamondKind, LoopGraphBuilder};
    use crate::ir::operators::DeoptReason;
    use crate::ir::LoopFlags;
    use crate::opt::config::LoopOptsConfig;

    fn unswitch(builder: LoopGraphBuilder) -> (crate::ir::Graph, crate::ir::LoopShape, UnswitchResult) {
        let (mut g, shape) = builder.build();
        let result = {
            let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
            let l = opt.tree().loop_for_head(shape.head).unwrap();
            assert!(opt.policy_unswitching(l));
            let result = opt.do_unswitching(l).unwrap();
            assert!(opt.major_progress());
            result
        };
        (g, shape, result)
    }

    #[test]
    fn test_selector_sits_between_loops() {
        let (g, shape, r) = unswitch(LoopGraphBuilder::new().diamond(DiamondKind::Invariant));
        let cond = g.input(r.selector.iff, 1);
        assert!(g.op(cond).is_bool());
        assert_eq!(g.input(g.input(cond, 1), 1), shape.flag);
        assert_eq!(g.input(shape.head, 1), r.selector.fast);
        assert_eq!(g.input(r.slow_head, 1), r.selector.slow);
        assert_eq!(g.op(r.selector.iff), Operator::Control(ControlOp::If(IfKind::Plain)));
        assert_eq!(r.parse_predicates_cloned, 0);
        assert_eq!(r.templates_cloned, 0);
    }

    #[test]
    fn test_counts_and_hardwiring() {
        let (g, shape, r) = unswitch(
            LoopGraphBuilder::new()
                .diamond(DiamondKind::Invariant)
                .unswitch_budget(1, 3),
        );
        let d = shape.diamonds[0];
        for h in [r.fast_head, r.slow_head] {
            assert_eq!(g.node(h).loop_head().unwrap().unswitch_count, 2);
        }
        assert_eq!(g.find_int_con(g.input(d.iff, 1)), Some(1));
        let clone = r.old_new[&d.iff];
        assert_eq!(g.find_int_con(g.input(clone, 1)), Some(0));
    }

    #[test]
    fn test_range_check_selector_kind() {
        let (g, _, r) = unswitch(LoopGraphBuilder::new().diamond(DiamondKind::RangeCheck));
        assert_eq!(
            g.op(r.selector.iff),
            Operator::Control(ControlOp::If(IfKind::RangeCheck))
        );
    }

    #[test]
    fn test_main_loop_becomes_normal() {
        let (g, shape, _) = unswitch(
            LoopGraphBuilder::new()
                .diamond(DiamondKind::Invariant)
                .loop_flags(LoopFlags::MAIN),
        );
        assert!(g.node(shape.head).loop_head().unwrap().is_normal_loop());
    }

    #[test]
    fn test_check_cast_hoisted() {
        let (g, shape, r) = unswitch(
            LoopGraphBuilder::new()
                .diamond(DiamondKind::Invariant)
                .check_cast(),
        );
        assert_eq!(r.casts_hoisted, 1);
        let cast = shape.check_cast;
        let hoisted = g.input(cast, 1);
        assert_eq!(g.op(hoisted), Operator::CheckCastPP);
        assert_eq!(g.input(hoisted, 0), r.selector.fast);
        assert_eq!(g.input(hoisted, 1), shape.ptr);
        assert_eq!(g.input(r.old_new[&cast], 1), hoisted);
        // The cast followed the hardwired test up to the selector.
        assert_eq!(g.input(cast, 0), r.selector.fast);
    }

    #[test]
    fn test_parse_predicates_cloned_to_both_loops() {
        let (g, shape, r) = unswitch(
            LoopGraphBuilder::new()
                .parse_predicates(&[DeoptReason::Predicate, DeoptReason::LoopLimitCheck])
                .runtime_predicate(DeoptReason::LoopLimitCheck)
                .diamond(DiamondKind::Invariant),
        );
        assert_eq!(r.parse_predicates_cloned, 2);
        for &pp in &shape.parse_predicates {
            assert!(g.node(pp).is_useless());
        }
        for (head, proj) in [(r.fast_head, r.selector.fast), (r.slow_head, r.selector.slow)] {
            let predicates = Predicates::new(&g, g.input(head, 1));
            assert_eq!(predicates.parse_predicates().len(), 2);
            assert!(predicates.loop_limit_check_block().runtime_block().is_empty());
            assert_eq!(predicates.entry(), proj);
        }
        // The Runtime Predicate stays above the selector.
        let above = Predicates::new(&g, g.input(r.selector.iff, 0));
        assert!(!above.loop_limit_check_block().runtime_block().is_empty());
    }

    #[test]
    fn test_pinned_entry_load_blocks_parse_predicate_cloning() {
        let (mut g, shape) = LoopGraphBuilder::new()
            .parse_predicates(&[DeoptReason::LoopLimitCheck])
            .diamond(DiamondKind::Invariant)
            .build();
        let entry = shape.loop_entry(&g);
        let load = g.load(entry, shape.ptr);
        let sum = g.add_i(load, shape.iv);
        let d = shape.diamonds[0];
        g.replace_input(d.then_store, 2, sum);

        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        let r = opt.do_unswitching(l).unwrap();
        assert_eq!(r.parse_predicates_cloned, 0);
        assert!(!opt.graph().node(shape.parse_predicates[0]).is_useless());
        assert_eq!(opt.graph().input(load, 0), entry);
    }

    #[test]
    fn test_strip_mined_nest_is_cloned_whole() {
        let (g, shape, r) = unswitch(
            LoopGraphBuilder::new()
                .strip_mined()
                .diamond(DiamondKind::Invariant),
        );
        assert_eq!(g.input(shape.outer_head, 1), r.selector.fast);
        let slow_outer = r.old_new[&shape.outer_head];
        assert_eq!(g.input(slow_outer, 1), r.selector.slow);
        assert_eq!(g.input(r.slow_head, 1), slow_outer);
    }
}
