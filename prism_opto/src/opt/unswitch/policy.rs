//! Deciding whether and where to unswitch a loop.

use log::debug;

use super::UnswitchRejection;
use crate::ir::loops::{loop_head, LoopId};
use crate::ir::node::{LoopFlags, NodeId};
use crate::ir::operators::{ControlOp, IfKind, LoopKind, Operator};
use crate::opt::phase::LoopOptimizer;

impl LoopOptimizer<'_> {
    /// Should loop `l` be unswitched? On success the node budget for
    /// cloning the loop has been reserved.
    pub fn policy_unswitching(&mut self, l: LoopId) -> bool {
        match self.check_unswitching(l) {
            Ok(()) => true,
            Err(reason) => {
                debug!(target: "loopopts", "no unswitching of loop {:?}: {reason}", self.tree().get(l).head);
                false
            }
        }
    }

    /// Like [`LoopOptimizer::policy_unswitching`], reporting why a loop was
    /// rejected.
    pub fn check_unswitching(&mut self, l: LoopId) -> Result<(), UnswitchRejection> {
        if !self.config().loop_unswitching {
            return Err(UnswitchRejection::Disabled);
        }
        let head = self.tree().get(l).head;
        let Some(info) = head
            .valid()
            .filter(|&h| self.graph().op(h).is_loop())
            .and_then(|h| loop_head(self.graph(), h))
        else {
            return Err(UnswitchRejection::NotALoop);
        };
        if self.exceeding_node_budget(0) {
            return Err(UnswitchRejection::NodesExhausted);
        }
        if self.graph().op(head) == Operator::Control(ControlOp::Loop(LoopKind::Counted))
            && info.flags.contains(LoopFlags::UNROLL_ONLY)
        {
            return Err(UnswitchRejection::UnrollOnly);
        }
        if u32::from(info.unswitch_count) + 1 > u32::from(info.unswitch_max) {
            return Err(UnswitchRejection::CountExceeded);
        }
        if self.find_unswitching_candidate(l).is_none() {
            return Err(UnswitchRejection::NoCandidate);
        }
        let estimate = self.est_loop_clone_sz(l, 2);
        if !self.may_require_nodes(estimate) {
            return Err(UnswitchRejection::OverBudget);
        }
        Ok(())
    }

    /// The invariant test to unswitch `l` on.
    ///
    /// Walks the dominators from the backedge up to the head and picks an
    /// `If` that starts a diamond, has a loop invariant condition and does
    /// not exit the loop. Later matches replace earlier ones, so the test
    /// nearest the head wins.
    pub fn find_unswitching_candidate(&self, l: LoopId) -> Option<NodeId> {
        let head = self.tree().get(l).head;
        let g = self.graph();
        let mut candidate = None;
        let mut n = g.input(head, 2);
        while n.is_valid() && n != head {
            let n_dom = self.idom(n);
            if !n_dom.is_valid() {
                break;
            }
            if g.op(n) == Operator::Control(ControlOp::Region) && self.is_unswitchable_if(l, n_dom) {
                candidate = Some(n_dom);
            }
            n = n_dom;
        }
        if let Some(iff) = candidate {
            debug!(target: "loopopts", "unswitching candidate for loop {head:?}: {iff:?}");
        }
        candidate
    }

    fn is_unswitchable_if(&self, l: LoopId, iff: NodeId) -> bool {
        let g = self.graph();
        if !matches!(
            g.op(iff),
            Operator::Control(ControlOp::If(IfKind::Plain | IfKind::RangeCheck))
        ) {
            return false;
        }
        let bol = g.input(iff, 1);
        if !g.op(bol).is_bool() || !g.op(g.input(bol, 1)).is_cmp() {
            return false;
        }
        self.is_invariant(l, bol) && !self.tree().is_loop_exit(g, l, iff)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{DiamondKind, LoopGraphBuilder};
    use crate::opt::config::LoopOptsConfig;

    fn check(builder: LoopGraphBuilder, config: LoopOptsConfig) -> Result<(), UnswitchRejection> {
        let (mut g, shape) = builder.build();
        let mut opt = LoopOptimizer::new(&mut g, config);
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        opt.check_unswitching(l)
    }

    #[test]
    fn test_invariant_diamond_accepted() {
        let builder = LoopGraphBuilder::new().diamond(DiamondKind::Invariant);
        assert_eq!(check(builder, LoopOptsConfig::default()), Ok(()));
    }

    #[test]
    fn test_disabled() {
        let builder = LoopGraphBuilder::new().diamond(DiamondKind::Invariant);
        assert_eq!(
            check(builder, LoopOptsConfig::conservative()),
            Err(UnswitchRejection::Disabled)
        );
    }

    #[test]
    fn test_variant_diamond_rejected() {
        let builder = LoopGraphBuilder::new().diamond(DiamondKind::Variant);
        assert_eq!(
            check(builder, LoopOptsConfig::default()),
            Err(UnswitchRejection::NoCandidate)
        );
    }

    #[test]
    fn test_unroll_only_rejected() {
        let builder = LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .loop_flags(LoopFlags::MAIN | LoopFlags::UNROLL_ONLY);
        assert_eq!(
            check(builder, LoopOptsConfig::default()),
            Err(UnswitchRejection::UnrollOnly)
        );
    }

    #[test]
    fn test_count_at_max_rejected() {
        let builder = LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .unswitch_budget(2, 2);
        assert_eq!(
            check(builder, LoopOptsConfig::default()),
            Err(UnswitchRejection::CountExceeded)
        );
    }

    #[test]
    fn test_small_node_limit() {
        let (g, _) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        let live = g.live_nodes();

        let exhausted = LoopOptsConfig {
            max_node_limit: live + 10,
            ..Default::default()
        };
        let builder = LoopGraphBuilder::new().diamond(DiamondKind::Invariant);
        assert_eq!(check(builder, exhausted), Err(UnswitchRejection::NodesExhausted));

        let tight = LoopOptsConfig {
            max_node_limit: live + 80,
            ..Default::default()
        };
        let builder = LoopGraphBuilder::new().diamond(DiamondKind::Invariant);
        assert_eq!(check(builder, tight), Err(UnswitchRejection::OverBudget));
    }

    #[test]
    fn test_candidate_nearest_head_wins() {
        let (mut g, shape) = LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .diamond(DiamondKind::RangeCheck)
            .build();
        let opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert_eq!(opt.find_unswitching_candidate(l), Some(shape.diamonds[0].iff));
    }

    #[test]
    fn test_exiting_test_is_not_a_candidate() {
        let (mut g, shape) = LoopGraphBuilder::new().invariant_exit().build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert_eq!(opt.find_unswitching_candidate(l), None);
        assert!(!opt.policy_unswitching(l));
    }
}
