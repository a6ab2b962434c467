//! Loop Unswitching.
//!
//! A loop with an invariant test that does not exit the loop is split into
//! a fast and a slow version behind a selector `If` on the same condition.
//! Each version keeps only one side of the test:
//!
//! ```text
//! for (...) {                  if (invariant) {
//!     if (invariant) {             for (...) { A }        // fast loop
//!         A                    } else {
//!     } else {          ==>        for (...) { B }        // slow loop
//!         B                    }
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - `policy.rs`: eligibility checks and the search for the invariant test
//! - `transform.rs`: the selector, loop cloning, predicate cloning and
//!   hardwiring of the tests in both loops
//!
//! Every round first removes Parse Predicates that no longer belong to a
//! loop, then unswitches each innermost loop at most once.

mod policy;
mod transform;

pub use transform::{UnswitchResult, UnswitchedLoopSelector};

use log::{debug, error};

use crate::error::Result;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, LoopKind, Operator};
use crate::opt::config::LoopOptsConfig;
use crate::opt::phase::LoopOptimizer;
use crate::opt::predicates::EliminateUselessParsePredicates;
use crate::opt::OptimizationPass;

// =============================================================================
// Rejections
// =============================================================================

/// Why a loop was not unswitched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnswitchRejection {
    /// Unswitching is turned off.
    Disabled,
    /// The head is not a loop.
    NotALoop,
    /// The graph already exhausted the node budget.
    NodesExhausted,
    /// The loop is only unrolled further.
    UnrollOnly,
    /// The loop was unswitched as often as allowed.
    CountExceeded,
    /// No invariant, non-exiting test in the loop.
    NoCandidate,
    /// Cloning the loop would exceed the node budget.
    OverBudget,
}

impl UnswitchRejection {
    pub const COUNT: usize = 7;
}

impl std::fmt::Display for UnswitchRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnswitchRejection::Disabled => write!(f, "unswitching disabled"),
            UnswitchRejection::NotALoop => write!(f, "not a loop"),
            UnswitchRejection::NodesExhausted => write!(f, "node budget exhausted"),
            UnswitchRejection::UnrollOnly => write!(f, "unroll-only loop"),
            UnswitchRejection::CountExceeded => write!(f, "unswitch count at maximum"),
            UnswitchRejection::NoCandidate => write!(f, "no invariant test"),
            UnswitchRejection::OverBudget => write!(f, "clone exceeds node budget"),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from the unswitching pass, accumulated over all runs.
#[derive(Debug, Clone, Default)]
pub struct UnswitchStats {
    /// Innermost loops looked at.
    pub loops_considered: usize,
    pub loops_unswitched: usize,
    pub parse_predicates_cloned: usize,
    pub templates_cloned: usize,
    pub casts_hoisted: usize,
    /// Parse Predicates removed by the hygiene step.
    pub useless_parse_predicates: usize,
    /// Transformations that grew the graph more than they asked for.
    pub budget_overruns: usize,
    /// Rejections, indexed by [`UnswitchRejection`].
    pub rejections: [usize; UnswitchRejection::COUNT],
}

impl UnswitchStats {
    pub fn record_rejection(&mut self, reason: UnswitchRejection) {
        self.rejections[reason as usize] += 1;
    }

    pub fn rejected(&self, reason: UnswitchRejection) -> usize {
        self.rejections[reason as usize]
    }

    fn record(&mut self, result: &UnswitchResult) {
        self.loops_unswitched += 1;
        self.parse_predicates_cloned += result.parse_predicates_cloned;
        self.templates_cloned += result.templates_cloned;
        self.casts_hoisted += result.casts_hoisted;
    }
}

// =============================================================================
// Pass
// =============================================================================

/// One round of predicate hygiene and unswitching of innermost loops.
#[derive(Debug, Default)]
pub struct LoopUnswitching {
    config: LoopOptsConfig,
    stats: UnswitchStats,
}

impl LoopUnswitching {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LoopOptsConfig) -> Self {
        Self {
            config,
            stats: UnswitchStats::default(),
        }
    }

    pub fn config(&self) -> &LoopOptsConfig {
        &self.config
    }

    pub fn stats(&self) -> &UnswitchStats {
        &self.stats
    }

    /// Run one round on `graph`. Returns whether the graph changed.
    pub fn run_unswitching(&mut self, graph: &mut Graph) -> Result<bool> {
        let mut opt = LoopOptimizer::new(graph, self.config.clone());
        let eliminated = EliminateUselessParsePredicates::new().eliminate(&mut opt);
        self.stats.useless_parse_predicates += eliminated;

        for head in innermost_loop_heads(&opt) {
            let Some(l) = opt.tree().loop_for_head(head) else {
                continue;
            };
            self.stats.loops_considered += 1;
            opt.require_nodes_begin();
            if let Err(reason) = opt.check_unswitching(l) {
                debug!(target: "loopopts", "no unswitching of loop {head:?}: {reason}");
                self.stats.record_rejection(reason);
                continue;
            }
            match opt.do_unswitching(l) {
                Ok(result) => self.stats.record(&result),
                Err(e) => {
                    error!(target: "loopopts", "unswitching loop {head:?} failed: {e}");
                    return Err(e);
                }
            }
            if !opt.require_nodes_final() {
                self.stats.budget_overruns += 1;
            }
        }

        let changed = opt.major_progress() || eliminated > 0;
        if changed {
            opt.run_igvn();
        }
        Ok(changed)
    }
}

/// Heads of loops without nested loops. Outer strip-mined loops are
/// unswitched through their inner loop.
fn innermost_loop_heads(opt: &LoopOptimizer<'_>) -> Vec<NodeId> {
    let tree = opt.tree();
    tree.innermost_first()
        .into_iter()
        .map(|l| tree.get(l))
        .filter(|info| info.children.is_empty())
        .map(|info| info.head)
        .filter(|&head| {
            opt.graph().op(head) != Operator::Control(ControlOp::Loop(LoopKind::OuterStripMined))
        })
        .collect()
}

impl OptimizationPass for LoopUnswitching {
    fn name(&self) -> &'static str {
        "LoopUnswitching"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<bool> {
        self.run_unswitching(graph)
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
    fn test_rejection_display() {
        assert_eq!(UnswitchRejection::NoCandidate.to_string(), "no invariant test");
        assert_eq!(UnswitchRejection::OverBudget as usize, UnswitchRejection::COUNT - 1);
    }

    #[test]
    fn test_pass_unswitches_and_cleans_up() {
        let (mut g, shape) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        let mut pass = LoopUnswitching::new();
        assert!(pass.run(&mut g).unwrap());
        assert_eq!(pass.stats().loops_unswitched, 1);
        assert_eq!(pass.stats().loops_considered, 1);
        // The fast loop lost its test, the else side died with it.
        assert!(g.is_dead(shape.diamonds[0].iff));
        assert!(g.is_dead(shape.diamonds[0].else_store));
        assert!(!g.is_dead(shape.diamonds[0].then_store));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_pass_records_rejections() {
        let (mut g, _) = LoopGraphBuilder::new().diamond(DiamondKind::Variant).build();
        let mut pass = LoopUnswitching::new();
        assert!(!pass.run(&mut g).unwrap());
        assert_eq!(pass.stats().rejected(UnswitchRejection::NoCandidate), 1);
        assert_eq!(pass.stats().loops_unswitched, 0);
    }

    #[test]
    fn test_repeated_rounds_stop_at_max() {
        let (mut g, _) = LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .diamond(DiamondKind::Invariant)
            .unswitch_budget(0, 1)
            .build();
        let mut pass = LoopUnswitching::new();
        assert!(pass.run(&mut g).unwrap());
        assert_eq!(pass.stats().loops_unswitched, 1);
        // Both loops still hold the second test but are out of budget.
        assert!(!pass.run(&mut g).unwrap());
        assert_eq!(pass.stats().loops_unswitched, 1);
        assert_eq!(pass.stats().rejected(UnswitchRejection::CountExceeded), 2);
    }
}
