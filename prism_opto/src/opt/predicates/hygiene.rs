//! Removal of Parse Predicates that no loop uses anymore.
//!
//! Every round marks all Parse Predicates useless, then marks the ones
//! above a live loop useful again. Whatever stays useless is handed to
//! IGVN, which folds it away.

use log::debug;

use super::block::Predicates;
use super::model::ParsePredicate;
use crate::error::Result;
use crate::ir::graph::Graph;
use crate::ir::loops::LoopTree;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, LoopKind, Operator};
use crate::opt::config::LoopOptsConfig;
use crate::opt::phase::LoopOptimizer;
use crate::opt::OptimizationPass;

/// Mark-and-sweep over Parse Predicates.
#[derive(Debug, Default)]
pub struct EliminateUselessParsePredicates {
    eliminated: usize,
}

impl EliminateUselessParsePredicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse Predicates queued for removal by the last [`Self::eliminate`].
    pub fn eliminated(&self) -> usize {
        self.eliminated
    }

    pub fn eliminate(&mut self, opt: &mut LoopOptimizer<'_>) -> usize {
        let all = Self::mark_all_useless(opt.graph_mut());
        self.mark_loop_associated_useful(opt);

        self.eliminated = 0;
        for pp in all {
            if opt.graph().node(pp).is_useless() {
                debug!(target: "loopopts", "useless parse predicate {pp:?} ({})", opt.graph().op(pp));
                opt.worklist_mut().push(pp);
                self.eliminated += 1;
            }
        }
        self.eliminated
    }

    fn mark_all_useless(graph: &mut Graph) -> Vec<NodeId> {
        let all: Vec<NodeId> = graph
            .iter()
            .filter(|(_, node)| node.op.is_parse_predicate())
            .map(|(id, _)| id)
            .collect();
        for &pp in &all {
            graph.set_flag(pp, crate::ir::NodeFlags::USELESS, true);
        }
        all
    }

    fn mark_loop_associated_useful(&self, opt: &mut LoopOptimizer<'_>) {
        let heads: Vec<NodeId> = opt
            .tree()
            .innermost_first()
            .into_iter()
            .map(|l| opt.tree().get(l).head)
            .filter(|&head| {
                opt.graph().op(head) != Operator::Control(ControlOp::Loop(LoopKind::OuterStripMined))
            })
            .collect();
        for head in heads {
            let entry = opt.loop_entry(head);
            let parse_predicates: Vec<ParsePredicate> =
                Predicates::new(opt.graph(), entry).parse_predicates().into_iter().collect();
            for pp in parse_predicates {
                pp.mark_useful(opt.graph_mut());
            }
        }
    }
}

/// Pass wrapper running [`EliminateUselessParsePredicates`] followed by
/// IGVN.
#[derive(Debug, Default)]
pub struct PredicateHygiene {
    config: LoopOptsConfig,
    eliminated: usize,
}

impl PredicateHygiene {
    pub fn new(config: LoopOptsConfig) -> Self {
        Self {
            config,
            eliminated: 0,
        }
    }

    /// Parse Predicates removed over the lifetime of this pass.
    pub fn eliminated(&self) -> usize {
        self.eliminated
    }
}

impl OptimizationPass for PredicateHygiene {
    fn name(&self) -> &'static str {
        "PredicateHygiene"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<bool> {
        if LoopTree::build(graph).len() <= 1 && !graph.iter().any(|(_, n)| n.op.is_parse_predicate()) {
            return Ok(false);
        }
        let mut opt = LoopOptimizer::new(graph, self.config.clone());
        let count = EliminateUselessParsePredicates::new().eliminate(&mut opt);
        if count > 0 {
            opt.run_igvn();
        }
        self.eliminated += count;
        Ok(count > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
