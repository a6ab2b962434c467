//! Predicate blocks, iteration over a loop's predicates and insertion of
//! new predicates.

use smallvec::SmallVec;

use super::model::{
    InitializedAssertionPredicate, ParsePredicate, Predicate, RuntimePredicate,
    TemplateAssertionPredicate,
};
use crate::error::{LoopOptError, Result};
use crate::ir::graph::Graph;
use crate::ir::loops::skip_strip_mined;
use crate::ir::node::NodeId;
use crate::ir::operators::DeoptReason;
use crate::opt::config::LoopOptsConfig;
use crate::opt::phase::LoopOptimizer;

/// The predicate ending at `tail` as it belongs to the block of `reason`:
/// Runtime Predicates of that reason and Assertion Predicates, which Loop
/// Predication leaves interleaved with them.
fn block_member(graph: &Graph, tail: NodeId, reason: DeoptReason) -> Option<Predicate> {
    if let Some(t) = TemplateAssertionPredicate::new(graph, tail) {
        return Some(Predicate::TemplateAssertion(t));
    }
    if RuntimePredicate::is_success_proj(graph, tail, reason) {
        return Some(Predicate::Runtime(RuntimePredicate::new(graph, tail)));
    }
    InitializedAssertionPredicate::new(graph, tail).map(Predicate::InitializedAssertion)
}

fn assertion_member(graph: &Graph, tail: NodeId) -> Option<Predicate> {
    if let Some(t) = TemplateAssertionPredicate::new(graph, tail) {
        return Some(Predicate::TemplateAssertion(t));
    }
    InitializedAssertionPredicate::new(graph, tail).map(Predicate::InitializedAssertion)
}

// =============================================================================
// Blocks
// =============================================================================

/// The Runtime Predicates of one reason above a Parse Predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimePredicateBlock {
    tail: NodeId,
    entry: NodeId,
    reason: DeoptReason,
}

impl RuntimePredicateBlock {
    pub fn new(graph: &Graph, tail: NodeId, reason: DeoptReason) -> Self {
        let mut entry = tail;
        while let Some(p) = block_member(graph, entry, reason) {
            entry = p.entry(graph);
        }
        Self {
            tail,
            entry,
            reason,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.entry
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn reason(&self) -> DeoptReason {
        self.reason
    }

    /// Members from the bottom up.
    pub fn predicates(&self, graph: &Graph) -> Vec<Predicate> {
        let mut out = Vec::new();
        let mut current = self.tail;
        while current != self.entry {
            match block_member(graph, current, self.reason) {
                Some(p) => {
                    current = p.entry(graph);
                    out.push(p);
                }
                None => break,
            }
        }
        out
    }
}

/// A Parse Predicate of one reason (nearest the loop) with its Runtime
/// Predicates above it. Either part may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegularPredicateBlock {
    parse_predicate: Option<ParsePredicate>,
    runtime_block: RuntimePredicateBlock,
    tail: NodeId,
}

impl RegularPredicateBlock {
    pub fn new(graph: &Graph, tail: NodeId, reason: DeoptReason) -> Self {
        let parse_predicate = ParsePredicate::new(graph, tail, reason);
        let runtime_tail = parse_predicate.map_or(tail, |p| p.entry(graph));
        Self {
            parse_predicate,
            runtime_block: RuntimePredicateBlock::new(graph, runtime_tail, reason),
            tail,
        }
    }

    pub fn parse_predicate(&self) -> Option<ParsePredicate> {
        self.parse_predicate
    }

    pub fn has_parse_predicate(&self) -> bool {
        self.parse_predicate.is_some()
    }

    pub fn runtime_block(&self) -> &RuntimePredicateBlock {
        &self.runtime_block
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.entry()
    }

    /// Control above the whole block.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.runtime_block.entry()
    }

    /// Every member either is the Parse Predicate or traps with the
    /// block's reason.
    pub fn verify(&self, graph: &Graph) -> Result<()> {
        for p in self.runtime_block.predicates(graph) {
            if let Predicate::Runtime(r) = p {
                let reason = super::model::uncommon_trap_reason(graph, r.tail());
                let folding = reason == DeoptReason::None;
                if !folding && reason != self.runtime_block.reason() {
                    return Err(LoopOptError::MalformedPredicate {
                        node: r.head(),
                        reason: "runtime predicate traps with a foreign reason",
                    });
                }
            }
        }
        Ok(())
    }
}

/// Template and Initialized Assertion Predicates directly above the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionPredicateBlock {
    tail: NodeId,
    entry: NodeId,
}

impl AssertionPredicateBlock {
    pub fn new(graph: &Graph, tail: NodeId) -> Self {
        let mut entry = tail;
        while let Some(p) = assertion_member(graph, entry) {
            entry = p.entry(graph);
        }
        Self { tail, entry }
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.entry
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn templates(&self, graph: &Graph) -> Vec<TemplateAssertionPredicate> {
        let mut out = Vec::new();
        let mut current = self.tail;
        while let Some(p) = assertion_member(graph, current) {
            if let Predicate::TemplateAssertion(t) = p {
                out.push(t);
            }
            current = p.entry(graph);
        }
        out
    }
}

// =============================================================================
// Predicates
// =============================================================================

/// All predicates above a loop, split into blocks.
#[derive(Debug, Clone, Copy)]
pub struct Predicates {
    tail: NodeId,
    assertion_block: AssertionPredicateBlock,
    loop_limit_check_block: RegularPredicateBlock,
    profiled_loop_block: RegularPredicateBlock,
    loop_block: RegularPredicateBlock,
}

impl Predicates {
    /// Walk up from `loop_entry`, the entry control of a loop head.
    pub fn new(graph: &Graph, loop_entry: NodeId) -> Self {
        let assertion_block = AssertionPredicateBlock::new(graph, loop_entry);
        let loop_limit_check_block =
            RegularPredicateBlock::new(graph, assertion_block.entry(), DeoptReason::LoopLimitCheck);
        let profiled_loop_block = RegularPredicateBlock::new(
            graph,
            loop_limit_check_block.entry(),
            DeoptReason::ProfilePredicate,
        );
        let loop_block =
            RegularPredicateBlock::new(graph, profiled_loop_block.entry(), DeoptReason::Predicate);
        Self {
            tail: loop_entry,
            assertion_block,
            loop_limit_check_block,
            profiled_loop_block,
            loop_block,
        }
    }

    /// Control above every predicate of the loop.
    pub fn entry(&self) -> NodeId {
        self.loop_block.entry()
    }

    pub fn has_any(&self) -> bool {
        self.entry() != self.tail
    }

    pub fn assertion_block(&self) -> &AssertionPredicateBlock {
        &self.assertion_block
    }

    pub fn loop_limit_check_block(&self) -> &RegularPredicateBlock {
        &self.loop_limit_check_block
    }

    pub fn profiled_loop_block(&self) -> &RegularPredicateBlock {
        &self.profiled_loop_block
    }

    pub fn loop_block(&self) -> &RegularPredicateBlock {
        &self.loop_block
    }

    pub fn has_parse_predicates(&self) -> bool {
        self.regular_blocks().iter().any(|b| b.has_parse_predicate())
    }

    /// Parse Predicates from the loop outward.
    pub fn parse_predicates(&self) -> SmallVec<[ParsePredicate; 3]> {
        self.regular_blocks()
            .iter()
            .filter_map(|b| b.parse_predicate())
            .collect()
    }

    fn regular_blocks(&self) -> [&RegularPredicateBlock; 3] {
        [
            &self.loop_limit_check_block,
            &self.profiled_loop_block,
            &self.loop_block,
        ]
    }

    pub fn verify(&self, graph: &Graph) -> Result<()> {
        for block in self.regular_blocks() {
            block.verify(graph)?;
        }
        Ok(())
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Walks predicate entries upward, skipping any kind of predicate.
#[derive(Debug, Clone, Copy)]
pub struct PredicateEntryIterator {
    current: NodeId,
}

impl PredicateEntryIterator {
    pub fn new(start: NodeId) -> Self {
        Self { current: start }
    }

    pub fn has_next(&self, graph: &Graph) -> bool {
        Predicate::classify(graph, self.current).is_some()
    }

    /// Step over the current predicate and return the control above it.
    pub fn next_predicate_entry(&mut self, graph: &Graph) -> Option<NodeId> {
        let p = Predicate::classify(graph, self.current)?;
        self.current = p.entry(graph);
        Some(self.current)
    }

    /// Control above all predicates.
    pub fn skip_all(mut self, graph: &Graph) -> NodeId {
        while self.next_predicate_entry(graph).is_some() {}
        self.current
    }
}

/// Visits the predicates of one loop block by block, handing each to a
/// closure that may transform the graph.
///
/// The entry above a predicate is read before it is visited, so predicates
/// the closure inserts above it are not visited.
#[derive(Debug, Clone, Copy)]
pub struct PredicatesForLoop {
    start: NodeId,
    use_loop_predicate: bool,
    use_profiled_loop_predicate: bool,
}

impl PredicatesForLoop {
    pub fn new(start: NodeId, config: &LoopOptsConfig) -> Self {
        Self {
            start,
            use_loop_predicate: config.use_loop_predicate,
            use_profiled_loop_predicate: config.use_profiled_loop_predicate,
        }
    }

    pub fn for_each<F>(&self, opt: &mut LoopOptimizer<'_>, mut f: F) -> Result<()>
    where
        F: FnMut(&mut LoopOptimizer<'_>, Predicate) -> Result<()>,
    {
        let mut entry = self.start;
        loop {
            let Some(p) = assertion_member(opt.graph(), entry) else {
                break;
            };
            entry = p.entry(opt.graph());
            f(opt, p)?;
        }

        entry = Self::for_each_in_block(opt, entry, DeoptReason::LoopLimitCheck, &mut f)?;
        if self.use_loop_predicate {
            if self.use_profiled_loop_predicate {
                entry = Self::for_each_in_block(opt, entry, DeoptReason::ProfilePredicate, &mut f)?;
            }
            Self::for_each_in_block(opt, entry, DeoptReason::Predicate, &mut f)?;
        }
        Ok(())
    }

    /// Visit the Parse Predicate of `reason` at `entry`, then the members
    /// above it. Returns the entry of the block.
    fn for_each_in_block<F>(
        opt: &mut LoopOptimizer<'_>,
        mut entry: NodeId,
        reason: DeoptReason,
        f: &mut F,
    ) -> Result<NodeId>
    where
        F: FnMut(&mut LoopOptimizer<'_>, Predicate) -> Result<()>,
    {
        if let Some(pp) = ParsePredicate::new(opt.graph(), entry, reason) {
            entry = pp.entry(opt.graph());
            f(opt, Predicate::Parse(pp))?;
        }
        while let Some(p) = block_member(opt.graph(), entry, reason) {
            entry = p.entry(opt.graph());
            f(opt, p)?;
        }
        Ok(entry)
    }
}

// =============================================================================
// Predicate Chain
// =============================================================================

/// Inserts predicates above a loop, each new one above the previous.
#[derive(Debug, Clone, Copy)]
pub struct PredicateChain {
    /// Node whose control input receives the next predicate.
    tail: NodeId,
}

impl PredicateChain {
    /// A chain starting at the loop head `head` (the outer strip-mined head
    /// if there is one).
    pub fn new(graph: &Graph, head: NodeId) -> Self {
        Self {
            tail: skip_strip_mined(graph, head),
        }
    }

    #[inline]
    pub fn tail(&self) -> NodeId {
        self.tail
    }

    /// Control the next predicate must hang off.
    pub fn entry(&self, graph: &Graph) -> NodeId {
        if graph.op(self.tail).is_loop() {
            graph.input(self.tail, 1)
        } else {
            graph.input(self.tail, 0)
        }
    }

    /// Splice `p`, created at [`PredicateChain::entry`], below the
    /// current entry and continue above it.
    pub fn insert_new_predicate(&mut self, opt: &mut LoopOptimizer<'_>, p: Predicate) {
        if opt.graph().op(self.tail).is_loop() {
            opt.replace_loop_entry(self.tail, p.tail());
        } else {
            opt.replace_control_same_loop(self.tail, p.tail());
        }
        self.tail = p.head();
    }

    /// Continue above `p`, which is already in place.
    pub fn insert_existing_predicate(&mut self, p: Predicate) {
        self.tail = p.head();
    }
}

// =============================================================================
// Tests
// =============================================================================
