//! Typed views over predicate nodes.
//!
//! Each view recognizes one predicate shape by looking at a node and its
//! immediate neighbourhood. Views hold node ids only; [`Predicate::entry`]
//! is read from the graph so it follows rewiring.
//!
//! ```text
//!             entry                       entry               entry
//!               |                           |                   |
//!        If / ParsePredicate          TemplateAssertion       If (Opaque)
//!          /          \                  Predicate            /       \
//!     IfTrue         IfFalse                |            IfTrue      IfFalse
//!      (tail)     UncommonTrap             tail           (tail)       Halt
//! ```

use crate::ir::graph::Graph;
use crate::ir::node::{AssertionPredicateType, NodeAttrs, NodeFlags, NodeId};
use crate::ir::operators::{ControlOp, DeoptReason, IfKind, OpaqueOp, Operator};

// =============================================================================
// Parse Predicate
// =============================================================================

/// A placeholder `If` with an uncommon trap, created by the front end for
/// later hoisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsePredicate {
    iff: NodeId,
    success_proj: NodeId,
    reason: DeoptReason,
}

impl ParsePredicate {
    /// The Parse Predicate whose success projection is `proj`, if its
    /// reason is `reason`.
    pub fn new(graph: &Graph, proj: NodeId, reason: DeoptReason) -> Option<Self> {
        Self::from_success_proj(graph, proj).filter(|p| p.reason == reason)
    }

    /// The Parse Predicate whose success projection is `proj`, any reason.
    pub fn from_success_proj(graph: &Graph, proj: NodeId) -> Option<Self> {
        if !proj.is_valid() || graph.is_dead(proj) || !graph.is_if_true(proj) {
            return None;
        }
        let iff = graph.input(proj, 0);
        match graph.op(iff) {
            Operator::Control(ControlOp::If(IfKind::ParsePredicate(reason))) => Some(Self {
                iff,
                success_proj: proj,
                reason,
            }),
            _ => None,
        }
    }

    #[inline]
    pub fn entry(&self, graph: &Graph) -> NodeId {
        graph.input(self.iff, 0)
    }

    #[inline]
    pub fn head(&self) -> NodeId {
        self.iff
    }

    #[inline]
    pub fn tail(&self) -> NodeId {
        self.success_proj
    }

    #[inline]
    pub fn reason(&self) -> DeoptReason {
        self.reason
    }

    pub fn is_useless(&self, graph: &Graph) -> bool {
        graph.node(self.iff).is_useless()
    }

    pub fn mark_useful(&self, graph: &mut Graph) {
        graph.set_flag(self.iff, NodeFlags::USELESS, false);
    }

    pub fn mark_useless(&self, graph: &mut Graph) {
        graph.set_flag(self.iff, NodeFlags::USELESS, true);
    }
}

// =============================================================================
// Runtime Predicate
// =============================================================================

/// A check hoisted out of a loop whose failure deoptimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimePredicate {
    iff: NodeId,
    success_proj: NodeId,
}

impl RuntimePredicate {
    pub fn new(graph: &Graph, proj: NodeId) -> Self {
        Self {
            iff: graph.input(proj, 0),
            success_proj: proj,
        }
    }

    /// `proj` is the success projection of a Runtime Predicate of any
    /// predicate reason.
    pub fn is_success_proj_any(graph: &Graph, proj: NodeId) -> bool {
        if !Self::may_be_runtime_predicate_if(graph, proj) {
            return false;
        }
        Self::is_being_folded_without_uncommon_proj(graph, proj)
            || uncommon_trap_reason(graph, proj).is_predicate_reason()
    }

    /// `proj` is the success projection of a Runtime Predicate trapping
    /// with `reason`.
    pub fn is_success_proj(graph: &Graph, proj: NodeId, reason: DeoptReason) -> bool {
        if !Self::may_be_runtime_predicate_if(graph, proj) {
            return false;
        }
        Self::is_being_folded_without_uncommon_proj(graph, proj)
            || uncommon_trap_reason(graph, proj) == reason
    }

    fn may_be_runtime_predicate_if(graph: &Graph, proj: NodeId) -> bool {
        if !proj.is_valid() || graph.is_dead(proj) || !graph.op(proj).is_if_proj() {
            return false;
        }
        let iff = graph.input(proj, 0);
        match graph.op(iff) {
            Operator::Control(ControlOp::If(IfKind::Plain)) => {
                !graph.node(iff).flags.contains(NodeFlags::ZERO_TRIP_GUARD)
            }
            Operator::Control(ControlOp::If(IfKind::RangeCheck)) => true,
            _ => false,
        }
    }

    /// IGVN already removed the failing projection of a predicate whose
    /// condition became constant. It is still treated as a predicate so
    /// walks do not stop early.
    fn is_being_folded_without_uncommon_proj(graph: &Graph, proj: NodeId) -> bool {
        let iff = graph.input(proj, 0);
        graph.find_int_con(graph.input(iff, 1)).is_some() && graph.outcnt(iff) == 1
    }

    #[inline]
    pub fn entry(&self, graph: &Graph) -> NodeId {
        graph.input(self.iff, 0)
    }

    #[inline]
    pub fn head(&self) -> NodeId {
        self.iff
    }

    #[inline]
    pub fn tail(&self) -> NodeId {
        self.success_proj
    }
}

/// Reason of the uncommon trap reached from the sibling of `proj`, possibly
/// through a region shared with other predicates.
pub fn uncommon_trap_reason(graph: &Graph, proj: NodeId) -> DeoptReason {
    let Some(other) = graph.other_proj(proj) else {
        return DeoptReason::None;
    };
    let mut c = match graph.unique_ctrl_out(other) {
        Some(c) => c,
        None => return DeoptReason::None,
    };
    if graph.op(c) == Operator::Control(ControlOp::Region) {
        c = match graph.unique_ctrl_out(c) {
            Some(c) => c,
            None => return DeoptReason::None,
        };
    }
    match graph.op(c) {
        Operator::Control(ControlOp::UncommonTrap(reason)) => reason,
        _ => DeoptReason::None,
    }
}

// =============================================================================
// Template Assertion Predicate
// =============================================================================

/// A template of the checks to create whenever its loop is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateAssertionPredicate {
    node: NodeId,
}

impl TemplateAssertionPredicate {
    pub const INIT_VALUE: usize = 1;
    pub const LAST_VALUE: usize = 2;

    pub fn new(graph: &Graph, n: NodeId) -> Option<Self> {
        (n.is_valid() && !graph.is_dead(n) && graph.op(n).is_template_assertion_predicate())
            .then_some(Self { node: n })
    }

    #[inline]
    pub fn entry(&self, graph: &Graph) -> NodeId {
        graph.input(self.node, 0)
    }

    #[inline]
    pub fn head(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn tail(&self) -> NodeId {
        self.node
    }

    pub fn init_value_bool(&self, graph: &Graph) -> NodeId {
        graph.input(self.node, Self::INIT_VALUE)
    }

    pub fn last_value_bool(&self, graph: &Graph) -> NodeId {
        graph.input(self.node, Self::LAST_VALUE)
    }

    /// Branch kinds for the Initialized predicates of the init and last
    /// value.
    pub fn if_kinds(&self, graph: &Graph) -> (IfKind, IfKind) {
        match graph.node(self.node).attrs {
            NodeAttrs::Template {
                init_value_if,
                last_value_if,
            } => (init_value_if, last_value_if),
            _ => (IfKind::RangeCheck, IfKind::RangeCheck),
        }
    }

    pub fn is_useless(&self, graph: &Graph) -> bool {
        graph.node(self.node).is_useless()
    }
}

// =============================================================================
// Initialized Assertion Predicate
// =============================================================================

/// A concrete check derived from a template. It can never fail: the
/// failing side ends in a `Halt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializedAssertionPredicate {
    iff: NodeId,
    success_proj: NodeId,
}

impl InitializedAssertionPredicate {
    pub fn new(graph: &Graph, proj: NodeId) -> Option<Self> {
        Self::is_success_proj(graph, proj).then(|| Self {
            iff: graph.input(proj, 0),
            success_proj: proj,
        })
    }

    /// `proj` is the true projection of an `If` on an assertion condition
    /// (or a constant, while folding) whose false projection ends in a
    /// `Halt`.
    pub fn is_success_proj(graph: &Graph, proj: NodeId) -> bool {
        if !proj.is_valid() || graph.is_dead(proj) || !graph.is_if_true(proj) {
            return false;
        }
        let iff = graph.input(proj, 0);
        if !graph.op(iff).is_if() || graph.outcnt(iff) != 2 {
            return false;
        }
        Self::has_opaque_or_con(graph, iff) && Self::has_halt(graph, proj)
    }

    fn has_opaque_or_con(graph: &Graph, iff: NodeId) -> bool {
        let cond = graph.input(iff, 1);
        cond.is_valid()
            && matches!(
                graph.op(cond),
                Operator::ConI(_) | Operator::Opaque(OpaqueOp::AssertionPredicate)
            )
    }

    fn has_halt(graph: &Graph, proj: NodeId) -> bool {
        let Some(other) = graph.other_proj(proj) else {
            return false;
        };
        graph
            .unique_out(other)
            .is_some_and(|out| graph.op(out) == Operator::Control(ControlOp::Halt))
    }

    #[inline]
    pub fn entry(&self, graph: &Graph) -> NodeId {
        graph.input(self.iff, 0)
    }

    #[inline]
    pub fn head(&self) -> NodeId {
        self.iff
    }

    #[inline]
    pub fn tail(&self) -> NodeId {
        self.success_proj
    }

    pub fn assertion_type(&self, graph: &Graph) -> AssertionPredicateType {
        match graph.node(self.iff).attrs {
            NodeAttrs::InitializedAssertion(ty) => ty,
            _ => AssertionPredicateType::None,
        }
    }
}

// =============================================================================
// Predicate
// =============================================================================

/// Any predicate, as handed to predicate walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Parse(ParsePredicate),
    Runtime(RuntimePredicate),
    TemplateAssertion(TemplateAssertionPredicate),
    InitializedAssertion(InitializedAssertionPredicate),
}

impl Predicate {
    /// Classify the predicate ending at control node `tail`.
    pub fn classify(graph: &Graph, tail: NodeId) -> Option<Self> {
        if let Some(t) = TemplateAssertionPredicate::new(graph, tail) {
            return Some(Predicate::TemplateAssertion(t));
        }
        if let Some(p) = ParsePredicate::from_success_proj(graph, tail) {
            return Some(Predicate::Parse(p));
        }
        if RuntimePredicate::is_success_proj_any(graph, tail) {
            return Some(Predicate::Runtime(RuntimePredicate::new(graph, tail)));
        }
        InitializedAssertionPredicate::new(graph, tail).map(Predicate::InitializedAssertion)
    }

    pub fn entry(&self, graph: &Graph) -> NodeId {
        match self {
            Predicate::Parse(p) => p.entry(graph),
            Predicate::Runtime(p) => p.entry(graph),
            Predicate::TemplateAssertion(p) => p.entry(graph),
            Predicate::InitializedAssertion(p) => p.entry(graph),
        }
    }

    pub fn head(&self) -> NodeId {
        match self {
            Predicate::Parse(p) => p.head(),
            Predicate::Runtime(p) => p.head(),
            Predicate::TemplateAssertion(p) => p.head(),
            Predicate::InitializedAssertion(p) => p.head(),
        }
    }

    pub fn tail(&self) -> NodeId {
        match self {
            Predicate::Parse(p) => p.tail(),
            Predicate::Runtime(p) => p.tail(),
            Predicate::TemplateAssertion(p) => p.tail(),
            Predicate::InitializedAssertion(p) => p.tail(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
