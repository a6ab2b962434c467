//! Cloning of Template Assertion Predicate bools.
//!
//! A template bool is an expression over `OpaqueLoopInit` and
//! `OpaqueLoopStride` leaves:
//!
//! ```text
//!   Bool
//!     Cmp
//!       AddI ---- offset (shared, not part of the expression)
//!         MulI
//!           OpaqueLoopInit(init)
//!           scale
//!       range (shared)
//! ```
//!
//! Cloning copies exactly the nodes on a path from the `Bool` to a leaf.
//! Everything else is shared with the original. The leaves themselves are
//! handled by an [`OpaqueLoopTransform`].

use log::trace;

use crate::error::{LoopOptError, Result};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{OpaqueOp, Operator};
use crate::opt::phase::{LoopOptimizer, OldNew};

/// What happens to the opaque leaves of a cloned template bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpaqueLoopTransform {
    /// Clone each leaf.
    Clone,
    /// Clone each leaf and give the `OpaqueLoopInit` clone a new input.
    CloneWithNewInit(NodeId),
    /// Replace the leaves by real values. Without a stride value, an
    /// `OpaqueLoopStride` leaf is an error.
    ReplaceWithValues { init: NodeId, stride: Option<NodeId> },
    /// Replace each leaf by its input.
    FoldAway,
}

/// Applies an [`OpaqueLoopTransform`] during one clone operation.
///
/// A transformer remembers what it produced for every node, so cloning the
/// init and last value bool of a template with the same transformer
/// clones shared sub-expressions and leaves only once.
#[derive(Debug)]
pub struct OpaqueLoopNodeTransformer {
    strategy: OpaqueLoopTransform,
    ctrl: NodeId,
    transformed: OldNew,
    /// First node index of the first clone operation. Results memoized by
    /// an earlier operation are still new relative to it.
    first_new: Option<u32>,
}

impl OpaqueLoopNodeTransformer {
    /// Clones are placed at `ctrl`.
    pub fn new(strategy: OpaqueLoopTransform, ctrl: NodeId) -> Self {
        Self {
            strategy,
            ctrl,
            transformed: OldNew::default(),
            first_new: None,
        }
    }

    pub fn strategy(&self) -> OpaqueLoopTransform {
        self.strategy
    }

    fn transform_opaque_init(&mut self, opt: &mut LoopOptimizer<'_>, init: NodeId) -> NodeId {
        match self.strategy {
            OpaqueLoopTransform::Clone => opt.clone_and_register(init, self.ctrl),
            OpaqueLoopTransform::CloneWithNewInit(new_init) => {
                let clone = opt.graph_mut().clone_node(init);
                opt.graph_mut().replace_input(clone, 1, new_init);
                opt.register_new_node(clone, self.ctrl);
                clone
            }
            OpaqueLoopTransform::ReplaceWithValues { init: value, .. } => value,
            OpaqueLoopTransform::FoldAway => opt.graph().input(init, 1),
        }
    }

    fn transform_opaque_stride(
        &mut self,
        opt: &mut LoopOptimizer<'_>,
        stride: NodeId,
    ) -> Result<NodeId> {
        Ok(match self.strategy {
            OpaqueLoopTransform::Clone | OpaqueLoopTransform::CloneWithNewInit(_) => {
                opt.clone_and_register(stride, self.ctrl)
            }
            OpaqueLoopTransform::ReplaceWithValues { stride: value, .. } => {
                value.ok_or(LoopOptError::UnexpectedOpaqueStride(stride))?
            }
            OpaqueLoopTransform::FoldAway => opt.graph().input(stride, 1),
        })
    }

    fn transform_leaf(&mut self, opt: &mut LoopOptimizer<'_>, leaf: NodeId) -> Result<NodeId> {
        match opt.graph().op(leaf) {
            Operator::Opaque(OpaqueOp::LoopInit) => Ok(self.transform_opaque_init(opt, leaf)),
            _ => self.transform_opaque_stride(opt, leaf),
        }
    }
}

/// A bool input of a Template Assertion Predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateAssertionPredicateBool {
    bol: NodeId,
}

/// Leaves found below a template bool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpaqueLeaves {
    pub init: Option<NodeId>,
    pub stride: Option<NodeId>,
}

impl TemplateAssertionPredicateBool {
    pub fn new(graph: &Graph, bol: NodeId) -> Option<Self> {
        (bol.is_valid() && graph.op(bol).is_bool()).then_some(Self { bol })
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.bol
    }

    /// Clone with fresh copies of the opaque leaves.
    pub fn clone(&self, opt: &mut LoopOptimizer<'_>, ctrl: NodeId) -> Result<NodeId> {
        let mut t = OpaqueLoopNodeTransformer::new(OpaqueLoopTransform::Clone, ctrl);
        self.clone_with(opt, &mut t)
    }

    /// Clone, and make the `OpaqueLoopInit` clone stand for `new_init`.
    pub fn clone_update_opaque_init(
        &self,
        opt: &mut LoopOptimizer<'_>,
        new_init: NodeId,
        ctrl: NodeId,
    ) -> Result<NodeId> {
        let mut t =
            OpaqueLoopNodeTransformer::new(OpaqueLoopTransform::CloneWithNewInit(new_init), ctrl);
        self.clone_with(opt, &mut t)
    }

    /// Clone with every opaque leaf replaced by its input. The result is a
    /// plain bool without opaque loop nodes.
    pub fn clone_remove_opaque_loop_nodes(
        &self,
        opt: &mut LoopOptimizer<'_>,
        ctrl: NodeId,
    ) -> Result<NodeId> {
        let mut t = OpaqueLoopNodeTransformer::new(OpaqueLoopTransform::FoldAway, ctrl);
        self.clone_with(opt, &mut t)
    }

    /// Clone the nodes between the bool and its opaque leaves, applying the
    /// transformer's strategy to the leaves.
    ///
    /// Depth-first with an explicit stack. A node is cloned once all its
    /// inputs are done, and only if one of them changed.
    pub fn clone_with(
        &self,
        opt: &mut LoopOptimizer<'_>,
        transformer: &mut OpaqueLoopNodeTransformer,
    ) -> Result<NodeId> {
        let idx_before = *transformer.first_new.get_or_insert(opt.graph().unique());
        let mut found_init = false;
        let mut stack: Vec<(NodeId, usize)> = vec![(self.bol, 1)];

        while let Some(&(n, i)) = stack.last() {
            if transformer.transformed.contains_key(&n) {
                stack.pop();
                continue;
            }
            let op = opt.graph().op(n);
            if op.is_opaque_loop_node() {
                found_init |= op == Operator::Opaque(OpaqueOp::LoopInit);
                let replacement = transformer.transform_leaf(opt, n)?;
                trace!(target: "loopopts", "opaque leaf {n:?} -> {replacement:?}");
                transformer.transformed.insert(n, replacement);
                stack.pop();
                continue;
            }

            if i < opt.graph().req(n) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let input = opt.graph().input(n, i);
                if input.is_valid()
                    && opt.graph().op(input).is_assertion_predicate_bool_op()
                    && !transformer.transformed.contains_key(&input)
                {
                    stack.push((input, 1));
                }
                continue;
            }

            stack.pop();
            let result = Self::clone_if_changed(opt, transformer, n);
            transformer.transformed.insert(n, result);
        }

        if !found_init && !Self::has_transformed_init(opt.graph(), transformer) {
            return Err(LoopOptError::MissingOpaqueInit(self.bol));
        }
        let result = transformer
            .transformed
            .get(&self.bol)
            .copied()
            .ok_or(LoopOptError::CloneMissing(self.bol))?;
        if result.index() < idx_before {
            return Err(LoopOptError::MalformedPredicate {
                node: self.bol,
                reason: "cloned template bool is not a new node",
            });
        }
        Ok(result)
    }

    /// The init leaf may already have been handled while cloning the other
    /// bool of the same template.
    fn has_transformed_init(graph: &Graph, transformer: &OpaqueLoopNodeTransformer) -> bool {
        transformer
            .transformed
            .keys()
            .any(|&n| graph.op(n) == Operator::Opaque(OpaqueOp::LoopInit))
    }

    fn clone_if_changed(
        opt: &mut LoopOptimizer<'_>,
        transformer: &OpaqueLoopNodeTransformer,
        n: NodeId,
    ) -> NodeId {
        let changed: Vec<(usize, NodeId)> = opt
            .graph()
            .inputs(n)
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, input)| {
                transformer
                    .transformed
                    .get(input)
                    .filter(|&&new| new != *input)
                    .map(|&new| (i, new))
            })
            .collect();
        if changed.is_empty() {
            return n;
        }
        let clone = opt.graph_mut().clone_node(n);
        for (i, new) in changed {
            opt.graph_mut().replace_input(clone, i, new);
        }
        opt.register_new_node(clone, transformer.ctrl);
        trace!(target: "loopopts", "cloned {} {n:?} -> {clone:?}", opt.graph().op(n));
        clone
    }

    /// Opaque leaves reachable from the bool through expression nodes.
    pub fn find_opaque_leaves(&self, graph: &Graph) -> OpaqueLeaves {
        let mut leaves = OpaqueLeaves::default();
        let mut visited = OldNew::default();
        let mut stack = vec![self.bol];
        while let Some(n) = stack.pop() {
            if visited.insert(n, n).is_some() {
                continue;
            }
            match graph.op(n) {
                Operator::Opaque(OpaqueOp::LoopInit) => leaves.init = Some(n),
                Operator::Opaque(OpaqueOp::LoopStride) => leaves.stride = Some(n),
                _ => stack.extend(
                    graph.inputs(n).iter().skip(1).copied().filter(|&input| {
                        input.is_valid() && graph.op(input).is_assertion_predicate_bool_op()
                    }),
                ),
            }
        }
        leaves
    }

    /// Make the `OpaqueLoopStride` leaf stand for `new_stride`.
    pub fn update_opaque_stride(&self, opt: &mut LoopOptimizer<'_>, new_stride: NodeId) -> Result<()> {
        let stride = self
            .find_opaque_leaves(opt.graph())
            .stride
            .ok_or(LoopOptError::MalformedPredicate {
                node: self.bol,
                reason: "last value bool has no OpaqueLoopStride",
            })?;
        opt.graph_mut().replace_input(stride, 1, new_stride);
        opt.worklist_mut().push(stride);
        Ok(())
    }

    /// The init value bool has an init leaf and no stride leaf. The last
    /// value bool has an init leaf.
    pub fn verify(&self, graph: &Graph, is_init_value: bool) -> Result<()> {
        let leaves = self.find_opaque_leaves(graph);
        if leaves.init.is_none() {
            return Err(LoopOptError::MissingOpaqueInit(self.bol));
        }
        if is_init_value {
            if let Some(stride) = leaves.stride {
                return Err(LoopOptError::UnexpectedOpaqueStride(stride));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::LoopGraphBuilder;
    use crate::ir::operators::{BoolTest, CmpKind, ParmKind, Width};
    use crate::opt::config::LoopOptsConfig;

    /// `(x + OpaqueLoopInit(init)) <u range`
    fn template_bool(g: &mut Graph) -> (NodeId, NodeId, NodeId, NodeId, NodeId) {
        let x = g.parm(ParmKind::Int(10));
        let range = g.parm(ParmKind::Int(11));
        let init = g.con_i(0);
        let opaque = g.opaque(OpaqueOp::LoopInit, init);
        let add = g.add_i(x, opaque);
        let cmp = g.cmp(CmpKind::Unsigned, Width::Int, add, range);
        let bol = g.bool(BoolTest::Lt, cmp);
        (bol, x, range, opaque, init)
    }

    #[test]
    fn test_clone_shares_unrelated_inputs() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let (bol, x, range, opaque, _) = template_bool(&mut g);
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let b = TemplateAssertionPredicateBool::new(opt.graph(), bol).unwrap();
        let new_bol = b.clone(&mut opt, ctrl).unwrap();
        let g = opt.graph();

        assert_ne!(new_bol, bol);
        let new_cmp = g.input(new_bol, 1);
        assert_ne!(new_cmp, g.input(bol, 1));
        assert_eq!(g.input(new_cmp, 2), range);
        let new_add = g.input(new_cmp, 1);
        assert_ne!(new_add, g.input(g.input(bol, 1), 1));
        assert_eq!(g.input(new_add, 1), x);
        let new_opaque = g.input(new_add, 2);
        assert_ne!(new_opaque, opaque);
        assert_eq!(g.op(new_opaque), Operator::Opaque(OpaqueOp::LoopInit));
    }

    #[test]
    fn test_fold_away_substitutes_init() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let (bol, x, range, _, init) = template_bool(&mut g);
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let b = TemplateAssertionPredicateBool::new(opt.graph(), bol).unwrap();
        let folded = b.clone_remove_opaque_loop_nodes(&mut opt, ctrl).unwrap();
        let g = opt.graph();

        let add = g.input(g.input(folded, 1), 1);
        assert_eq!(g.inputs(add)[1..], [x, init]);
        assert_eq!(g.input(g.input(folded, 1), 2), range);
        let leaves = TemplateAssertionPredicateBool::new(g, folded)
            .unwrap()
            .find_opaque_leaves(g);
        assert_eq!(leaves, OpaqueLeaves::default());
    }

    #[test]
    fn test_shared_leaf_cloned_once() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let x = g.parm(ParmKind::Int(10));
        let init = g.con_i(0);
        let opaque = g.opaque(OpaqueOp::LoopInit, init);
        // Both compare operands reach the same leaf.
        let a = g.add_i(opaque, x);
        let b2 = g.sub_i(opaque, x);
        let cmp = g.cmp(CmpKind::Signed, Width::Int, a, b2);
        let bol = g.bool(BoolTest::Le, cmp);
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let before = opt.graph().live_nodes();
        let new_bol = TemplateAssertionPredicateBool::new(opt.graph(), bol)
            .unwrap()
            .clone(&mut opt, ctrl)
            .unwrap();
        let g = opt.graph();
        // Bool, Cmp, AddI, SubI and one OpaqueLoopInit.
        assert_eq!(g.live_nodes(), before + 5);
        let new_cmp = g.input(new_bol, 1);
        assert_eq!(g.input(g.input(new_cmp, 1), 1), g.input(g.input(new_cmp, 2), 1));
    }

    #[test]
    fn test_missing_init_is_an_error() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let x = g.parm(ParmKind::Int(10));
        let zero = g.con_i(0);
        let cmp = g.cmp(CmpKind::Signed, Width::Int, x, zero);
        let bol = g.bool(BoolTest::Lt, cmp);
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let result = TemplateAssertionPredicateBool::new(opt.graph(), bol)
            .unwrap()
            .clone(&mut opt, ctrl);
        assert_eq!(result, Err(LoopOptError::MissingOpaqueInit(bol)));
    }

    #[test]
    fn test_replace_without_stride_value() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let init = g.con_i(0);
        let stride = g.con_i(1);
        let oi = g.opaque(OpaqueOp::LoopInit, init);
        let os = g.opaque(OpaqueOp::LoopStride, stride);
        let add = g.add_i(oi, os);
        let limit = g.parm(ParmKind::Int(1));
        let cmp = g.cmp(CmpKind::Signed, Width::Int, add, limit);
        let bol = g.bool(BoolTest::Lt, cmp);
        let new_init = g.parm(ParmKind::Int(12));
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let b = TemplateAssertionPredicateBool::new(opt.graph(), bol).unwrap();
        assert!(b.verify(opt.graph(), false).is_ok());
        assert_eq!(
            b.verify(opt.graph(), true),
            Err(LoopOptError::UnexpectedOpaqueStride(os))
        );
        let mut t = OpaqueLoopNodeTransformer::new(
            OpaqueLoopTransform::ReplaceWithValues {
                init: new_init,
                stride: None,
            },
            ctrl,
        );
        assert_eq!(
            b.clone_with(&mut opt, &mut t),
            Err(LoopOptError::UnexpectedOpaqueStride(os))
        );
    }

    #[test]
    fn test_replace_with_values() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let init = g.con_i(0);
        let stride = g.con_i(1);
        let oi = g.opaque(OpaqueOp::LoopInit, init);
        let os = g.opaque(OpaqueOp::LoopStride, stride);
        let add = g.add_i(oi, os);
        let limit = g.parm(ParmKind::Int(1));
        let cmp = g.cmp(CmpKind::Signed, Width::Int, add, limit);
        let bol = g.bool(BoolTest::Lt, cmp);
        let new_init = g.parm(ParmKind::Int(12));
        let new_stride = g.con_i(4);
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let mut t = OpaqueLoopNodeTransformer::new(
            OpaqueLoopTransform::ReplaceWithValues {
                init: new_init,
                stride: Some(new_stride),
            },
            ctrl,
        );
        let new_bol = TemplateAssertionPredicateBool::new(opt.graph(), bol)
            .unwrap()
            .clone_with(&mut opt, &mut t)
            .unwrap();
        let g = opt.graph();

        assert_ne!(new_bol, bol);
        let new_cmp = g.input(new_bol, 1);
        assert_ne!(new_cmp, cmp);
        assert_eq!(g.input(new_cmp, 2), limit);
        let new_add = g.input(new_cmp, 1);
        assert_ne!(new_add, add);
        assert_eq!(g.inputs(new_add)[1..], [new_init, new_stride]);
        let leaves = TemplateAssertionPredicateBool::new(g, new_bol)
            .unwrap()
            .find_opaque_leaves(g);
        assert_eq!(leaves, OpaqueLeaves::default());
    }

    #[test]
    fn test_same_bool_cloned_twice_with_one_transformer() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let (bol, ..) = template_bool(&mut g);
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let b = TemplateAssertionPredicateBool::new(opt.graph(), bol).unwrap();
        let mut t = OpaqueLoopNodeTransformer::new(OpaqueLoopTransform::Clone, ctrl);
        let first = b.clone_with(&mut opt, &mut t).unwrap();
        let live = opt.graph().live_nodes();
        // Memoized: the second clone is the first one, and still valid.
        assert_eq!(b.clone_with(&mut opt, &mut t), Ok(first));
        assert_eq!(opt.graph().live_nodes(), live);
        assert_ne!(first, bol);
    }

    #[test]
    fn test_update_opaque_init_and_stride() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let init = g.con_i(0);
        let stride = g.con_i(1);
        let oi = g.opaque(OpaqueOp::LoopInit, init);
        let os = g.opaque(OpaqueOp::LoopStride, stride);
        let add = g.add_i(oi, os);
        let limit = g.parm(ParmKind::Int(1));
        let cmp = g.cmp(CmpKind::Signed, Width::Int, add, limit);
        let bol = g.bool(BoolTest::Lt, cmp);
        let new_init = g.parm(ParmKind::Int(12));
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let ctrl = opt.loop_entry(shape.head);

        let b = TemplateAssertionPredicateBool::new(opt.graph(), bol).unwrap();
        let new_bol = b.clone_update_opaque_init(&mut opt, new_init, ctrl).unwrap();
        let leaves = TemplateAssertionPredicateBool::new(opt.graph(), new_bol)
            .unwrap()
            .find_opaque_leaves(opt.graph());
        let new_oi = leaves.init.unwrap();
        assert_ne!(new_oi, oi);
        assert_eq!(opt.graph().input(new_oi, 1), new_init);
        assert_ne!(leaves.stride.unwrap(), os);

        let two = opt.graph_mut().con_i(2);
        b.update_opaque_stride(&mut opt, two).unwrap();
        assert_eq!(opt.graph().input(os, 1), two);
    }
}
