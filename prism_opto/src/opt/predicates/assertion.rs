//! Template and Initialized Assertion Predicates.
//!
//! A Template Assertion Predicate describes, in terms of a loop's opaque
//! init and stride, the range checks that were hoisted out of it. Whenever
//! a loop is copied, its templates are copied with it and initialized for
//! the copy: each template yields two Initialized Assertion Predicates,
//! one checking the init value and one checking the last value of the
//! induction variable.
//!
//! Initialized Assertion Predicates can never fail at runtime. If the loop
//! they guard is proven dead by type information, they fold and take the
//! dead loop with them, which keeps the graph consistent.

use log::debug;

use super::block::{PredicateChain, PredicatesForLoop};
use super::model::{InitializedAssertionPredicate, Predicate, TemplateAssertionPredicate};
use super::opaque::{OpaqueLoopNodeTransformer, OpaqueLoopTransform, TemplateAssertionPredicateBool};
use crate::error::{LoopOptError, Result};
use crate::ir::loops::counted_loop_info;
use crate::ir::node::{AssertionPredicateType, BranchProfile, NodeFlags, NodeId};
use crate::ir::operators::{ArithOp, BoolTest, CmpKind, IfKind, OpaqueOp, Width};
use crate::ir::types::TypeInt;
use crate::opt::phase::{LoopOptimizer, OldNew};

// =============================================================================
// Target Loop Membership
// =============================================================================

/// Decides whether a data node pinned at a template belongs to the loop the
/// template is being cloned to.
#[derive(Debug, Clone, Copy)]
pub enum NodeInTargetLoop<'a> {
    /// The target is the loop copy; its nodes have an index of at least
    /// `first`.
    Cloned { first: u32 },
    /// The target is the original loop; its nodes have a clone at or above
    /// `first`.
    Original { first: u32, old_new: &'a OldNew },
}

impl NodeInTargetLoop<'_> {
    pub fn check(&self, n: NodeId) -> bool {
        match *self {
            NodeInTargetLoop::Cloned { first } => n.index() >= first,
            NodeInTargetLoop::Original { first, old_new } => {
                n.index() < first && old_new.get(&n).is_some_and(|c| c.index() >= first)
            }
        }
    }
}

// =============================================================================
// Template Assertion Predicate
// =============================================================================

impl TemplateAssertionPredicate {
    /// Clone this template to `new_ctrl`, transforming the opaque leaves of
    /// both bools with `strategy`. Data nodes pinned at this template that
    /// belong to the target loop are moved to the clone.
    pub fn clone_to(
        &self,
        opt: &mut LoopOptimizer<'_>,
        new_ctrl: NodeId,
        strategy: OpaqueLoopTransform,
        node_in_target: &NodeInTargetLoop<'_>,
    ) -> Result<TemplateAssertionPredicate> {
        let mut transformer = OpaqueLoopNodeTransformer::new(strategy, new_ctrl);
        let init_bool = self.bool_at(opt, Self::INIT_VALUE)?;
        let new_init_bool = init_bool.clone_with(opt, &mut transformer)?;
        let last_bool = self.bool_at(opt, Self::LAST_VALUE)?;
        let new_last_bool = last_bool.clone_with(opt, &mut transformer)?;
        self.create_and_init(opt, new_ctrl, new_init_bool, new_last_bool, node_in_target)
    }

    fn bool_at(&self, opt: &LoopOptimizer<'_>, index: usize) -> Result<TemplateAssertionPredicateBool> {
        let bol = opt.graph().input(self.head(), index);
        TemplateAssertionPredicateBool::new(opt.graph(), bol).ok_or(
            LoopOptError::MalformedPredicate {
                node: self.head(),
                reason: "template input is not a bool",
            },
        )
    }

    fn create_and_init(
        &self,
        opt: &mut LoopOptimizer<'_>,
        new_ctrl: NodeId,
        new_init_bool: NodeId,
        new_last_bool: NodeId,
        node_in_target: &NodeInTargetLoop<'_>,
    ) -> Result<TemplateAssertionPredicate> {
        let old = self.head();
        let clone = opt.graph_mut().clone_node(old);

        let mut dependents: Vec<NodeId> = opt
            .graph()
            .uses(old)
            .iter()
            .copied()
            .filter(|&u| {
                let g = opt.graph();
                !g.is_cfg(u) && !g.is_dead(u) && g.input(u, 0) == old && node_in_target.check(u)
            })
            .collect();
        dependents.sort_unstable();
        dependents.dedup();
        for u in dependents {
            opt.graph_mut().replace_input(u, 0, clone);
            opt.worklist_mut().push(u);
        }

        let g = opt.graph_mut();
        g.replace_input(clone, Self::INIT_VALUE, new_init_bool);
        g.replace_input(clone, Self::LAST_VALUE, new_last_bool);
        g.replace_input(clone, 0, new_ctrl);
        let l = opt.get_loop(new_ctrl);
        opt.register_control(clone, l, new_ctrl);

        TemplateAssertionPredicate::new(opt.graph(), clone).ok_or(LoopOptError::MalformedPredicate {
            node: clone,
            reason: "clone of a template is not a template",
        })
    }

    /// Create an init value and a last value Initialized Assertion
    /// Predicate from this template and insert them into `chain`.
    pub fn initialize(&self, opt: &mut LoopOptimizer<'_>, chain: &mut PredicateChain) -> Result<()> {
        self.initialize_with(opt, chain, OpaqueLoopTransform::FoldAway)
    }

    /// Like [`TemplateAssertionPredicate::initialize`], with `init` and
    /// `stride` standing in for the opaque leaves instead of their current
    /// inputs.
    pub fn initialize_with_values(
        &self,
        opt: &mut LoopOptimizer<'_>,
        chain: &mut PredicateChain,
        init: NodeId,
        stride: NodeId,
    ) -> Result<()> {
        let strategy = OpaqueLoopTransform::ReplaceWithValues {
            init,
            stride: Some(stride),
        };
        self.initialize_with(opt, chain, strategy)
    }

    fn initialize_with(
        &self,
        opt: &mut LoopOptimizer<'_>,
        chain: &mut PredicateChain,
        strategy: OpaqueLoopTransform,
    ) -> Result<()> {
        let (init_if, last_if) = self.if_kinds(opt.graph());
        for (index, ty, kind) in [
            (Self::INIT_VALUE, AssertionPredicateType::InitValue, init_if),
            (Self::LAST_VALUE, AssertionPredicateType::LastValue, last_if),
        ] {
            let new_ctrl = chain.entry(opt.graph());
            let mut transformer = OpaqueLoopNodeTransformer::new(strategy, new_ctrl);
            let bol = self.bool_at(opt, index)?.clone_with(opt, &mut transformer)?;
            let initialized =
                InitializedAssertionPredicate::create(opt, new_ctrl, bol, kind, ty)?;
            chain.insert_new_predicate(opt, Predicate::InitializedAssertion(initialized));
        }
        Ok(())
    }

    /// Mark useless; IGVN removes it.
    pub fn kill(&self, opt: &mut LoopOptimizer<'_>) {
        opt.graph_mut().set_flag(self.head(), NodeFlags::USELESS, true);
        opt.worklist_mut().push(self.head());
    }

    pub fn verify(&self, opt: &LoopOptimizer<'_>) -> Result<()> {
        self.bool_at(opt, Self::INIT_VALUE)?.verify(opt.graph(), true)?;
        self.bool_at(opt, Self::LAST_VALUE)?.verify(opt.graph(), false)
    }
}

// =============================================================================
// Initialized Assertion Predicate
// =============================================================================

impl InitializedAssertionPredicate {
    /// Build `If(OpaqueAssertionPredicate(bol))` at `new_ctrl` whose false
    /// projection ends in a `Halt`.
    pub fn create(
        opt: &mut LoopOptimizer<'_>,
        new_ctrl: NodeId,
        bol: NodeId,
        kind: IfKind,
        ty: AssertionPredicateType,
    ) -> Result<InitializedAssertionPredicate> {
        let l = opt.get_loop(new_ctrl);
        let g = opt.graph_mut();
        let opaque = g.opaque(OpaqueOp::AssertionPredicate, bol);
        let iff = g.if_node(kind, new_ctrl, opaque, BranchProfile::ALWAYS);
        g.set_assertion_predicate_type(iff, ty);
        let success = g.if_true(iff);
        let fail = g.if_false(iff);
        // Halt gets its own frame pointer.
        let frame = g.frame_ptr();
        let halt = g.halt(fail, frame);
        let start = g.start;

        opt.register_new_node(opaque, new_ctrl);
        opt.register_control(iff, l, new_ctrl);
        opt.register_control(success, l, iff);
        opt.register_control(fail, l, iff);
        opt.register_new_node(frame, start);
        opt.register_control(halt, l, fail);
        debug!(target: "loopopts", "initialized assertion predicate {iff:?} ({ty:?}) at {new_ctrl:?}");

        InitializedAssertionPredicate::new(opt.graph(), success).ok_or(
            LoopOptError::MalformedPredicate {
                node: iff,
                reason: "new initialized assertion predicate not recognized",
            },
        )
    }

    /// Replace the condition with constant true; IGVN folds the check.
    pub fn kill(&self, opt: &mut LoopOptimizer<'_>) {
        let one = opt.graph_mut().con_i(1);
        opt.graph_mut().replace_input(self.head(), 1, one);
        opt.worklist_mut().push(self.head());
    }
}

// =============================================================================
// Assertion Predicates of a Loop
// =============================================================================

/// The Assertion Predicates of one loop, as used by loop-splitting
/// transformations.
#[derive(Debug, Clone, Copy)]
pub struct AssertionPredicates {
    head: NodeId,
}

impl AssertionPredicates {
    pub fn new(head: NodeId) -> Self {
        Self { head }
    }

    fn for_each_template<F>(&self, opt: &mut LoopOptimizer<'_>, mut f: F) -> Result<()>
    where
        F: FnMut(&mut LoopOptimizer<'_>, TemplateAssertionPredicate) -> Result<()>,
    {
        let entry = opt.loop_entry(self.head);
        let walk = PredicatesForLoop::new(entry, opt.config());
        walk.for_each(opt, |opt, p| match p {
            Predicate::TemplateAssertion(t) if !t.is_useless(opt.graph()) => f(opt, t),
            _ => Ok(()),
        })
    }

    /// Clone every template of this loop to the counted loop `target`,
    /// using the target's init value, and initialize the clones. Returns
    /// the top of the new predicates above `target`.
    pub fn clone_to_loop(
        &self,
        opt: &mut LoopOptimizer<'_>,
        target: NodeId,
        node_in_target: &NodeInTargetLoop<'_>,
    ) -> Result<NodeId> {
        let info = counted_loop_info(opt.graph(), target).ok_or(LoopOptError::NotCountedLoop(target))?;
        let mut chain = PredicateChain::new(opt.graph(), target);
        self.for_each_template(opt, |opt, t| {
            let ctrl = chain.entry(opt.graph());
            let cloned = t.clone_to(
                opt,
                ctrl,
                OpaqueLoopTransform::CloneWithNewInit(info.init),
                node_in_target,
            )?;
            chain.insert_new_predicate(opt, Predicate::TemplateAssertion(cloned));
            cloned.initialize(opt, &mut chain)?;
            debug!(target: "loopopts", "template {:?} cloned to loop {target:?} as {:?}", t.head(), cloned.head());
            Ok(())
        })?;
        Ok(chain.tail())
    }

    /// Like [`AssertionPredicates::clone_to_loop`], then kill the
    /// templates of this loop.
    pub fn move_to_loop(
        &self,
        opt: &mut LoopOptimizer<'_>,
        target: NodeId,
        node_in_target: &NodeInTargetLoop<'_>,
    ) -> Result<NodeId> {
        let mut sources = Vec::new();
        self.for_each_template(opt, |_, t| {
            sources.push(t);
            Ok(())
        })?;
        let tail = self.clone_to_loop(opt, target, node_in_target)?;
        for t in sources {
            t.kill(opt);
        }
        Ok(tail)
    }

    /// Create a template for the range check `scale * iv + offset <u range`
    /// directly above this counted loop and initialize it.
    pub fn create(
        &self,
        opt: &mut LoopOptimizer<'_>,
        if_kind: IfKind,
        scale: i32,
        offset: NodeId,
        range: NodeId,
    ) -> Result<TemplateAssertionPredicate> {
        let info =
            counted_loop_info(opt.graph(), self.head).ok_or(LoopOptError::NotCountedLoop(self.head))?;
        let mut chain = PredicateChain::new(opt.graph(), self.head);
        let ctrl = chain.entry(opt.graph());

        let iv_type = opt.graph().node(info.iv).ty.as_int().unwrap_or(TypeInt::INT);
        let offset_type = opt.graph().node(offset).ty.as_int().unwrap_or(TypeInt::INT);
        let overflow = may_overflow(scale, iv_type, offset_type);
        let if_kind = if overflow { IfKind::Plain } else { if_kind };

        let opaque_init = opt.graph_mut().opaque(OpaqueOp::LoopInit, info.init);
        opt.register_new_node(opaque_init, ctrl);
        let init_bool = build_range_check(opt, ctrl, opaque_init, scale, offset, range, overflow);

        let g = opt.graph_mut();
        let opaque_stride = g.opaque(OpaqueOp::LoopStride, info.stride);
        let diff = g.sub_i(opaque_stride, info.stride);
        let last = g.add_i(opaque_init, diff);
        let cast = g.cast_ii(last, iv_type);
        for n in [opaque_stride, diff, last, cast] {
            opt.register_new_node(n, ctrl);
        }
        let last_bool = build_range_check(opt, ctrl, cast, scale, offset, range, overflow);

        let template = opt.graph_mut().template_assertion_predicate(
            ctrl, init_bool, last_bool, if_kind, if_kind,
        );
        let l = opt.get_loop(ctrl);
        opt.register_control(template, l, ctrl);
        let template = TemplateAssertionPredicate::new(opt.graph(), template).ok_or(
            LoopOptError::MalformedPredicate {
                node: template,
                reason: "new template not recognized",
            },
        )?;
        chain.insert_new_predicate(opt, Predicate::TemplateAssertion(template));
        template.initialize_with_values(opt, &mut chain, info.init, info.stride)?;
        debug!(
            target: "loopopts",
            "template {:?} created for loop {:?} (scale {scale}, overflow {overflow})",
            template.head(),
            self.head
        );
        Ok(template)
    }

    /// The stride of this loop changed to `new_stride_con`: point every
    /// template's stride at it, initialize them again and kill the
    /// Initialized Assertion Predicates created before.
    pub fn update(&self, opt: &mut LoopOptimizer<'_>, new_stride_con: i32) -> Result<()> {
        let info =
            counted_loop_info(opt.graph(), self.head).ok_or(LoopOptError::NotCountedLoop(self.head))?;
        let index_before = opt.graph().unique();
        let new_stride = opt.graph_mut().con_i(new_stride_con);
        let mut chain = PredicateChain::new(opt.graph(), self.head);
        let entry = opt.loop_entry(self.head);
        let walk = PredicatesForLoop::new(entry, opt.config());
        walk.for_each(opt, |opt, p| {
            match p {
                Predicate::TemplateAssertion(t) if !t.is_useless(opt.graph()) => {
                    t.bool_at(opt, TemplateAssertionPredicate::LAST_VALUE)?
                        .update_opaque_stride(opt, new_stride)?;
                    chain.insert_existing_predicate(p);
                    t.initialize_with_values(opt, &mut chain, info.init, new_stride)?;
                }
                Predicate::InitializedAssertion(i) if i.head().index() < index_before => {
                    i.kill(opt);
                }
                _ => {}
            }
            Ok(())
        })
    }
}

/// `scale * iv + offset` may leave the int range.
fn may_overflow(scale: i32, iv: TypeInt, offset: TypeInt) -> bool {
    let a = i64::from(scale) * i64::from(iv.lo);
    let b = i64::from(scale) * i64::from(iv.hi);
    let lo = a.min(b) + i64::from(offset.lo);
    let hi = a.max(b) + i64::from(offset.hi);
    lo < i64::from(i32::MIN) || hi > i64::from(i32::MAX)
}

/// `scale * value + offset <u range`, in long arithmetic on overflow.
fn build_range_check(
    opt: &mut LoopOptimizer<'_>,
    ctrl: NodeId,
    value: NodeId,
    scale: i32,
    offset: NodeId,
    range: NodeId,
    overflow: bool,
) -> NodeId {
    let mut created = Vec::new();
    let g = opt.graph_mut();
    let bol = if overflow {
        let v = g.conv_i2l(value);
        let s = g.con_l(i64::from(scale));
        let scaled = g.arith(ArithOp::Mul, Width::Long, v, s);
        let off = g.conv_i2l(offset);
        let sum = g.arith(ArithOp::Add, Width::Long, scaled, off);
        let rng = g.conv_i2l(range);
        let cmp = g.cmp(CmpKind::Unsigned, Width::Long, sum, rng);
        created.extend([v, scaled, off, sum, rng, cmp]);
        g.bool(BoolTest::Lt, cmp)
    } else {
        let scaled = if scale == 1 {
            value
        } else {
            let s = g.con_i(scale);
            let scaled = g.arith(ArithOp::Mul, Width::Int, value, s);
            created.push(scaled);
            scaled
        };
        let sum = g.add_i(scaled, offset);
        let cmp = g.cmp(CmpKind::Unsigned, Width::Int, sum, range);
        created.extend([sum, cmp]);
        g.bool(BoolTest::Lt, cmp)
    };
    created.push(bol);
    for n in created {
        opt.register_new_node(n, ctrl);
    }
    bol
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::LoopGraphBuilder;
    use crate::ir::operators::{DeoptReason, Operator};
    use crate::opt::config::LoopOptsConfig;
    use crate::opt::predicates::block::Predicates;

    #[test]
    fn test_may_overflow() {
        assert!(!may_overflow(1, TypeInt::INT, TypeInt::con(0)));
        assert!(may_overflow(1, TypeInt::INT, TypeInt::con(1)));
        assert!(may_overflow(2, TypeInt::POS, TypeInt::con(0)));
        assert!(!may_overflow(-1, TypeInt::POS, TypeInt::con(0)));
    }

    #[test]
    fn test_node_in_target_loop() {
        let mut old_new = OldNew::default();
        old_new.insert(NodeId::new(5), NodeId::new(20));
        let cloned = NodeInTargetLoop::Cloned { first: 10 };
        let original = NodeInTargetLoop::Original {
            first: 10,
            old_new: &old_new,
        };
        assert!(cloned.check(NodeId::new(20)));
        assert!(!cloned.check(NodeId::new(5)));
        assert!(original.check(NodeId::new(5)));
        assert!(!original.check(NodeId::new(6)));
        assert!(!original.check(NodeId::new(20)));
    }

    #[test]
    fn test_create_template_and_initialize() {
        let (mut g, shape) = LoopGraphBuilder::new()
            .parse_predicates(&[DeoptReason::LoopLimitCheck])
            .build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let zero = opt.graph_mut().con_i(0);

        let template = AssertionPredicates::new(shape.head)
            .create(&mut opt, IfKind::RangeCheck, 1, zero, shape.range)
            .unwrap();

        assert!(template.verify(&opt).is_ok());
        // Template nearest the loop, then the init and last value checks.
        assert_eq!(opt.graph().input(shape.head, 1), template.head());
        let predicates = Predicates::new(opt.graph(), template.head());
        assert!(!predicates.assertion_block().is_empty());
        assert!(predicates.loop_limit_check_block().has_parse_predicate());
        assert_eq!(predicates.entry(), opt.graph().start);

        let above = template.entry(opt.graph());
        let init = InitializedAssertionPredicate::new(opt.graph(), above).unwrap();
        assert_eq!(init.assertion_type(opt.graph()), AssertionPredicateType::InitValue);
        let last = InitializedAssertionPredicate::new(opt.graph(), init.entry(opt.graph())).unwrap();
        assert_eq!(last.assertion_type(opt.graph()), AssertionPredicateType::LastValue);
        assert_eq!(
            opt.graph().op(last.head()),
            Operator::Control(crate::ir::ControlOp::If(IfKind::RangeCheck))
        );
        assert!(opt.graph().verify().is_ok());
    }

    #[test]
    fn test_create_with_overflow_uses_long_compare() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let offset = opt.graph_mut().parm(crate::ir::ParmKind::Int(20));

        let template = AssertionPredicates::new(shape.head)
            .create(&mut opt, IfKind::RangeCheck, 4, offset, shape.range)
            .unwrap();

        let bol = template.init_value_bool(opt.graph());
        let cmp = opt.graph().input(bol, 1);
        assert_eq!(opt.graph().op(cmp), Operator::Cmp(CmpKind::Unsigned, Width::Long));
        assert_eq!(template.if_kinds(opt.graph()), (IfKind::Plain, IfKind::Plain));
    }

    #[test]
    fn test_update_replaces_initialized_predicates() {
        let (mut g, shape) = LoopGraphBuilder::new().build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let zero = opt.graph_mut().con_i(0);
        let preds = AssertionPredicates::new(shape.head);
        let template = preds
            .create(&mut opt, IfKind::RangeCheck, 1, zero, shape.range)
            .unwrap();
        let old_init = InitializedAssertionPredicate::new(opt.graph(), template.entry(opt.graph()))
            .unwrap();

        preds.update(&mut opt, 4).unwrap();

        // The old check is now constant true.
        let cond = opt.graph().input(old_init.head(), 1);
        assert_eq!(opt.graph().find_int_con(cond), Some(1));
        let new_init =
            InitializedAssertionPredicate::new(opt.graph(), template.entry(opt.graph())).unwrap();
        assert_ne!(new_init, old_init);
        let leaves = TemplateAssertionPredicateBool::new(opt.graph(), template.last_value_bool(opt.graph()))
            .unwrap()
            .find_opaque_leaves(opt.graph());
        let stride = opt.graph().input(leaves.stride.unwrap(), 1);
        assert_eq!(opt.graph().find_int_con(stride), Some(4));

        // The new last value check uses the new stride and the loop's init
        // directly, without opaque nodes.
        let g = opt.graph();
        let new_last = InitializedAssertionPredicate::new(g, new_init.entry(g)).unwrap();
        assert_eq!(new_last.assertion_type(g), AssertionPredicateType::LastValue);
        let mut stack = vec![g.input(new_last.head(), 1)];
        let mut seen = Vec::new();
        while let Some(n) = stack.pop() {
            if !n.is_valid() || seen.contains(&n) {
                continue;
            }
            seen.push(n);
            assert!(!g.op(n).is_opaque_loop_node());
            stack.extend(g.inputs(n).iter().skip(1).copied());
        }
        assert!(seen.contains(&stride));
        assert!(seen.contains(&shape.init));
    }

    #[test]
    fn test_clone_to_counted_loop_requires_counted_target() {
        let (mut g, shape) = LoopGraphBuilder::new().plain_loop().build();
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let result = AssertionPredicates::new(shape.head).clone_to_loop(
            &mut opt,
            shape.head,
            &NodeInTargetLoop::Cloned { first: 0 },
        );
        assert_eq!(result, Err(LoopOptError::NotCountedLoop(shape.head)));
    }
}
