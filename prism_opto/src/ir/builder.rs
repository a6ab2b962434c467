//! Builder for canonical loop shapes.
//!
//! The loop optimizer works on graphs produced by a front end. This builder
//! assembles the shapes it cares about directly, so passes can be driven and
//! inspected without one:
//!
//! ```text
//! Start
//!   [Runtime Predicates + Parse Predicate: Predicate]
//!   [Runtime Predicates + Parse Predicate: ProfilePredicate]
//!   [Runtime Predicates + Parse Predicate: LoopLimitCheck]
//!   (OuterStripMinedLoop)
//!   Loop / CountedLoop  <-------------------------+
//!     invariant exit test (optional)  -> Return   |
//!     if/else diamonds with a store on each side  |
//!     exit test: incr < n ---- true --------------+
//!       false -> (SafePoint -> outer loop end) -> Return(incr)
//! ```
//!
//! All parameters are `Parm` nodes: `flag` (int 0), `n` (int 1),
//! `range` (int 2) and `ptr` (pointer 3).

use super::graph::Graph;
use super::node::{BranchProfile, LoopFlags, NodeId};
use super::operators::{BoolTest, CmpKind, DeoptReason, IfKind, LoopKind, ParmKind, Width};
use super::types::ValueType;

/// Condition flavour of a diamond in the loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiamondKind {
    /// `If(flag != k)`, invariant in the loop.
    Invariant,
    /// `RangeCheck(flag <u range)`, invariant in the loop.
    RangeCheck,
    /// `If(iv < 5)`, varies per iteration.
    Variant,
}

/// Landmark ids of an if/else diamond.
#[derive(Debug, Clone, Copy)]
pub struct Diamond {
    pub iff: NodeId,
    pub if_true: NodeId,
    pub if_false: NodeId,
    pub region: NodeId,
    pub then_store: NodeId,
    pub else_store: NodeId,
}

/// Landmark ids of a built loop.
#[derive(Debug, Clone)]
pub struct LoopShape {
    pub head: NodeId,
    /// Outer strip-mined loop, `INVALID` unless strip mining was requested.
    pub outer_head: NodeId,
    /// Parse Predicate `If` nodes, top to bottom.
    pub parse_predicates: Vec<NodeId>,
    /// Runtime Predicate `If` nodes, top to bottom.
    pub runtime_predicates: Vec<NodeId>,
    pub iv: NodeId,
    pub init: NodeId,
    pub incr: NodeId,
    pub stride: NodeId,
    pub flag: NodeId,
    pub limit: NodeId,
    pub range: NodeId,
    pub ptr: NodeId,
    pub diamonds: Vec<Diamond>,
    pub invariant_exit: NodeId,
    pub check_cast: NodeId,
    pub exit_test: NodeId,
    pub ret: NodeId,
}

impl LoopShape {
    /// The outermost loop head of the nest (the outer strip-mined loop if present).
    pub fn outermost_head(&self) -> NodeId {
        if self.outer_head.is_valid() {
            self.outer_head
        } else {
            self.head
        }
    }

    /// Control entering the loop nest.
    pub fn loop_entry(&self, graph: &Graph) -> NodeId {
        graph.input(self.outermost_head(), 1)
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Clone)]
pub struct LoopGraphBuilder {
    parse_predicates: Vec<DeoptReason>,
    runtime_predicates: Vec<DeoptReason>,
    kind: LoopKind,
    strip_mined: bool,
    diamonds: Vec<DiamondKind>,
    invariant_exit: bool,
    check_cast: bool,
    unswitch_count: u8,
    unswitch_max: Option<u8>,
    flags: LoopFlags,
    stride: i32,
    profile: BranchProfile,
}

impl Default for LoopGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopGraphBuilder {
    /// A counted loop with an empty body.
    pub fn new() -> Self {
        LoopGraphBuilder {
            parse_predicates: Vec::new(),
            runtime_predicates: Vec::new(),
            kind: LoopKind::Counted,
            strip_mined: false,
            diamonds: Vec::new(),
            invariant_exit: false,
            check_cast: false,
            unswitch_count: 0,
            unswitch_max: None,
            flags: LoopFlags::empty(),
            stride: 1,
            profile: BranchProfile { prob: 0.7, cnt: 1000.0 },
        }
    }

    /// Add Parse Predicates for the given reasons.
    pub fn parse_predicates(mut self, reasons: &[DeoptReason]) -> Self {
        self.parse_predicates.extend_from_slice(reasons);
        self
    }

    /// Add a Runtime Predicate above the Parse Predicate of `reason`.
    pub fn runtime_predicate(mut self, reason: DeoptReason) -> Self {
        self.runtime_predicates.push(reason);
        self
    }

    /// Build a general loop instead of a counted loop.
    pub fn plain_loop(mut self) -> Self {
        self.kind = LoopKind::Plain;
        self
    }

    pub fn strip_mined(mut self) -> Self {
        self.strip_mined = true;
        self
    }

    pub fn diamond(mut self, kind: DiamondKind) -> Self {
        self.diamonds.push(kind);
        self
    }

    /// An invariant test at the top of the body whose false side leaves the loop.
    pub fn invariant_exit(mut self) -> Self {
        self.invariant_exit = true;
        self
    }

    /// Store through a `CheckCastPP` pinned on the first diamond's true side.
    pub fn check_cast(mut self) -> Self {
        self.check_cast = true;
        self
    }

    pub fn unswitch_budget(mut self, count: u8, max: u8) -> Self {
        self.unswitch_count = count;
        self.unswitch_max = Some(max);
        self
    }

    pub fn loop_flags(mut self, flags: LoopFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn stride(mut self, stride: i32) -> Self {
        self.stride = stride;
        self
    }

    pub fn build(self) -> (Graph, LoopShape) {
        let mut g = Graph::new();
        let flag = g.parm(ParmKind::Int(0));
        let limit = g.parm(ParmKind::Int(1));
        let range = g.parm(ParmKind::Int(2));
        let ptr = g.parm(ParmKind::Ptr(3));

        let mut ctrl = g.start;
        let mut parse_predicates = Vec::new();
        let mut runtime_predicates = Vec::new();

        for reason in [
            DeoptReason::Predicate,
            DeoptReason::ProfilePredicate,
            DeoptReason::LoopLimitCheck,
        ] {
            let mut fails = Vec::new();
            for _ in self.runtime_predicates.iter().filter(|&&r| r == reason) {
                let zero = g.con_i(0);
                let cmp = g.cmp(CmpKind::Signed, Width::Int, limit, zero);
                let bol = g.bool(BoolTest::Gt, cmp);
                let iff = g.if_node(IfKind::Plain, ctrl, bol, BranchProfile::ALWAYS);
                ctrl = g.if_true(iff);
                fails.push(g.if_false(iff));
                runtime_predicates.push(iff);
            }
            if self.parse_predicates.contains(&reason) {
                let one = g.con_i(1);
                let iff = g.if_node(
                    IfKind::ParsePredicate(reason),
                    ctrl,
                    one,
                    BranchProfile::ALWAYS,
                );
                ctrl = g.if_true(iff);
                fails.push(g.if_false(iff));
                parse_predicates.push(iff);
            }
            let trap_ctrl = match fails.as_slice() {
                [] => continue,
                [only] => *only,
                _ => g.region(&fails),
            };
            let frame = g.frame_ptr();
            g.uncommon_trap(trap_ctrl, reason, frame);
        }

        let outer_head = if self.strip_mined {
            g.loop_node(LoopKind::OuterStripMined, ctrl, NodeId::INVALID)
        } else {
            NodeId::INVALID
        };
        let head_entry = if self.strip_mined { outer_head } else { ctrl };
        let head = g.loop_node(self.kind, head_entry, NodeId::INVALID);

        let init = g.con_i(0);
        let stride = g.con_i(self.stride);
        let iv = g.phi(head, &[init, NodeId::INVALID], ValueType::INT);
        let incr = g.add_i(iv, stride);
        g.replace_input(iv, 2, incr);

        let counted = self.kind == LoopKind::Counted;
        if let Some(h) = g.node_mut(head).loop_head_mut() {
            h.unswitch_count = self.unswitch_count;
            if let Some(max) = self.unswitch_max {
                h.unswitch_max = max;
            }
            h.flags = self.flags;
            if self.strip_mined {
                h.flags |= LoopFlags::STRIP_MINED;
            }
            if counted {
                h.iv = iv;
            }
        }

        let mut body = head;

        let mut invariant_exit = NodeId::INVALID;
        if self.invariant_exit {
            let zero = g.con_i(0);
            let cmp = g.cmp(CmpKind::Signed, Width::Int, flag, zero);
            let bol = g.bool(BoolTest::Ge, cmp);
            let iff = g.if_node(IfKind::Plain, body, bol, self.profile);
            body = g.if_true(iff);
            let out = g.if_false(iff);
            let minus_one = g.con_i(-1);
            g.ret(out, minus_one);
            invariant_exit = iff;
        }

        let mut diamonds = Vec::new();
        let mut check_cast = NodeId::INVALID;
        for (i, &kind) in self.diamonds.iter().enumerate() {
            let (if_kind, bol) = match kind {
                DiamondKind::Invariant => {
                    let k = g.con_i(i as i32);
                    let cmp = g.cmp(CmpKind::Signed, Width::Int, flag, k);
                    (IfKind::Plain, g.bool(BoolTest::Ne, cmp))
                }
                DiamondKind::RangeCheck => {
                    let cmp = g.cmp(CmpKind::Unsigned, Width::Int, flag, range);
                    (IfKind::RangeCheck, g.bool(BoolTest::Lt, cmp))
                }
                DiamondKind::Variant => {
                    let five = g.con_i(5);
                    let cmp = g.cmp(CmpKind::Signed, Width::Int, iv, five);
                    (IfKind::Plain, g.bool(BoolTest::Lt, cmp))
                }
            };
            let iff = g.if_node(if_kind, body, bol, self.profile);
            let if_true = g.if_true(iff);
            let if_false = g.if_false(iff);

            let addr = if self.check_cast && i == 0 {
                check_cast = g.check_cast_pp(if_true, ptr);
                check_cast
            } else {
                ptr
            };
            let then_store = g.store(if_true, addr, iv);
            let else_store = g.store(if_false, ptr, incr);
            let region = g.region(&[if_true, if_false]);
            body = region;
            diamonds.push(Diamond {
                iff,
                if_true,
                if_false,
                region,
                then_store,
                else_store,
            });
        }

        let cmp = g.cmp(CmpKind::Signed, Width::Int, incr, limit);
        let bol = g.bool(BoolTest::Lt, cmp);
        let exit_test = g.if_node(IfKind::Plain, body, bol, BranchProfile::ALWAYS);
        let backedge = g.if_true(exit_test);
        let mut exit = g.if_false(exit_test);
        g.replace_input(head, 2, backedge);

        if self.strip_mined {
            let sp = g.safepoint(exit);
            let outer_end = g.if_node(IfKind::Plain, sp, bol, BranchProfile::ALWAYS);
            let outer_back = g.if_true(outer_end);
            exit = g.if_false(outer_end);
            g.replace_input(outer_head, 2, outer_back);
        }

        let ret = g.ret(exit, incr);

        let shape = LoopShape {
            head,
            outer_head,
            parse_predicates,
            runtime_predicates,
            iv,
            init,
            incr,
            stride,
            flag,
            limit,
            range,
            ptr,
            diamonds,
            invariant_exit,
            check_cast,
            exit_test,
            ret,
        };
        (g, shape)
    }
}

// =============================================================================
// Tests
// =============================================================================
