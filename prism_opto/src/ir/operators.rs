//! Operator definitions for the loop optimizer IR.
//!
//! Operators are organized by category:
//! - **Control**: Start, merges, loop heads, branches and their projections,
//!   terminators, plus the Template Assertion Predicate placeholder
//! - **Constants and parameters**
//! - **Integer arithmetic and comparisons**: the subset that appears in
//!   hoisted range checks and assertion predicate expressions
//! - **Casts and opaque wrappers**: narrowing casts and the placeholders that
//!   hide a loop's init and stride from other optimizations
//! - **Memory**: pinned loads and stores inside loop bodies
//!
//! Input layout conventions (input 0 is always the control input, `INVALID`
//! for floating data nodes):
//!
//! | Operator | Inputs |
//! |---|---|
//! | `Region`, `Root` | `[-, pred1, pred2, ...]` |
//! | `Loop` | `[-, entry, backedge]` |
//! | `If` | `[ctrl, condition]` |
//! | `TemplateAssertionPredicate` | `[ctrl, init_value_bool, last_value_bool]` |
//! | `Halt`, `UncommonTrap` | `[ctrl, frame]` |
//! | `Phi` | `[region, value1, value2, ...]` |
//! | binary ops | `[-, lhs, rhs]` |
//! | unary ops, `Opaque*`, `CastII`, `ConvI2L` | `[-, value]` |

use std::fmt;

use super::types::{TypeInt, ValueType};

// =============================================================================
// Deoptimization Reasons
// =============================================================================

/// Reason code recorded on uncommon traps and Parse Predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    /// Guards the iteration limit of a counted loop.
    LoopLimitCheck,
    /// Loop Predication.
    Predicate,
    /// Profiled Loop Predication.
    ProfilePredicate,
    /// Not a predicate trap.
    None,
}

impl DeoptReason {
    /// Reasons that mark a branch as a hoisted loop predicate.
    pub const fn is_predicate_reason(self) -> bool {
        matches!(
            self,
            DeoptReason::LoopLimitCheck | DeoptReason::Predicate | DeoptReason::ProfilePredicate
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            DeoptReason::LoopLimitCheck => "loop_limit_check",
            DeoptReason::Predicate => "predicate",
            DeoptReason::ProfilePredicate => "profile_predicate",
            DeoptReason::None => "none",
        }
    }
}

impl fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Control Operators
// =============================================================================

/// Flavour of a loop head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// General loop.
    Plain,
    /// Counted loop with a recognized induction variable.
    Counted,
    /// Synthetic outer loop wrapping a strip-mined counted loop.
    OuterStripMined,
}

/// Flavour of a two-way branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfKind {
    Plain,
    RangeCheck,
    /// Placeholder branch for future hoisted checks. Its condition is always
    /// the constant `1` and its false projection reaches an uncommon trap.
    ParsePredicate(DeoptReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    Start,
    /// Collects all terminators.
    Root,
    Region,
    Loop(LoopKind),
    If(IfKind),
    IfTrue,
    IfFalse,
    /// Carries the init and last value bools of a template. Never a runtime check.
    TemplateAssertionPredicate,
    /// Deoptimization call.
    UncommonTrap(DeoptReason),
    /// Code asserted to be unreachable.
    Halt,
    Return,
    SafePoint,
}

// =============================================================================
// Data Operators
// =============================================================================

/// Operand width of integer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Int,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    /// Left shift.
    Shl,
    /// Arithmetic right shift.
    Sar,
}

/// Signedness of a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpKind {
    Signed,
    Unsigned,
}

/// Condition tested by a `Bool` over a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolTest {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BoolTest {
    pub const fn negate(self) -> Self {
        match self {
            BoolTest::Eq => BoolTest::Ne,
            BoolTest::Ne => BoolTest::Eq,
            BoolTest::Lt => BoolTest::Ge,
            BoolTest::Le => BoolTest::Gt,
            BoolTest::Gt => BoolTest::Le,
            BoolTest::Ge => BoolTest::Lt,
        }
    }
}

/// Opaque wrappers hide a value from folding until they are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueOp {
    /// Stands for the init value of a loop inside a template bool.
    LoopInit,
    /// Stands for the stride of a loop inside a template bool.
    LoopStride,
    /// Wraps the condition of an Initialized Assertion Predicate.
    AssertionPredicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParmKind {
    /// Frame pointer, used by `Halt` and uncommon traps.
    FramePtr,
    Int(u16),
    Ptr(u16),
}

// =============================================================================
// Operator
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Control(ControlOp),
    ConI(i32),
    ConL(i64),
    Parm(ParmKind),
    Phi,
    Arith(ArithOp, Width),
    Cmp(CmpKind, Width),
    Bool(BoolTest),
    ConvI2L,
    CastII(TypeInt),
    CheckCastPP,
    Opaque(OpaqueOp),
    Load,
    Store,
}

impl Operator {
    #[inline]
    pub const fn is_cfg(&self) -> bool {
        matches!(self, Operator::Control(_))
    }

    /// Region-like nodes keep their predecessors at inputs `1..`.
    #[inline]
    pub const fn is_region_like(&self) -> bool {
        matches!(
            self,
            Operator::Control(ControlOp::Region | ControlOp::Loop(_) | ControlOp::Root)
        )
    }

    #[inline]
    pub const fn is_loop(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::Loop(_)))
    }

    #[inline]
    pub const fn is_if(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::If(_)))
    }

    #[inline]
    pub const fn is_if_proj(&self) -> bool {
        matches!(
            self,
            Operator::Control(ControlOp::IfTrue | ControlOp::IfFalse)
        )
    }

    #[inline]
    pub const fn is_parse_predicate(&self) -> bool {
        matches!(
            self,
            Operator::Control(ControlOp::If(IfKind::ParsePredicate(_)))
        )
    }

    #[inline]
    pub const fn is_template_assertion_predicate(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::TemplateAssertionPredicate))
    }

    #[inline]
    pub const fn is_bool(&self) -> bool {
        matches!(self, Operator::Bool(_))
    }

    #[inline]
    pub const fn is_cmp(&self) -> bool {
        matches!(self, Operator::Cmp(..))
    }

    /// `OpaqueLoopInit` or `OpaqueLoopStride`.
    #[inline]
    pub const fn is_opaque_loop_node(&self) -> bool {
        matches!(
            self,
            Operator::Opaque(OpaqueOp::LoopInit | OpaqueOp::LoopStride)
        )
    }

    /// Integer constant value.
    #[inline]
    pub const fn con_i(&self) -> Option<i32> {
        match self {
            Operator::ConI(v) => Some(*v),
            _ => None,
        }
    }

    /// Operators that may appear between the root `Bool` of an assertion
    /// predicate expression and its opaque leaves.
    pub const fn is_assertion_predicate_bool_op(&self) -> bool {
        match self {
            Operator::Opaque(OpaqueOp::LoopInit | OpaqueOp::LoopStride)
            | Operator::Bool(_)
            | Operator::Cmp(..)
            | Operator::ConvI2L
            | Operator::CastII(_)
            | Operator::Arith(_, Width::Long) => true,
            Operator::Arith(op, Width::Int) => {
                matches!(op, ArithOp::Shl | ArithOp::Add | ArithOp::Mul | ArithOp::Sub)
            }
            _ => false,
        }
    }

    /// Pinned data nodes that may follow their controlling test upward when
    /// that test is found redundant.
    pub const fn depends_only_on_test(&self) -> bool {
        matches!(
            self,
            Operator::CheckCastPP | Operator::CastII(_) | Operator::Load
        )
    }

    /// Nodes kept alive without uses.
    pub const fn has_side_effect(&self) -> bool {
        matches!(self, Operator::Store)
    }

    /// Default result type.
    pub fn result_type(&self) -> ValueType {
        match self {
            Operator::Control(_) => ValueType::Control,
            Operator::ConI(v) => ValueType::Int(TypeInt::con(*v)),
            Operator::ConL(_) => ValueType::Long,
            Operator::Parm(ParmKind::FramePtr | ParmKind::Ptr(_)) => ValueType::Ptr,
            Operator::Parm(ParmKind::Int(_)) => ValueType::INT,
            Operator::Phi => ValueType::Top,
            Operator::Arith(_, Width::Int) => ValueType::INT,
            Operator::Arith(_, Width::Long) | Operator::ConvI2L => ValueType::Long,
            Operator::Cmp(..) => ValueType::Int(TypeInt::CC),
            Operator::Bool(_) => ValueType::Bool,
            Operator::CastII(t) => ValueType::Int(*t),
            Operator::CheckCastPP => ValueType::Ptr,
            Operator::Opaque(OpaqueOp::LoopInit | OpaqueOp::LoopStride) => ValueType::INT,
            Operator::Opaque(OpaqueOp::AssertionPredicate) => ValueType::Bool,
            Operator::Load => ValueType::INT,
            Operator::Store => ValueType::Memory,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Control(ControlOp::Loop(LoopKind::Plain)) => f.write_str("Loop"),
            Operator::Control(ControlOp::Loop(LoopKind::Counted)) => f.write_str("CountedLoop"),
            Operator::Control(ControlOp::Loop(LoopKind::OuterStripMined)) => {
                f.write_str("OuterStripMinedLoop")
            }
            Operator::Control(ControlOp::If(IfKind::Plain)) => f.write_str("If"),
            Operator::Control(ControlOp::If(IfKind::RangeCheck)) => f.write_str("RangeCheck"),
            Operator::Control(ControlOp::If(IfKind::ParsePredicate(r))) => {
                write!(f, "ParsePredicate({r})")
            }
            Operator::Control(ControlOp::UncommonTrap(r)) => write!(f, "UncommonTrap({r})"),
            Operator::Control(op) => write!(f, "{op:?}"),
            Operator::ConI(v) => write!(f, "ConI({v})"),
            Operator::ConL(v) => write!(f, "ConL({v})"),
            Operator::Parm(kind) => write!(f, "Parm({kind:?})"),
            Operator::Arith(op, Width::Int) => write!(f, "{op:?}I"),
            Operator::Arith(op, Width::Long) => write!(f, "{op:?}L"),
            Operator::Cmp(CmpKind::Signed, Width::Int) => f.write_str("CmpI"),
            Operator::Cmp(CmpKind::Unsigned, Width::Int) => f.write_str("CmpU"),
            Operator::Cmp(CmpKind::Signed, Width::Long) => f.write_str("CmpL"),
            Operator::Cmp(CmpKind::Unsigned, Width::Long) => f.write_str("CmpUL"),
            Operator::Bool(test) => write!(f, "Bool({test:?})"),
            Operator::CastII(t) => write!(f, "CastII({t:?})"),
            Operator::Opaque(OpaqueOp::LoopInit) => f.write_str("OpaqueLoopInit"),
            Operator::Opaque(OpaqueOp::LoopStride) => f.write_str("OpaqueLoopStride"),
            Operator::Opaque(OpaqueOp::AssertionPredicate) => {
                f.write_str("OpaqueAssertionPredicate")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_predicate_bool_ops() {
        assert!(Operator::Opaque(OpaqueOp::LoopInit).is_assertion_predicate_bool_op());
        assert!(Operator::Arith(ArithOp::Add, Width::Int).is_assertion_predicate_bool_op());
        assert!(Operator::Arith(ArithOp::Or, Width::Long).is_assertion_predicate_bool_op());
        assert!(!Operator::Arith(ArithOp::Or, Width::Int).is_assertion_predicate_bool_op());
        assert!(!Operator::Opaque(OpaqueOp::AssertionPredicate).is_assertion_predicate_bool_op());
        assert!(!Operator::Phi.is_assertion_predicate_bool_op());
        assert!(!Operator::ConI(3).is_assertion_predicate_bool_op());
    }

    #[test]
    fn test_control_classification() {
        let loop_op = Operator::Control(ControlOp::Loop(LoopKind::Counted));
        assert!(loop_op.is_cfg());
        assert!(loop_op.is_region_like());
        assert!(loop_op.is_loop());
        assert!(!Operator::Control(ControlOp::IfTrue).is_region_like());
        assert!(
            Operator::Control(ControlOp::If(IfKind::ParsePredicate(DeoptReason::Predicate)))
                .is_parse_predicate()
        );
    }

    #[test]
    fn test_deopt_reason_taxonomy() {
        assert!(DeoptReason::LoopLimitCheck.is_predicate_reason());
        assert!(DeoptReason::ProfilePredicate.is_predicate_reason());
        assert!(!DeoptReason::None.is_predicate_reason());
        assert_eq!(DeoptReason::Predicate.to_string(), "predicate");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Operator::Cmp(CmpKind::Unsigned, Width::Long).to_string(), "CmpUL");
        assert_eq!(Operator::Arith(ArithOp::Add, Width::Int).to_string(), "AddI");
        assert_eq!(BoolTest::Lt.negate(), BoolTest::Ge);
    }
}
