//! Value types for the loop optimizer IR.
//!
//! Only the integer range lattice carries real information here: loop
//! optimizations narrow induction values through `CastII`, and the last-value
//! expressions of assertion predicates reuse the type of the iv phi.
//!
//! ```text
//!                 Top
//!      /     /    |     \      \
//!  Control  Int  Long  Bool   Ptr ...
//!            |
//!      Int[lo, hi] ranges
//! ```

use std::fmt;

// =============================================================================
// Integer Ranges
// =============================================================================

/// An inclusive signed 32-bit integer range.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInt {
    pub lo: i32,
    pub hi: i32,
}

impl TypeInt {
    /// The full `int` range.
    pub const INT: TypeInt = TypeInt {
        lo: i32::MIN,
        hi: i32::MAX,
    };

    /// Non-negative ints.
    pub const POS: TypeInt = TypeInt { lo: 0, hi: i32::MAX };

    /// Result range of a three-way compare.
    pub const CC: TypeInt = TypeInt { lo: -1, hi: 1 };

    pub const fn new(lo: i32, hi: i32) -> Self {
        TypeInt { lo, hi }
    }

    pub const fn con(value: i32) -> Self {
        TypeInt { lo: value, hi: value }
    }

    #[inline]
    pub fn is_con(&self) -> bool {
        self.lo == self.hi
    }

    #[inline]
    pub fn contains(&self, value: i32) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// Smallest range covering both.
    pub fn meet(&self, other: &TypeInt) -> TypeInt {
        TypeInt {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }
}

impl Default for TypeInt {
    fn default() -> Self {
        TypeInt::INT
    }
}

impl fmt::Debug for TypeInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_con() {
            write!(f, "int:{}", self.lo)
        } else if *self == TypeInt::INT {
            f.write_str("int")
        } else {
            write!(f, "int:{}..{}", self.lo, self.hi)
        }
    }
}

// =============================================================================
// Value Types
// =============================================================================

/// Result type of an IR node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    /// Not yet known.
    #[default]
    Top,
    /// Control token produced by CFG nodes.
    Control,
    /// 32-bit integer within a range.
    Int(TypeInt),
    /// 64-bit integer.
    Long,
    /// Condition produced by `Bool`.
    Bool,
    /// Raw or object pointer.
    Ptr,
    /// Memory state.
    Memory,
}

impl ValueType {
    pub const INT: ValueType = ValueType::Int(TypeInt::INT);

    /// The integer range, if this is an int type.
    pub fn as_int(&self) -> Option<TypeInt> {
        match self {
            ValueType::Int(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Top => f.write_str("top"),
            ValueType::Control => f.write_str("control"),
            ValueType::Int(t) => fmt::Debug::fmt(t, f),
            ValueType::Long => f.write_str("long"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::Ptr => f.write_str("ptr"),
            ValueType::Memory => f.write_str("memory"),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_int_meet() {
        let a = TypeInt::new(0, 10);
        let b = TypeInt::con(-3);
        assert_eq!(a.meet(&b), TypeInt::new(-3, 10));
        assert!(b.is_con());
        assert!(TypeInt::POS.contains(0));
        assert!(!TypeInt::POS.contains(-1));
    }

    #[test]
    fn test_value_type_display() {
        assert_eq!(ValueType::INT.to_string(), "int");
        assert_eq!(ValueType::Int(TypeInt::con(4)).to_string(), "int:4");
        assert_eq!(ValueType::Int(TypeInt::new(0, 9)).to_string(), "int:0..9");
        assert_eq!(ValueType::Int(TypeInt::INT).as_int(), Some(TypeInt::INT));
        assert_eq!(ValueType::Bool.as_int(), None);
    }
}
