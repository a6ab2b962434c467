//! IR node definitions.
//!
//! A node is an operator plus an ordered input list. Input 0 is the control
//! input (or `INVALID` for floating data nodes and for region-like nodes).
//! Uses are not stored on the node; the [`Graph`](super::graph::Graph)
//! maintains them beside the arena.
//!
//! Some control nodes carry extra state in [`NodeAttrs`]:
//! - loop heads: unswitching budget, loop-shape flags and the induction phi
//! - branches: profile data, copied onto branches derived from them
//! - Template Assertion Predicates: which branch flavour to create on initialization
//! - Initialized Assertion Predicates: which value of the loop they check

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::{ControlOp, IfKind, Operator};
use super::types::ValueType;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Inline storage for node inputs; most nodes have at most four.
pub type InputList = SmallVec<[NodeId; 4]>;

// =============================================================================
// Flags
// =============================================================================

bitflags::bitflags! {
    /// Per-node state flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Removed from the graph; all inputs are disconnected.
        const DEAD = 0b0000_0001;
        /// Predicate scheduled for removal by IGVN.
        const USELESS = 0b0000_0010;
        /// If guarding entry into a pre/main/post loop.
        const ZERO_TRIP_GUARD = 0b0000_0100;
    }
}

bitflags::bitflags! {
    /// Shape flags of a loop head.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LoopFlags: u8 {
        /// Inner loop of a strip-mined nest.
        const STRIP_MINED = 0b0000_0001;
        const PRE = 0b0000_0010;
        const MAIN = 0b0000_0100;
        const POST = 0b0000_1000;
        /// Unrolled only for vectorization analysis.
        const UNROLL_ONLY = 0b0001_0000;
        /// Post loop prepared for vectorized execution.
        const VECTORIZED_POST = 0b0010_0000;
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Default cap on how often one loop may be unswitched.
pub const DEFAULT_UNSWITCH_MAX: u8 = 3;

/// State carried by loop head nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopHead {
    pub unswitch_count: u8,
    pub unswitch_max: u8,
    pub flags: LoopFlags,
    /// Induction phi of a counted loop, `INVALID` otherwise.
    pub iv: NodeId,
}

impl Default for LoopHead {
    fn default() -> Self {
        LoopHead {
            unswitch_count: 0,
            unswitch_max: DEFAULT_UNSWITCH_MAX,
            flags: LoopFlags::empty(),
            iv: NodeId::INVALID,
        }
    }
}

impl LoopHead {
    /// Neither a pre, main nor post loop.
    pub fn is_normal_loop(&self) -> bool {
        !self
            .flags
            .intersects(LoopFlags::PRE | LoopFlags::MAIN | LoopFlags::POST)
    }

    pub fn set_normal_loop(&mut self) {
        self.flags
            .remove(LoopFlags::PRE | LoopFlags::MAIN | LoopFlags::POST);
    }
}

/// Branch profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchProfile {
    /// Probability of taking the true projection.
    pub prob: f32,
    /// Execution count, negative when unknown.
    pub cnt: f32,
}

impl BranchProfile {
    /// Probability used for branches that are (almost) never false.
    pub const PROB_MAX: f32 = 1.0 - 1e-6;
    pub const COUNT_UNKNOWN: f32 = -1.0;

    pub const ALWAYS: BranchProfile = BranchProfile {
        prob: Self::PROB_MAX,
        cnt: Self::COUNT_UNKNOWN,
    };

    pub const UNKNOWN: BranchProfile = BranchProfile {
        prob: 0.5,
        cnt: Self::COUNT_UNKNOWN,
    };
}

/// Which loop value an Initialized Assertion Predicate checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionPredicateType {
    None,
    InitValue,
    LastValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeAttrs {
    None,
    Loop(LoopHead),
    Branch(BranchProfile),
    /// Branch kinds to use when a template is initialized.
    Template {
        init_value_if: IfKind,
        last_value_if: IfKind,
    },
    InitializedAssertion(AssertionPredicateType),
}

// =============================================================================
// Node
// =============================================================================

#[derive(Debug, Clone)]
pub struct Node {
    pub op: Operator,
    pub inputs: InputList,
    pub ty: ValueType,
    pub flags: NodeFlags,
    pub attrs: NodeAttrs,
}

impl Node {
    pub fn new(op: Operator, inputs: &[NodeId]) -> Self {
        let attrs = match op {
            Operator::Control(ControlOp::Loop(_)) => NodeAttrs::Loop(LoopHead::default()),
            Operator::Control(ControlOp::If(_)) => NodeAttrs::Branch(BranchProfile::UNKNOWN),
            _ => NodeAttrs::None,
        };
        Node {
            op,
            inputs: InputList::from_slice(inputs),
            ty: op.result_type(),
            flags: NodeFlags::empty(),
            attrs,
        }
    }

    #[inline]
    pub fn is_cfg(&self) -> bool {
        self.op.is_cfg()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    #[inline]
    pub fn is_useless(&self) -> bool {
        self.flags.contains(NodeFlags::USELESS)
    }

    /// Input `i`, or `INVALID` if the slot is unset or out of range.
    #[inline]
    pub fn input(&self, i: usize) -> NodeId {
        self.inputs.get(i).copied().unwrap_or(NodeId::INVALID)
    }

    /// Number of input slots (`req()` in loop-optimizer parlance).
    #[inline]
    pub fn req(&self) -> usize {
        self.inputs.len()
    }

    pub fn loop_head(&self) -> Option<&LoopHead> {
        match &self.attrs {
            NodeAttrs::Loop(head) => Some(head),
            _ => None,
        }
    }

    pub fn loop_head_mut(&mut self) -> Option<&mut LoopHead> {
        match &mut self.attrs {
            NodeAttrs::Loop(head) => Some(head),
            _ => None,
        }
    }

    pub fn profile(&self) -> BranchProfile {
        match self.attrs {
            NodeAttrs::Branch(profile) => profile,
            _ => BranchProfile::UNKNOWN,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
