//! Sea-of-Nodes intermediate representation for loop optimizations.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): typed ids, side tables and bit sets
//! - **Types** (`types.rs`): integer ranges and value kinds
//! - **Operators** (`operators.rs`): control, arithmetic, opaque and memory operators
//! - **Node** (`node.rs`): nodes, flags and per-node attributes
//! - **Graph** (`graph.rs`): node storage with use-def chains
//! - **CFG** (`cfg.rs`): dominators and control placement of data nodes
//! - **Loops** (`loops.rs`): the natural loop tree
//! - **Builder** (`builder.rs`): canonical loop shapes
//!
//! # Design Principles
//!
//! - **Arena allocation**: ids grow monotonically, so "created after X" is an id compare
//! - **Use-def chains**: every edge is mirrored in the def's use list
//! - **Unified control/data**: control is an input like any other

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod graph;
pub mod loops;
pub mod node;
pub mod operators;
pub mod types;

// Re-export commonly used types
pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::{Diamond, DiamondKind, LoopGraphBuilder, LoopShape};
pub use cfg::DominatorTree;
pub use graph::Graph;
pub use loops::{CountedLoopInfo, LoopId, LoopInfo, LoopTree};
pub use node::{
    AssertionPredicateType, BranchProfile, InputList, LoopFlags, LoopHead, Node, NodeAttrs,
    NodeFlags, NodeId,
};
pub use operators::{
    ArithOp, BoolTest, CmpKind, ControlOp, DeoptReason, IfKind, LoopKind, OpaqueOp, Operator,
    ParmKind, Width,
};
pub use types::{TypeInt, ValueType};
