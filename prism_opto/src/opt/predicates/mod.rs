//! Loop predicates.
//!
//! Everything between a loop head and the control that enters its nest is
//! a stack of predicates:
//!
//! ```text
//!   [Predicate block]          Runtime Predicates + Parse Predicate (reason: predicate)
//!   [Profiled Predicate block] Runtime Predicates + Parse Predicate (reason: profile_predicate)
//!   [Loop Limit Check block]   Runtime Predicates + Parse Predicate (reason: loop_limit_check)
//!   [Assertion Predicates]     Templates and Initialized Assertion Predicates
//!   Loop
//! ```
//!
//! - **Model** (`model.rs`): typed views recognizing each predicate shape
//! - **Blocks** (`block.rs`): grouping a loop's predicates, iteration and insertion
//! - **Opaque** (`opaque.rs`): cloning template bools and their opaque leaves
//! - **Assertion** (`assertion.rs`): creating, cloning and initializing templates
//! - **Parse** (`parse.rs`): cloning Parse Predicates to new loops
//! - **Hygiene** (`hygiene.rs`): removing Parse Predicates no loop needs anymore

pub mod assertion;
pub mod block;
pub mod hygiene;
pub mod model;
pub mod opaque;
pub mod parse;

pub use assertion::{AssertionPredicates, NodeInTargetLoop};
pub use block::{
    AssertionPredicateBlock, PredicateChain, PredicateEntryIterator, Predicates,
    PredicatesForLoop, RegularPredicateBlock, RuntimePredicateBlock,
};
pub use hygiene::{EliminateUselessParsePredicates, PredicateHygiene};
pub use model::{
    InitializedAssertionPredicate, ParsePredicate, Predicate, RuntimePredicate,
    TemplateAssertionPredicate,
};
pub use opaque::{OpaqueLoopNodeTransformer, OpaqueLoopTransform, TemplateAssertionPredicateBool};
pub use parse::create_new_if_for_predicate;
