//! Error type for loop optimizations.
//!
//! A transformation that detects a malformed graph stops and reports it
//! instead of continuing on a broken shape. Decisions not to optimize (no
//! candidate, no budget) are not errors.

use thiserror::Error;

use crate::ir::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopOptError {
    /// The node is not a loop head.
    #[error("{0:?} is not a loop head")]
    NotALoop(NodeId),

    /// A counted-loop operation was applied to a loop without a recognized
    /// induction variable.
    #[error("{0:?} is not a counted loop")]
    NotCountedLoop(NodeId),

    /// An `If` lost one of its projections.
    #[error("{0:?} is missing a projection")]
    MissingProjection(NodeId),

    /// A predicate does not have the expected shape.
    #[error("malformed predicate at {node:?}: {reason}")]
    MalformedPredicate {
        /// The offending node.
        node: NodeId,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// An assertion predicate bool has no `OpaqueLoopInit` leaf.
    #[error("assertion predicate bool {0:?} has no OpaqueLoopInit")]
    MissingOpaqueInit(NodeId),

    /// An `OpaqueLoopStride` leaf was found but no stride value was provided.
    #[error("unexpected OpaqueLoopStride {0:?}")]
    UnexpectedOpaqueStride(NodeId),

    /// A node inside a cloned loop has no clone.
    #[error("{0:?} has no clone")]
    CloneMissing(NodeId),

    /// After unswitching, walking the predicates of a loop did not end at
    /// the selector projection.
    #[error("predicates of {head:?} end at {found:?}, expected selector projection {expected:?}")]
    SelectorNotReached {
        head: NodeId,
        found: NodeId,
        expected: NodeId,
    },

    #[error("no unswitching candidate in loop {0:?}")]
    NoUnswitchingCandidate(NodeId),

    /// A loop exit that is not an `If` projection.
    #[error("unsupported loop exit at {0:?}")]
    UnsupportedLoopExit(NodeId),

    /// The loop tree has no loop for the head.
    #[error("{0:?} is not in the loop tree")]
    UnknownLoop(NodeId),
}

pub type Result<T> = std::result::Result<T, LoopOptError>;
