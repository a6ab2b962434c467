//! Loop optimization passes.
//!
//! - **Phase** (`phase.rs`): the loop optimizer state shared by all transforms
//! - **IGVN** (`igvn.rs`): worklist cleanup after transforms
//! - **Predicates** (`predicates/`): Parse, Runtime and Assertion Predicates
//! - **Unswitching** (`unswitch/`): hoisting invariant tests out of loops
//! - **Reserve** (`reserve.rs`): reserved loop copies for speculative transforms
//! - **Pipeline** (`pipeline.rs`): fixed-point pass driver

pub mod config;
pub mod igvn;
pub mod phase;
pub mod pipeline;
pub mod predicates;
pub mod reserve;
pub mod unswitch;

pub use config::LoopOptsConfig;
pub use igvn::Igvn;
pub use phase::{CloneLoopMode, LoopOptimizer, OldNew};
pub use pipeline::{
    optimize, optimize_full, optimize_minimal, OptPipeline, PassPhase, PassStat, PipelineStats,
};
pub use predicates::hygiene::PredicateHygiene;
pub use reserve::CountedLoopReserveKit;
pub use unswitch::{
    LoopUnswitching, UnswitchRejection, UnswitchResult, UnswitchStats, UnswitchedLoopSelector,
};

use crate::error::Result;
use crate::ir::graph::Graph;

/// A transformation over a whole graph.
pub trait OptimizationPass {
    fn name(&self) -> &'static str;

    /// Run the pass. Returns whether the graph changed.
    fn run(&mut self, graph: &mut Graph) -> Result<bool>;
}
