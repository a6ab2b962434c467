//! Loop optimizations for the Prism Sea-of-Nodes IR.
//!
//! - Sea-of-Nodes IR with a loop tree (`ir`)
//! - Loop predicates: Parse, Runtime and Assertion Predicates (`opt::predicates`)
//! - Loop unswitching (`opt::unswitch`)
//! - Reserved loop copies for speculative transformations (`opt::reserve`)
#![deny(unsafe_op_in_unsafe_fn)]
pub mod error;
pub mod ir;
pub mod opt;

pub use error::{LoopOptError, Result};
