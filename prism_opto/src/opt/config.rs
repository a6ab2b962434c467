//! Loop optimization configuration.

// =============================================================================
// Configuration
// =============================================================================

/// Configuration shared by the loop optimization passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOptsConfig {
    /// Enable loop unswitching.
    pub loop_unswitching: bool,

    /// Visit the Loop Predicate block when walking predicates.
    pub use_loop_predicate: bool,

    /// Visit the Profiled Loop Predicate block when walking predicates.
    /// Only takes effect together with `use_loop_predicate`.
    pub use_profiled_loop_predicate: bool,

    /// Upper bound on live nodes in a graph.
    pub max_node_limit: usize,

    /// Minimum headroom any transformation asks for.
    pub node_budget_reserve: usize,

    /// Maximum fixed-point rounds of the pipeline.
    pub max_rounds: usize,

    /// Re-walk predicate chains after each unswitching.
    pub verify_predicates: bool,
}

impl Default for LoopOptsConfig {
    fn default() -> Self {
        Self {
            loop_unswitching: true,
            use_loop_predicate: true,
            use_profiled_loop_predicate: true,
            max_node_limit: 80_000,
            node_budget_reserve: 70,
            max_rounds: 4,
            verify_predicates: cfg!(debug_assertions),
        }
    }
}

impl LoopOptsConfig {
    /// Create a conservative configuration (no unswitching, small budget).
    pub fn conservative() -> Self {
        Self {
            loop_unswitching: false,
            use_profiled_loop_predicate: false,
            max_node_limit: 20_000,
            max_rounds: 2,
            ..Default::default()
        }
    }

    /// Create an aggressive configuration (large budget, more rounds).
    pub fn aggressive() -> Self {
        Self {
            max_node_limit: 240_000,
            max_rounds: 8,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for tier-1 JIT (fast compile).
    pub fn tier1() -> Self {
        Self {
            loop_unswitching: false,
            max_node_limit: 40_000,
            max_rounds: 1,
            verify_predicates: false,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for tier-2 JIT (thorough optimization).
    pub fn tier2() -> Self {
        Self {
            max_node_limit: 80_000,
            max_rounds: 6,
            ..Default::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
