//! Optimization Pipeline.
//!
//! Runs the loop optimization passes in rounds until a round changes
//! nothing or `max_rounds` is reached, and keeps per-pass statistics.
//!
//! # Pass Phases
//!
//! 1. **Loop**: unswitching (with its own predicate hygiene)
//! 2. **Cleanup**: removal of orphaned Parse Predicates, IGVN
//!
//! A pass error ends the run: the graph is left as the failing pass left
//! it and the caller is expected to abandon the method.

use std::time::{Duration, Instant};

use log::{debug, error};

use super::config::LoopOptsConfig;
use super::igvn::Igvn;
use super::predicates::PredicateHygiene;
use super::unswitch::LoopUnswitching;
use super::OptimizationPass;
use crate::error::Result;
use crate::ir::graph::Graph;

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Loop transformations.
    Loop,
    /// Cleanup after loop transformations.
    Cleanup,
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn OptimizationPass>,
    phase: PassPhase,
    enabled: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: OptimizationPass + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            enabled: true,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

/// Fixed-point driver over the loop optimization passes.
pub struct OptPipeline {
    config: LoopOptsConfig,
    /// Registered passes in order.
    passes: Vec<PassEntry>,
    total_rounds: usize,
    total_time: Duration,
}

impl OptPipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(LoopOptsConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: LoopOptsConfig) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_rounds: 0,
            total_time: Duration::ZERO,
        };
        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.loop_unswitching {
            self.register(
                LoopUnswitching::with_config(self.config.clone()),
                PassPhase::Loop,
            );
        }
        self.register(PredicateHygiene::new(self.config.clone()), PassPhase::Cleanup);
        self.register(Igvn::new(), PassPhase::Cleanup);
    }

    /// Register a custom pass.
    pub fn register<P: OptimizationPass + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    /// Enable or disable every pass called `name`.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        for entry in self.passes.iter_mut().filter(|e| e.pass.name() == name) {
            entry.enabled = enabled;
        }
    }

    pub fn config(&self) -> &LoopOptsConfig {
        &self.config
    }

    /// Run rounds of all phases on `graph` until nothing changes.
    pub fn run(&mut self, graph: &mut Graph) -> Result<PipelineStats> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            initial_size: graph.live_nodes(),
            ..Default::default()
        };

        let mut rounds = 0;
        while rounds < self.config.max_rounds {
            rounds += 1;
            let mut round_changed = false;
            for phase in [PassPhase::Loop, PassPhase::Cleanup] {
                round_changed |= self.run_phase(graph, phase, &mut stats)?;
            }
            debug!(target: "loopopts", "pipeline round {rounds}: changed {round_changed}");
            if !round_changed {
                break;
            }
        }

        self.total_rounds += rounds;
        self.total_time += start.elapsed();

        stats.total_rounds = rounds;
        stats.total_time = start.elapsed();
        stats.final_size = graph.live_nodes();
        Ok(stats)
    }

    /// Run every enabled pass of `phase` once.
    fn run_phase(
        &mut self,
        graph: &mut Graph,
        phase: PassPhase,
        stats: &mut PipelineStats,
    ) -> Result<bool> {
        let mut phase_changed = false;
        for entry in &mut self.passes {
            if entry.phase != phase || !entry.enabled {
                continue;
            }
            let start = Instant::now();
            let result = entry.pass.run(graph);
            entry.time += start.elapsed();
            entry.runs += 1;

            let changed = match result {
                Ok(changed) => changed,
                Err(e) => {
                    error!(target: "loopopts", "pass {} failed: {e}", entry.pass.name());
                    return Err(e);
                }
            };
            if changed {
                entry.changes += 1;
                phase_changed = true;
            }
        }
        stats.phases_run += 1;
        Ok(phase_changed)
    }

    /// Get pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name().to_string(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    /// Rounds run over the lifetime of this pipeline.
    #[inline]
    pub fn rounds(&self) -> usize {
        self.total_rounds
    }

    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.passes.iter().map(|e| e.pass.name()).collect();
        f.debug_struct("OptPipeline")
            .field("config", &self.config)
            .field("passes", &names)
            .field("total_rounds", &self.total_rounds)
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: String,
    pub phase: PassPhase,
    /// Number of times run.
    pub runs: usize,
    /// Number of times it made changes.
    pub changes: usize,
    /// Total time spent in this pass.
    pub time: Duration,
}

/// Statistics from one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub total_rounds: usize,
    pub phases_run: usize,
    pub total_time: Duration,
    /// Live nodes before the run.
    pub initial_size: usize,
    /// Live nodes after the run.
    pub final_size: usize,
}

impl PipelineStats {
    /// Final size relative to the initial size.
    pub fn size_ratio(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

/// Run the pipeline with the aggressive configuration.
pub fn optimize_full(graph: &mut Graph) -> Result<PipelineStats> {
    OptPipeline::with_config(LoopOptsConfig::aggressive()).run(graph)
}

/// Run the pipeline with the tier-1 configuration (no unswitching).
pub fn optimize_minimal(graph: &mut Graph) -> Result<PipelineStats> {
    OptPipeline::with_config(LoopOptsConfig::tier1()).run(graph)
}

/// Run the pipeline with the default configuration.
pub fn optimize(graph: &mut Graph) -> Result<PipelineStats> {
    OptPipeline::new().run(graph)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{DiamondKind, LoopGraphBuilder};
    use crate::ir::operators::DeoptReason;

    #[test]
    fn test_pass_phase_ordering() {
        assert!(PassPhase::Loop < PassPhase::Cleanup);
    }

    #[test]
    fn test_default_passes() {
        let names: Vec<String> = OptPipeline::new()
            .pass_stats()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["LoopUnswitching", "PredicateHygiene", "Igvn"]);

        let minimal = OptPipeline::with_config(LoopOptsConfig::tier1());
        assert_eq!(minimal.pass_stats().len(), 2);
    }

    #[test]
    fn test_pipeline_reaches_fixed_point() {
        let (mut g, _) = LoopGraphBuilder::new()
            .parse_predicates(&[DeoptReason::LoopLimitCheck])
            .diamond(DiamondKind::Invariant)
            .build();
        let mut pipeline = OptPipeline::new();
        let stats = pipeline.run(&mut g).unwrap();

        assert!(stats.total_rounds >= 2);
        assert!(stats.total_rounds <= pipeline.config().max_rounds);
        assert!(stats.final_size > 0);
        let unswitch = &pipeline.pass_stats()[0];
        assert_eq!(unswitch.changes, 1);
        assert_eq!(unswitch.runs, stats.total_rounds);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_pipeline_respects_max_rounds() {
        let (mut g, _) = LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .diamond(DiamondKind::Invariant)
            .build();
        let config = LoopOptsConfig {
            max_rounds: 1,
            ..Default::default()
        };
        let mut pipeline = OptPipeline::with_config(config);
        let stats = pipeline.run(&mut g).unwrap();
        assert_eq!(stats.total_rounds, 1);
        assert_eq!(stats.phases_run, 2);
        assert_eq!(pipeline.rounds(), 1);
    }

    #[test]
    fn test_disabled_pass_is_skipped() {
        let (mut g, _) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        let mut pipeline = OptPipeline::new();
        pipeline.set_enabled("LoopUnswitching", false);
        pipeline.run(&mut g).unwrap();
        assert_eq!(pipeline.pass_stats()[0].runs, 0);
    }

    #[test]
    fn test_optimize_functions() {
        let (mut g, _) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        assert!(optimize(&mut g).unwrap().total_rounds >= 1);

        let (mut g, _) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
        let before = g.live_nodes();
        let stats = optimize_minimal(&mut g).unwrap();
        assert!(stats.final_size <= before);

        let (mut g, _) = LoopGraphBuilder::new().diamond(DiamondKind::RangeCheck).build();
        assert!(optimize_full(&mut g).unwrap().final_size > 0);
    }

    #[test]
    fn test_pipeline_stats_zero_size() {
        let stats = PipelineStats::default();
        assert_eq!(stats.size_ratio(), 1.0);
    }
}
