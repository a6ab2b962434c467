//! End-to-end loop unswitching on graphs from `LoopGraphBuilder`.

use prism_opto::ir::{DeoptReason, DiamondKind, Graph, LoopGraphBuilder, LoopTree, NodeId};
use prism_opto::opt::predicates::Predicates;
use prism_opto::opt::{
    optimize, LoopOptimizer, LoopOptsConfig, LoopUnswitching, OptimizationPass, PredicateHygiene,
    UnswitchRejection,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn live_loop_heads(g: &Graph) -> Vec<NodeId> {
    g.ids()
        .filter(|&n| !g.is_dead(n) && g.op(n).is_loop())
        .collect()
}

fn live_templates(g: &Graph) -> usize {
    g.ids()
        .filter(|&n| !g.is_dead(n) && g.op(n).is_template_assertion_predicate())
        .count()
}

#[test]
fn test_invariant_diamond_splits_loop() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .parse_predicates(&[DeoptReason::Predicate, DeoptReason::LoopLimitCheck])
        .diamond(DiamondKind::Invariant)
        .build();

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        opt.do_unswitching(l).unwrap()
    };

    assert_eq!(r.fast_head, shape.head);
    assert_ne!(r.slow_head, shape.head);
    for head in [r.fast_head, r.slow_head] {
        assert_eq!(g.node(head).loop_head().unwrap().unswitch_count, 1);
    }
    assert_eq!(live_templates(&g), 0);
    assert_eq!(r.templates_cloned, 0);
    assert_eq!(r.parse_predicates_cloned, 2);
    assert_eq!(LoopTree::build(&g).innermost_first().len(), 2);
    assert!(g.verify().is_ok());
}

#[test]
fn test_exiting_invariant_test_is_not_unswitched() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new().invariant_exit().build();
    let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
    let l = opt.tree().loop_for_head(shape.head).unwrap();

    assert_eq!(opt.find_unswitching_candidate(l), None);
    assert!(!opt.policy_unswitching(l));
    assert_eq!(opt.check_unswitching(l), Err(UnswitchRejection::NoCandidate));
}

#[test]
fn test_loop_at_max_count_is_not_unswitched() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .diamond(DiamondKind::Invariant)
        .unswitch_budget(3, 3)
        .build();
    let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
    let l = opt.tree().loop_for_head(shape.head).unwrap();

    // A candidate exists, the count alone rules the loop out.
    assert_eq!(opt.find_unswitching_candidate(l), Some(shape.diamonds[0].iff));
    assert!(!opt.policy_unswitching(l));
    assert_eq!(opt.check_unswitching(l), Err(UnswitchRejection::CountExceeded));
}

#[test]
fn test_rejected_loop_leaves_graph_untouched() {
    init_logging();
    for builder in [
        LoopGraphBuilder::new().diamond(DiamondKind::Variant),
        LoopGraphBuilder::new().invariant_exit(),
        LoopGraphBuilder::new()
            .diamond(DiamondKind::Invariant)
            .unswitch_budget(2, 2),
    ] {
        let (mut g, shape) = builder.build();
        let (unique, live) = (g.unique(), g.live_nodes());
        {
            let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
            let l = opt.tree().loop_for_head(shape.head).unwrap();
            assert!(!opt.policy_unswitching(l));
            assert!(!opt.major_progress());
        }
        assert_eq!(g.unique(), unique);

        let mut pass = LoopUnswitching::new();
        assert!(!pass.run(&mut g).unwrap());
        assert_eq!(pass.stats().loops_unswitched, 0);
        assert_eq!(g.live_nodes(), live);
    }
}

#[test]
fn test_small_node_limit_blocks_unswitching() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
    let config = LoopOptsConfig {
        max_node_limit: g.live_nodes() + 5,
        ..Default::default()
    };
    let unique = g.unique();
    let mut pass = LoopUnswitching::with_config(config);
    assert!(!pass.run(&mut g).unwrap());
    assert_eq!(pass.stats().loops_unswitched, 0);
    assert_eq!(g.unique(), unique);
    assert!(!g.is_dead(shape.diamonds[0].iff));
}

#[test]
fn test_counts_increase_by_one_on_both_copies() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .diamond(DiamondKind::Invariant)
        .unswitch_budget(1, 3)
        .build();
    let before = g.node(shape.head).loop_head().unwrap().unswitch_count;

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        opt.do_unswitching(l).unwrap()
    };

    for head in [r.fast_head, r.slow_head] {
        let info = g.node(head).loop_head().unwrap();
        assert_eq!(info.unswitch_count, before + 1);
        assert_eq!(info.unswitch_max, 3);
    }
}

#[test]
fn test_counts_never_exceed_max() {
    init_logging();
    let (mut g, _) = LoopGraphBuilder::new()
        .diamond(DiamondKind::Invariant)
        .diamond(DiamondKind::Invariant)
        .diamond(DiamondKind::Invariant)
        .unswitch_budget(0, 2)
        .build();

    let mut pass = LoopUnswitching::new();
    for _ in 0..4 {
        pass.run(&mut g).unwrap();
    }

    // Two rounds double the loop twice, the third test stays.
    assert_eq!(pass.stats().loops_unswitched, 3);
    let heads = live_loop_heads(&g);
    assert_eq!(heads.len(), 4);
    for head in heads {
        let info = g.node(head).loop_head().unwrap();
        assert_eq!(info.unswitch_count, 2);
        assert!(info.unswitch_count <= info.unswitch_max);
    }
    assert!(g.verify().is_ok());
}

#[test]
fn test_tests_are_hardwired_in_both_copies() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new().diamond(DiamondKind::Invariant).build();
    let d = shape.diamonds[0];

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        let r = opt.do_unswitching(l).unwrap();

        let g = opt.graph();
        assert_eq!(g.find_int_con(g.input(d.iff, 1)), Some(1));
        assert_eq!(g.find_int_con(g.input(r.old_new[&d.iff], 1)), Some(0));

        opt.run_igvn();
        r
    };

    // Fast copy keeps the true side, slow copy the false side.
    assert!(g.is_dead(d.if_false));
    assert!(g.is_dead(d.else_store));
    assert!(!g.is_dead(d.then_store));
    assert!(g.is_dead(r.old_new[&d.if_true]));
    assert!(g.is_dead(r.old_new[&d.then_store]));
    assert!(!g.is_dead(r.old_new[&d.else_store]));

    // The selector survives and still tests the invariant.
    assert!(!g.is_dead(r.selector.iff));
    assert!(g.find_int_con(g.input(r.selector.iff, 1)).is_none());
    assert!(g.verify().is_ok());
}

#[test]
fn test_predicates_above_each_copy_end_at_selector() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .parse_predicates(&[
            DeoptReason::Predicate,
            DeoptReason::ProfilePredicate,
            DeoptReason::LoopLimitCheck,
        ])
        .diamond(DiamondKind::RangeCheck)
        .build();

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        let r = opt.do_unswitching(l).unwrap();
        opt.run_igvn();
        r
    };

    for (head, proj) in [(r.fast_head, r.selector.fast), (r.slow_head, r.selector.slow)] {
        let predicates = Predicates::new(&g, g.input(head, 1));
        assert_eq!(predicates.entry(), proj);
        assert_eq!(predicates.parse_predicates().len(), 3);
        assert!(predicates.verify(&g).is_ok());
    }
    // The originals were useless and IGVN folded them away.
    for &pp in &shape.parse_predicates {
        assert!(g.is_dead(pp));
    }
    assert_eq!(g.input(r.selector.iff, 0), g.start);
}

fn parse_predicate_reasons(g: &Graph, head: NodeId) -> Vec<DeoptReason> {
    Predicates::new(g, g.input(head, 1))
        .parse_predicates()
        .iter()
        .map(|pp| pp.reason())
        .collect()
}

#[test]
fn test_entry_pinned_load_leaves_parse_predicates_to_hygiene() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .parse_predicates(&[DeoptReason::Predicate, DeoptReason::LoopLimitCheck])
        .diamond(DiamondKind::Invariant)
        .build();
    // A load outside the loop pinned on the Parse Predicate projection has
    // no slow copy, so the entry uses are not split evenly.
    let entry = shape.loop_entry(&g);
    let load = g.load(entry, shape.ptr);
    let sum = g.add_i(load, shape.iv);
    g.replace_input(shape.diamonds[0].then_store, 2, sum);

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, LoopOptsConfig::default());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        let r = opt.do_unswitching(l).unwrap();
        opt.run_igvn();
        r
    };

    assert_eq!(r.parse_predicates_cloned, 0);
    assert_eq!(r.templates_cloned, 0);
    assert!(!r.old_new.contains_key(&load));
    assert_eq!(g.input(load, 0), entry);
    for &pp in &shape.parse_predicates {
        assert!(!g.is_dead(pp));
        assert!(!g.node(pp).is_useless());
    }
    for head in [r.fast_head, r.slow_head] {
        assert!(parse_predicate_reasons(&g, head).is_empty());
    }

    // No loop claims the originals any more.
    let mut hygiene = PredicateHygiene::new(LoopOptsConfig::default());
    assert!(hygiene.run(&mut g).unwrap());
    assert_eq!(hygiene.eliminated(), 2);
    for &pp in &shape.parse_predicates {
        assert!(g.is_dead(pp));
    }
    assert!(!g.is_dead(load));
    assert!(g.verify().is_ok());
}

#[test]
fn test_disabled_predicate_blocks_are_not_cloned() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .parse_predicates(&[
            DeoptReason::Predicate,
            DeoptReason::ProfilePredicate,
            DeoptReason::LoopLimitCheck,
        ])
        .diamond(DiamondKind::Invariant)
        .build();
    let config = LoopOptsConfig {
        use_loop_predicate: false,
        use_profiled_loop_predicate: false,
        ..Default::default()
    };

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, config.clone());
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        let r = opt.do_unswitching(l).unwrap();
        opt.run_igvn();
        r
    };

    assert_eq!(r.parse_predicates_cloned, 1);
    for (head, proj) in [(r.fast_head, r.selector.fast), (r.slow_head, r.selector.slow)] {
        assert_eq!(parse_predicate_reasons(&g, head), vec![DeoptReason::LoopLimitCheck]);
        assert_eq!(Predicates::new(&g, g.input(head, 1)).entry(), proj);
    }
    // The Loop Limit Check original was folded, the other two stay above
    // the selector until hygiene removes them.
    let [loop_pp, profiled_pp, limit_pp] = [
        shape.parse_predicates[0],
        shape.parse_predicates[1],
        shape.parse_predicates[2],
    ];
    assert!(g.is_dead(limit_pp));
    assert!(!g.is_dead(loop_pp));
    assert!(!g.is_dead(profiled_pp));

    let mut hygiene = PredicateHygiene::new(config);
    assert!(hygiene.run(&mut g).unwrap());
    assert_eq!(hygiene.eliminated(), 2);
    assert!(g.is_dead(loop_pp));
    assert!(g.is_dead(profiled_pp));
    for head in [r.fast_head, r.slow_head] {
        assert_eq!(parse_predicate_reasons(&g, head), vec![DeoptReason::LoopLimitCheck]);
    }
    assert!(g.verify().is_ok());
}

#[test]
fn test_conservative_predicates_reach_both_copies() {
    init_logging();
    let (mut g, shape) = LoopGraphBuilder::new()
        .parse_predicates(&[DeoptReason::Predicate, DeoptReason::LoopLimitCheck])
        .diamond(DiamondKind::Invariant)
        .build();
    let config = LoopOptsConfig {
        loop_unswitching: true,
        ..LoopOptsConfig::conservative()
    };
    assert!(!config.use_profiled_loop_predicate);

    let r = {
        let mut opt = LoopOptimizer::new(&mut g, config);
        let l = opt.tree().loop_for_head(shape.head).unwrap();
        assert!(opt.policy_unswitching(l));
        opt.do_unswitching(l).unwrap()
    };

    // No Profiled Parse Predicate sits between the two blocks, so the Loop
    // block is still reached.
    assert_eq!(r.parse_predicates_cloned, 2);
    for head in [r.fast_head, r.slow_head] {
        assert_eq!(
            parse_predicate_reasons(&g, head),
            vec![DeoptReason::LoopLimitCheck, DeoptReason::Predicate]
        );
    }
}

#[test]
fn test_pipeline_unswitches_to_fixed_point() {
    init_logging();
    let (mut g, _) = LoopGraphBuilder::new()
        .parse_predicates(&[DeoptReason::LoopLimitCheck])
        .diamond(DiamondKind::Invariant)
        .diamond(DiamondKind::RangeCheck)
        .build();

    let stats = optimize(&mut g).unwrap();
    assert!(stats.total_rounds >= 3);
    assert!(stats.final_size > stats.initial_size);
    assert_eq!(live_loop_heads(&g).len(), 4);
    assert!(g.verify().is_ok());
}
