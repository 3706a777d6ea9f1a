//! Fixed-point behavior: idempotence, the iteration bound, and rule selection.

mod common;

use common::*;
use xqopt_core::prelude::*;
use xqopt_driver::RuleDriver;
use xqopt_rules::{default_rule_sets, RuleSet};

type Fixture = fn() -> (OperatorGraph, OptimizationContext);

/// `select(boolean(value-lt($1, $2)) and not(empty($1)))` over two constants.
fn comparison_plan() -> (OperatorGraph, OptimizationContext) {
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let consts = b.add(
        Operator::Assign {
            variables: vec![v(1), v(2)],
            exprs: vec![Expr::integer(1), Expr::integer(2)],
        },
        &[ets],
    );
    let lt = Expr::call(
        FunctionId::Boolean,
        vec![Expr::call(FunctionId::ValueLt, vec![Expr::var(v(1)), Expr::var(v(2))])],
    );
    let not_empty = Expr::call(
        FunctionId::Not,
        vec![Expr::call(FunctionId::Empty, vec![Expr::var(v(1))])],
    );
    let select = b.add(
        Operator::Select {
            condition: Expr::call(FunctionId::And, vec![lt, not_empty]),
        },
        &[consts],
    );
    let top = distribute(&mut b, &[1], select);
    (b.finish(top), OptimizationContext::new())
}

fn scenario_b_plan() -> (OperatorGraph, OptimizationContext) {
    let (graph, ctx, _) = scenario_b();
    (graph, ctx)
}

const FIXTURES: &[(&str, Fixture)] = &[
    ("scenario-a", scenario_a),
    ("scenario-b", scenario_b_plan),
    ("scenario-c", scenario_c),
    ("scenario-d", scenario_d),
    ("count-pipeline", count_pipeline),
    ("comparisons", comparison_plan),
];

/// The rule at `(phase, index)` of the default catalog, alone in its own set.
fn solo(phase: usize, index: usize) -> RuleSet {
    let mut sets = default_rule_sets();
    let set = sets.swap_remove(phase);
    let rule = set
        .rules
        .into_iter()
        .nth(index)
        .expect("rule index in range");
    RuleSet {
        name: "solo",
        rules: vec![rule],
    }
}

#[test]
fn every_rule_is_idempotent_on_its_own() {
    let shape: Vec<usize> = default_rule_sets().iter().map(|s| s.rules.len()).collect();
    for (phase, len) in shape.iter().enumerate() {
        for index in 0..*len {
            for (fixture, build) in FIXTURES {
                let (mut graph, mut ctx) = build();
                let first = checked_driver().with_rule_sets(vec![solo(phase, index)]);
                let name = first.rule_names()[0].1[0];
                first
                    .optimize(&mut graph, &mut ctx)
                    .unwrap_or_else(|e| panic!("{name} on {fixture}: {e}"));

                let mut again = thaw(&ctx, &graph);
                let before = graph.fingerprint().expect("fingerprint");
                let report = checked_driver()
                    .with_rule_sets(vec![solo(phase, index)])
                    .optimize(&mut graph, &mut again)
                    .unwrap_or_else(|e| panic!("{name} on {fixture}, second run: {e}"));
                assert_eq!(report.total_applied(), 0, "{name} is not idempotent on {fixture}");
                assert_eq!(graph.fingerprint().expect("fingerprint"), before);
            }
        }
    }
}

#[test]
fn converged_plans_are_stable_under_the_full_catalog() {
    for (fixture, build) in FIXTURES {
        let (mut graph, mut ctx) = build();
        let first = checked_driver().optimize(&mut graph, &mut ctx).expect("first run");
        let shape = graph.fingerprint().expect("fingerprint");

        let mut again = thaw(&ctx, &graph);
        let second = checked_driver()
            .optimize(&mut graph, &mut again)
            .expect("second run");

        // Only the algebricks round trip may fire again, and it restores the plan.
        assert!(
            second
                .trace
                .iter()
                .all(|a| a.phase == "algebricks" || a.phase == "job-gen"),
            "{fixture}: {:?}",
            second.trace
        );
        assert_eq!(
            second.applied("convert-to-algebricks"),
            second.applied("convert-from-algebricks"),
            "{fixture}"
        );
        assert_eq!(graph.fingerprint().expect("fingerprint"), shape, "{fixture}");
        assert_eq!(second.plan_hash, first.plan_hash, "{fixture}");
    }
}

#[test]
fn comparisons_only_round_trip_through_algebricks() {
    let (mut graph, mut ctx) = comparison_plan();
    checked_driver().optimize(&mut graph, &mut ctx).expect("first run");
    let mut again = thaw(&ctx, &graph);
    let second = checked_driver()
        .optimize(&mut graph, &mut again)
        .expect("second run");
    assert_eq!(second.applied("convert-to-algebricks"), 1);
    assert_eq!(second.applied("convert-from-algebricks"), 1);
    assert_eq!(second.total_applied(), 2);
}

/// `distribute($n) <- assign($n: treat($n-1, item()*)) <- ... <- assign($1: 1)`
fn treat_chain(len: u64) -> (OperatorGraph, OptimizationContext) {
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let mut top = b.add(Operator::assign(v(1), Expr::integer(1)), &[ets]);
    for i in 2..=len {
        let treat = Expr::call(
            FunctionId::Treat,
            vec![
                Expr::var(v(i - 1)),
                Expr::type_arg(SequenceType::star(ItemType::AnyItem)),
            ],
        );
        top = b.add(Operator::assign(v(i), treat), &[top]);
    }
    let top = distribute(&mut b, &[len], top);
    (b.finish(top), OptimizationContext::new())
}

#[test]
fn long_chains_converge_within_the_default_bound() {
    let config = OptimizerConfig::default();
    assert!(config.max_iterations < 1_100);
    let (mut graph, mut ctx) = treat_chain(1_100);
    let report = RuleDriver::new(config)
        .expect("driver")
        .optimize(&mut graph, &mut ctx)
        .expect("optimize");

    assert_eq!(report.applied("remove-redundant-treat"), 1_099);
    assert!(report.iterations < 10, "{} sweeps", report.iterations);
    assert_eq!(
        graph.op(graph.root_node()),
        &Operator::DistributeResult {
            exprs: vec![Expr::var(v(1))]
        }
    );
}

#[test]
fn iteration_bound_is_an_error_not_a_truncation() {
    let (mut graph, mut ctx) = count_pipeline();
    let driver = RuleDriver::new(OptimizerConfig::default().with_max_iterations(2)).expect("driver");
    let err = driver.optimize(&mut graph, &mut ctx).unwrap_err();
    assert!(err.is_non_termination());
    assert!(matches!(err, Error::NonTermination { iterations: 2 }));
    assert!(ctx.is_frozen());
    assert!(matches!(ctx.new_var(), Err(Error::Frozen)));
}

#[test]
fn iterations_count_sweeps() {
    let (mut graph, mut ctx) = scenario_c();
    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");
    // normalization: one sweep with edits plus a quiet one; three more quiet phases.
    assert_eq!(report.iterations, 5);
}

#[test]
fn disabled_rule_never_fires() {
    let (mut graph, mut ctx) = scenario_a();
    let config = OptimizerConfig::default()
        .with_verify(true)
        .disable_rule("introduce-collection");
    let driver = RuleDriver::new(config).expect("driver");
    assert!(!driver
        .rule_names()
        .iter()
        .any(|(_, names)| names.contains(&"introduce-collection")));

    let report = driver.optimize(&mut graph, &mut ctx).expect("optimize");
    assert_eq!(report.total_applied(), 0);
    assert_eq!(ctx.data_sources().count(), 0);
}

#[test]
fn config_from_json_drives_the_optimizer() {
    let config: OptimizerConfig = serde_json::from_str(
        r#"{"max_iterations": 50, "trace_rules": true, "verify_after_each_edit": true}"#,
    )
    .expect("config");
    let (mut graph, mut ctx) = scenario_c();
    let report = RuleDriver::new(config)
        .expect("driver")
        .optimize(&mut graph, &mut ctx)
        .expect("optimize");
    let rules: Vec<_> = report.trace.iter().map(|a| a.rule.as_str()).collect();
    assert_eq!(rules, vec!["remove-redundant-treat", "inline-reference-variables"]);
}
