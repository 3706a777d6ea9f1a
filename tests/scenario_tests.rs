//! End-to-end rewrites through the full rule catalog.

mod common;

use common::*;
use xqopt_analysis::check_well_formed;
use xqopt_core::prelude::*;

#[test]
fn collection_iterate_becomes_scan() {
    let (mut graph, mut ctx) = scenario_a();
    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");

    let top = graph.root_node();
    let scan = graph.input(top, 0).expect("scan");
    let Operator::DataSourceScan { source, variables } = graph.op(scan) else {
        panic!("expected a scan, got {}", graph.op(scan));
    };
    assert_eq!(variables, &vec![v(2)]);
    let ds = ctx.data_source(*source).expect("registered");
    assert_eq!(ds.collection, "docs");
    assert!(ds.steps.is_empty());
    assert_eq!(
        graph.op(graph.input(scan, 0).expect("leaf")),
        &Operator::EmptyTupleSource
    );
    assert_eq!(report.applied("introduce-collection"), 1);
    assert!(ctx.is_frozen());
}

#[test]
fn child_step_folds_into_scan() {
    let (mut graph, mut ctx, src) = scenario_b();
    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");

    let scan = graph.input(graph.root_node(), 0).expect("scan");
    assert_eq!(graph.op(scan), &Operator::scan(src, v(3)));
    let ds = ctx.data_source(src).expect("registered");
    assert_eq!(
        ds.steps,
        vec![NavigationStep {
            function: FunctionId::Child,
            args: vec![Constant::type_code(SequenceType::one(ItemType::Element))],
        }]
    );
    assert_eq!(report.applied("push-navigation-into-scan"), 1);
    assert_eq!(report.applied("inline-noop-assign"), 1);
    // $1 is gone; only the consumer's variable is left.
    assert_eq!(graph.count_references(v(1)), 0);
}

#[test]
fn child_step_stays_when_scanned_variable_is_used_above() {
    let mut ctx = OptimizationContext::new();
    let src = ctx.register_collection("src").expect("register");
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let scan = b.add(Operator::scan(src, v(1)), &[ets]);
    let unnest = b.add(
        Operator::unnest(v(3), Expr::call(FunctionId::Child, vec![Expr::var(v(1)), element()])),
        &[scan],
    );
    let top = distribute(&mut b, &[1, 3], unnest);
    let mut graph = b.finish(top);

    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");
    assert_eq!(report.applied("push-navigation-into-scan"), 0);
    assert!(ctx.data_source(src).expect("registered").steps.is_empty());
    assert!(matches!(
        graph.op(graph.input(graph.root_node(), 0).expect("unnest")),
        Operator::Unnest { .. }
    ));
}

#[test]
fn redundant_treat_is_removed() {
    let (mut graph, mut ctx) = scenario_c();
    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");

    let top = graph.root_node();
    assert_eq!(
        graph.op(top),
        &Operator::DistributeResult {
            exprs: vec![Expr::var(v(0))]
        }
    );
    let a1 = graph.input(top, 0).expect("assign");
    assert_eq!(graph.op(a1), &Operator::assign(v(1), Expr::var(v(0))));
    let a0 = graph.input(a1, 0).expect("assign");
    assert_eq!(graph.op(a0), &Operator::assign(v(0), Expr::boolean(true)));
    assert_eq!(report.applied("remove-redundant-treat"), 1);
    // The result then reads the copied variable directly.
    assert_eq!(report.applied("inline-reference-variables"), 1);
    assert_eq!(report.total_applied(), 2);
}

#[test]
fn single_item_subplan_becomes_assign() {
    let (mut graph, mut ctx) = scenario_d();
    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");

    let top = graph.root_node();
    let assign = graph.input(top, 0).expect("assign");
    assert_eq!(graph.op(assign), &Operator::assign(v(2), Expr::var(v(0))));
    let src = graph.input(assign, 0).expect("source");
    assert!(
        matches!(graph.op(src), Operator::Assign { variables, .. } if variables == &vec![v(0)])
    );
    assert!(graph
        .live_nodes()
        .iter()
        .all(|n| !matches!(graph.op(*n), Operator::Subplan | Operator::NestedTupleSource)));
    assert_eq!(report.applied("eliminate-subplan-for-single-items"), 1);
    // doc() may be empty, so the treat is kept.
    assert_eq!(report.applied("remove-redundant-treat"), 0);
}

#[test]
fn count_pipeline_uses_every_phase() {
    let (mut graph, mut ctx) = count_pipeline();
    let report = checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");
    check_well_formed(&graph).expect("well formed");

    for rule in [
        "introduce-collection",
        "push-navigation-into-scan",
        "inline-noop-assign",
        "consolidate-aggregate",
        "introduce-two-step-aggregate",
    ] {
        assert_eq!(report.applied(rule), 1, "{rule}");
    }

    let count = graph.input(graph.root_node(), 0).expect("assign");
    assert_eq!(graph.op(count), &Operator::assign(v(6), Expr::var(v(4))));
    let subplan = graph.input(count, 0).expect("subplan");
    assert_eq!(graph.op(subplan), &Operator::Subplan);

    let agg = graph.nested_root(subplan, 0).expect("aggregate");
    let Operator::Aggregate { variables, exprs } = graph.op(agg) else {
        panic!("expected aggregate, got {}", graph.op(agg));
    };
    assert_eq!(variables, &vec![v(4)]);
    let call = exprs[0].as_call().expect("call");
    assert_eq!(call.function, FunctionId::Count);
    assert_eq!(call.args, vec![Expr::var(v(5))]);
    assert_eq!(call.two_step, Some((FunctionId::Count, FunctionId::Sum)));

    let scan = graph.input(subplan, 0).expect("scan");
    let Operator::DataSourceScan { source, variables } = graph.op(scan) else {
        panic!("expected scan, got {}", graph.op(scan));
    };
    assert_eq!(variables, &vec![v(3)]);
    let ds = ctx.data_source(*source).expect("registered");
    assert_eq!(ds.collection, "books");
    let steps: Vec<_> = ds.steps.iter().map(|s| s.function).collect();
    assert_eq!(steps, vec![FunctionId::Child]);

    // The trace follows the phase order.
    let phases: Vec<_> = report.trace.iter().map(|a| a.phase.as_str()).collect();
    let first_aggregation = phases
        .iter()
        .position(|p| *p == "aggregation")
        .expect("aggregation ran");
    assert!(phases[..first_aggregation].iter().all(|p| *p == "normalization"));
}

#[test]
fn report_is_deterministic_across_compilations() {
    let (mut g1, mut c1) = count_pipeline();
    let (mut g2, mut c2) = count_pipeline();
    let driver = checked_driver();
    let r1 = driver.optimize(&mut g1, &mut c1).expect("first");
    let r2 = driver.optimize(&mut g2, &mut c2).expect("second");

    assert_eq!(r1.plan_hash, r2.plan_hash);
    assert_eq!(r1.rules_applied, r2.rules_applied);
    assert_eq!(r1.iterations, r2.iterations);
    assert_ne!(r1.compilation_id, r2.compilation_id);

    let json = r1.to_json().expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
    assert_eq!(value["rules_applied"]["consolidate-aggregate"], 1);
    assert_eq!(value["plan_hash"], serde_json::json!(r1.plan_hash));
}

#[test]
fn variable_watermark_stays_above_every_id() {
    let (mut graph, mut ctx) = count_pipeline();
    checked_driver().optimize(&mut graph, &mut ctx).expect("optimize");
    let max = graph.max_variable().expect("variables").get();
    assert!(ctx.variable_high_watermark() > max);
}
