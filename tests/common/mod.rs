//! Plans shared by the integration tests.
#![allow(dead_code)]

use xqopt_core::prelude::*;
use xqopt_driver::RuleDriver;

pub fn v(n: u64) -> VarId {
    VarId::new(n)
}

pub fn iterate(of: VarId) -> Expr {
    Expr::call(FunctionId::Iterate, vec![Expr::var(of)])
}

pub fn element() -> Expr {
    Expr::type_arg(SequenceType::one(ItemType::Element))
}

pub fn distribute(b: &mut GraphBuilder, vars: &[u64], input: NodeId) -> NodeId {
    b.add(
        Operator::DistributeResult {
            exprs: vars.iter().map(|i| Expr::var(v(*i))).collect(),
        },
        &[input],
    )
}

/// Driver with per-edit verification and the trace on.
pub fn checked_driver() -> RuleDriver {
    let config = OptimizerConfig::default().with_verify(true).with_trace(true);
    RuleDriver::new(config).expect("valid config")
}

/// A fresh, mutable context carrying the data sources of a finished one.
pub fn thaw(done: &OptimizationContext, graph: &OperatorGraph) -> OptimizationContext {
    let mut ctx = OptimizationContext::new();
    for ds in done.data_sources() {
        let id = ctx.register_collection(&ds.collection).expect("register");
        assert_eq!(id, ds.id);
        ctx.append_steps(id, &ds.steps).expect("steps");
    }
    ctx.observe_graph(graph);
    ctx
}

/// `Unnest($2: iterate($1)) <- Assign($1: collection("docs")) <- ETS`
pub fn scenario_a() -> (OperatorGraph, OptimizationContext) {
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let coll = b.add(
        Operator::assign(v(1), Expr::call(FunctionId::Collection, vec![Expr::string("docs")])),
        &[ets],
    );
    let unnest = b.add(Operator::unnest(v(2), iterate(v(1))), &[coll]);
    let top = distribute(&mut b, &[2], unnest);
    (b.finish(top), OptimizationContext::new())
}

/// `Unnest($3: child($1, element())) <- DataSourceScan(src, $1)`
pub fn scenario_b() -> (OperatorGraph, OptimizationContext, DataSourceId) {
    let mut ctx = OptimizationContext::new();
    let src = ctx.register_collection("src").expect("register");
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let scan = b.add(Operator::scan(src, v(1)), &[ets]);
    let unnest = b.add(
        Operator::unnest(v(3), Expr::call(FunctionId::Child, vec![Expr::var(v(1)), element()])),
        &[scan],
    );
    let top = distribute(&mut b, &[3], unnest);
    (b.finish(top), ctx, src)
}

/// `Assign($1: treat($0, xs:boolean)) <- Assign($0: true)`
pub fn scenario_c() -> (OperatorGraph, OptimizationContext) {
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let a0 = b.add(Operator::assign(v(0), Expr::boolean(true)), &[ets]);
    let a1 = b.add(
        Operator::assign(
            v(1),
            Expr::call(
                FunctionId::Treat,
                vec![Expr::var(v(0)), Expr::type_arg(SequenceType::one(ItemType::Boolean))],
            ),
        ),
        &[a0],
    );
    let top = distribute(&mut b, &[1], a1);
    (b.finish(top), OptimizationContext::new())
}

/// `Subplan{Aggregate($2: sequence($1)) <- Unnest($1: iterate($0)) <- NTS}
///  <- Assign($0: treat($9, node())) <- Assign($9: doc("a.xml"))`
pub fn scenario_d() -> (OperatorGraph, OptimizationContext) {
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let doc = b.add(
        Operator::assign(v(9), Expr::call(FunctionId::Doc, vec![Expr::string("a.xml")])),
        &[ets],
    );
    let src = b.add(
        Operator::assign(
            v(0),
            Expr::call(
                FunctionId::Treat,
                vec![Expr::var(v(9)), Expr::type_arg(SequenceType::one(ItemType::AnyNode))],
            ),
        ),
        &[doc],
    );
    let nts = b.leaf(Operator::NestedTupleSource);
    let unnest = b.add(Operator::unnest(v(1), iterate(v(0))), &[nts]);
    let agg = b.add(
        Operator::aggregate(v(2), Expr::call(FunctionId::Sequence, vec![Expr::var(v(1))])),
        &[unnest],
    );
    let sp = b.subplan(src, &[agg]);
    let top = distribute(&mut b, &[2], sp);
    (b.finish(top), OptimizationContext::new())
}

/// `count(collection("books")/child::element()/child::element())`:
///
/// ```text
/// distribute($6)
///   assign($6: count($4))
///     subplan { aggregate($4: sequence($5)) <- unnest($5: child($3, element())) <- nts }
///       unnest($3: child($2, element()))
///         unnest($2: iterate($1))
///           assign($1: collection("books")) <- ets
/// ```
pub fn count_pipeline() -> (OperatorGraph, OptimizationContext) {
    let mut b = GraphBuilder::new();
    let ets = b.leaf(Operator::EmptyTupleSource);
    let coll = b.add(
        Operator::assign(v(1), Expr::call(FunctionId::Collection, vec![Expr::string("books")])),
        &[ets],
    );
    let items = b.add(Operator::unnest(v(2), iterate(v(1))), &[coll]);
    let books = b.add(
        Operator::unnest(v(3), Expr::call(FunctionId::Child, vec![Expr::var(v(2)), element()])),
        &[items],
    );
    let nts = b.leaf(Operator::NestedTupleSource);
    let titles = b.add(
        Operator::unnest(v(5), Expr::call(FunctionId::Child, vec![Expr::var(v(3)), element()])),
        &[nts],
    );
    let agg = b.add(
        Operator::aggregate(v(4), Expr::call(FunctionId::Sequence, vec![Expr::var(v(5))])),
        &[titles],
    );
    let sp = b.subplan(books, &[agg]);
    let count = b.add(
        Operator::assign(v(6), Expr::call(FunctionId::Count, vec![Expr::var(v(4))])),
        &[sp],
    );
    let top = distribute(&mut b, &[6], count);
    (b.finish(top), OptimizationContext::new())
}
