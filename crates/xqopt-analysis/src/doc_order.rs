//! DocumentOrderPropagation and its twin, unique-node propagation.
//!
//! Both use the {YES, NO, UNKNOWN} lattice and are driven by the per-function
//! policies in the catalog. Every operator kind is handled explicitly so a new
//! operator cannot silently drop the analysis.

use std::collections::HashMap;

use xqopt_core::error::Result;
use xqopt_core::expr::Expr;
use xqopt_core::functions::FunctionCatalog;
use xqopt_core::graph::{Operator, OperatorGraph, ScopedNode};
use xqopt_core::id::{NodeId, SlotId};
use xqopt_core::props::{DocumentOrder, UniqueNodes, VariableProperties};

pub fn compute(
    graph: &OperatorGraph,
    catalog: &dyn FunctionCatalog,
) -> Result<HashMap<NodeId, VariableProperties>> {
    let mut out: HashMap<NodeId, VariableProperties> = HashMap::new();
    let at = |out: &HashMap<NodeId, VariableProperties>, slot: Option<&SlotId>| {
        slot.and_then(|s| out.get(&graph.target(*s)))
            .cloned()
            .unwrap_or_default()
    };

    for ScopedNode { node, scope } in graph.post_order() {
        let n = graph.node(node);
        let first = at(&out, n.inputs.first());
        let props = match &n.op {
            Operator::EmptyTupleSource => VariableProperties::default(),
            Operator::NestedTupleSource => {
                at(&out, scope.and_then(|sp| graph.node(sp).inputs.first()))
            }
            Operator::DataSourceScan { variables, .. } => {
                // Each scanned item is its own row.
                let mut p = first;
                p.reset_all();
                for v in variables {
                    p.set(*v, DocumentOrder::Yes, UniqueNodes::Yes);
                }
                p
            }
            Operator::Unnest {
                variable,
                positional,
                ..
            } => {
                // Row duplication invalidates every earlier per-row guarantee.
                let mut p = first;
                p.reset_all();
                p.set(*variable, DocumentOrder::Yes, UniqueNodes::Yes);
                if let Some(pos) = positional {
                    p.set(*pos, DocumentOrder::Yes, UniqueNodes::Yes);
                }
                p
            }
            Operator::Assign { variables, exprs } => {
                let mut p = first.clone();
                for (v, e) in variables.iter().zip(exprs) {
                    let (o, u) = evaluate(catalog, e, &first)?;
                    p.set(*v, o, u);
                }
                p
            }
            Operator::Aggregate { variables, exprs } => {
                let mut p = VariableProperties::default();
                for (v, e) in variables.iter().zip(exprs) {
                    let (o, u) = evaluate(catalog, e, &first)?;
                    p.set(*v, o, u);
                }
                p
            }
            Operator::Select { .. } | Operator::Limit { .. } | Operator::DistributeResult { .. } => {
                first
            }
            Operator::Order { keys } => {
                let mut p = first;
                for v in keys.iter().filter_map(|k| k.expr.as_var()) {
                    p.order.insert(v, DocumentOrder::No);
                }
                p
            }
            Operator::Project { variables } => {
                let mut p = first;
                p.retain(|v| variables.contains(&v));
                p
            }
            Operator::Join { .. } => {
                let mut p = VariableProperties::default();
                for slot in &n.inputs {
                    p.extend(&at(&out, Some(slot)));
                }
                p.reset_all();
                p
            }
            Operator::Subplan => {
                let mut p = first;
                for slot in &n.nested {
                    p.extend(&at(&out, Some(slot)));
                }
                p
            }
        };
        out.insert(node, props);
    }
    Ok(out)
}

/// Order and uniqueness of an expression's value given the input flags.
pub fn evaluate(
    catalog: &dyn FunctionCatalog,
    expr: &Expr,
    props: &VariableProperties,
) -> Result<(DocumentOrder, UniqueNodes)> {
    match expr {
        Expr::Var(v) => Ok((props.order_of(*v), props.unique_of(*v))),
        Expr::Constant(_) => Ok((DocumentOrder::Yes, UniqueNodes::Yes)),
        Expr::Call(call) => {
            let info = catalog.info(call.function)?;
            let mut orders = Vec::with_capacity(call.args.len());
            let mut uniques = Vec::with_capacity(call.args.len());
            for a in &call.args {
                let (o, u) = evaluate(catalog, a, props)?;
                orders.push(o);
                uniques.push(u);
            }
            Ok((
                info.order_policy.propagate(orders),
                info.unique_policy.propagate(uniques),
            ))
        }
    }
}
