//! Drops node-sequence normalization that document order and uniqueness
//! already guarantee.
//!
//! | unique | ordered | `sort-distinct-nodes-asc-or-atomics(x)` becomes |
//! |--------|---------|--------------------------------------------------|
//! | yes    | yes     | `x`                                              |
//! | yes    | no      | `sort-nodes-asc(x)`                              |
//! | no     | yes     | `distinct-nodes-or-atomics(x)`                   |
//! | no     | no      | unchanged                                        |
//!
//! `distinct-nodes-or-atomics(x)` over unique `x` and `sort-nodes-asc(x)`
//! over ordered `x` both reduce to `x`.

use xqopt_analysis::doc_order;
use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionCall, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::SlotId;
use xqopt_core::props::{DocumentOrder, UniqueNodes, VariableProperties};

use crate::rule::{Rewrite, RewriteContext, Rule};
use crate::toolbox::{rewrite_node_calls, single_input};

pub struct RemoveUnusedSortDistinctNodes;

fn simplify(
    call: &FunctionCall,
    props: &VariableProperties,
    cx: &RewriteContext<'_>,
) -> Result<Option<Expr>> {
    if !matches!(
        call.function,
        FunctionId::SortDistinctNodesAscOrAtomics
            | FunctionId::DistinctNodesOrAtomics
            | FunctionId::SortNodesAsc
    ) {
        return Ok(None);
    }
    let [arg] = call.args.as_slice() else {
        return Ok(None);
    };
    let (order, unique) = doc_order::evaluate(cx.catalog, arg, props)?;
    let ordered = order == DocumentOrder::Yes;
    let distinct = unique == UniqueNodes::Yes;
    let replaced = match (call.function, distinct, ordered) {
        (FunctionId::SortDistinctNodesAscOrAtomics, true, true) => arg.clone(),
        (FunctionId::SortDistinctNodesAscOrAtomics, true, false) => {
            Expr::call(FunctionId::SortNodesAsc, vec![arg.clone()])
        }
        (FunctionId::SortDistinctNodesAscOrAtomics, false, true) => {
            Expr::call(FunctionId::DistinctNodesOrAtomics, vec![arg.clone()])
        }
        (FunctionId::DistinctNodesOrAtomics, true, _) => arg.clone(),
        (FunctionId::SortNodesAsc, _, true) => arg.clone(),
        _ => return Ok(None),
    };
    Ok(Some(replaced))
}

impl Rule for RemoveUnusedSortDistinctNodes {
    fn name(&self) -> &'static str {
        "remove-unused-sort-distinct-nodes"
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        if !matches!(graph.op(node), Operator::Assign { .. }) {
            return Ok(None);
        }
        let Some((_, input)) = single_input(graph, node) else {
            return Ok(None);
        };
        let props = cx.properties(graph, input)?;
        let spec = rewrite_node_calls(graph, node, cx, &mut |call, cx| {
            simplify(call, &props, cx)
        })?;
        Ok(spec.map(|s| Rewrite::replace(slot, s)))
    }
}
