//! Variables visible at the output of each operator.

use std::collections::HashMap;

use xqopt_core::graph::{Operator, OperatorGraph, ScopedNode};
use xqopt_core::id::{NodeId, SlotId, VarId};

pub fn compute(graph: &OperatorGraph) -> HashMap<NodeId, Vec<VarId>> {
    let mut out: HashMap<NodeId, Vec<VarId>> = HashMap::new();
    let at = |out: &HashMap<NodeId, Vec<VarId>>, slot: Option<&SlotId>| {
        slot.and_then(|s| out.get(&graph.target(*s)))
            .cloned()
            .unwrap_or_default()
    };

    for ScopedNode { node, scope } in graph.post_order() {
        let n = graph.node(node);
        let first = at(&out, n.inputs.first());
        let schema = match &n.op {
            Operator::EmptyTupleSource => Vec::new(),
            Operator::NestedTupleSource => {
                at(&out, scope.and_then(|sp| graph.node(sp).inputs.first()))
            }
            Operator::DataSourceScan { variables, .. } | Operator::Assign { variables, .. } => {
                append(first, variables.iter().copied())
            }
            Operator::Unnest {
                variable,
                positional,
                ..
            } => append(first, std::iter::once(*variable).chain(*positional)),
            Operator::Aggregate { variables, .. } | Operator::Project { variables } => {
                variables.clone()
            }
            Operator::Select { .. }
            | Operator::Order { .. }
            | Operator::Limit { .. }
            | Operator::DistributeResult { .. } => first,
            Operator::Join { .. } => n
                .inputs
                .iter()
                .fold(Vec::new(), |acc, s| append(acc, at(&out, Some(s)).into_iter())),
            Operator::Subplan => n
                .nested
                .iter()
                .fold(first, |acc, s| append(acc, at(&out, Some(s)).into_iter())),
        };
        out.insert(node, schema);
    }
    out
}

fn append(mut base: Vec<VarId>, extra: impl Iterator<Item = VarId>) -> Vec<VarId> {
    for v in extra {
        if !base.contains(&v) {
            base.push(v);
        }
    }
    base
}
