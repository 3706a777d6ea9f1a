//! CardinalityPropagation: ONE or MANY rows per operator.

use std::collections::HashMap;

use xqopt_core::graph::{Operator, OperatorGraph, ScopedNode};
use xqopt_core::id::{NodeId, SlotId};
use xqopt_core::props::Cardinality;

pub fn compute(graph: &OperatorGraph) -> HashMap<NodeId, Cardinality> {
    let mut out: HashMap<NodeId, Cardinality> = HashMap::new();
    let at = |out: &HashMap<NodeId, Cardinality>, slot: Option<&SlotId>| {
        slot.and_then(|s| out.get(&graph.target(*s)))
            .copied()
            .unwrap_or(Cardinality::One)
    };

    for ScopedNode { node, scope } in graph.post_order() {
        let n = graph.node(node);
        let first = at(&out, n.inputs.first());
        let card = match &n.op {
            Operator::EmptyTupleSource | Operator::Aggregate { .. } => Cardinality::One,
            // Same cardinality as the enclosing Subplan's input.
            Operator::NestedTupleSource => at(&out, scope.and_then(|sp| graph.node(sp).inputs.first())),
            Operator::DataSourceScan { .. } | Operator::Unnest { .. } | Operator::Join { .. } => {
                Cardinality::Many
            }
            Operator::Limit { count: 1 } => Cardinality::One,
            Operator::Assign { .. }
            | Operator::Select { .. }
            | Operator::Order { .. }
            | Operator::Project { .. }
            | Operator::Limit { .. }
            | Operator::DistributeResult { .. } => first,
            Operator::Subplan => {
                let nested_many = n
                    .nested
                    .iter()
                    .any(|s| at(&out, Some(s)) == Cardinality::Many);
                if nested_many {
                    Cardinality::Many
                } else {
                    first
                }
            }
        };
        out.insert(node, card);
    }
    out
}
