//! UsedVariables: for each operator, the variables referenced strictly above it.
//!
//! "Above" follows the data flow. Operators in a Subplan's input subtree see
//! every reference made inside the Subplan's nested plans; operators inside a
//! nested plan see their nested ancestors plus the Subplan's own ancestors.
//! A node reachable through several slots gets the union.

use std::collections::{BTreeSet, HashMap};

use xqopt_core::graph::OperatorGraph;
use xqopt_core::id::{NodeId, VarId};

pub fn compute(graph: &OperatorGraph) -> HashMap<NodeId, BTreeSet<VarId>> {
    let mut out: HashMap<NodeId, BTreeSet<VarId>> = HashMap::new();
    let mut pending = vec![(graph.root_node(), BTreeSet::new())];
    while let Some((node, above)) = pending.pop() {
        out.entry(node).or_default().extend(above.iter().copied());

        let n = graph.node(node);
        let mut below = above;
        below.extend(n.op.used_variables());
        for slot in &n.nested {
            pending.push((graph.target(*slot), below.clone()));
        }
        for slot in &n.nested {
            subtree_references(graph, graph.target(*slot), &mut below);
        }
        for slot in &n.inputs {
            pending.push((graph.target(*slot), below.clone()));
        }
    }
    out
}

/// Every variable referenced anywhere in the subtree rooted at `node`.
pub fn subtree_references(graph: &OperatorGraph, node: NodeId, acc: &mut BTreeSet<VarId>) {
    let mut pending = vec![node];
    while let Some(node) = pending.pop() {
        let n = graph.node(node);
        acc.extend(n.op.used_variables());
        pending.extend(n.inputs.iter().chain(&n.nested).map(|s| graph.target(*s)));
    }
}
