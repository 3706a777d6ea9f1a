//! Well-formedness checks for operator graphs.
//!
//! The driver runs `check_well_formed` on its input and, when verification
//! is enabled, after every edit.

use std::collections::{BTreeSet, HashMap};

use xqopt_core::error::{Error, Result};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, VarId};

use crate::schema;

pub fn check_well_formed(graph: &OperatorGraph) -> Result<()> {
    check_acyclic(graph)?;
    check_shapes(graph)?;
    check_unique_producers(graph)?;
    check_scoping(graph)
}

fn check_acyclic(graph: &OperatorGraph) -> Result<()> {
    // false: on the current path, true: finished.
    let mut state: HashMap<NodeId, bool> = HashMap::new();
    let mut pending = vec![(graph.root_node(), false)];
    while let Some((node, leaving)) = pending.pop() {
        if leaving {
            state.insert(node, true);
            continue;
        }
        match state.get(&node) {
            Some(true) => continue,
            Some(false) => return Err(Error::Invariant(format!("cycle through {node}"))),
            None => {}
        }
        state.insert(node, false);
        pending.push((node, true));
        let n = graph.node(node);
        for slot in n.inputs.iter().chain(&n.nested) {
            let child = graph.target(*slot);
            if !graph.contains_node(child) {
                return Err(Error::Invariant(format!("{slot} points at unknown {child}")));
            }
            pending.push((child, false));
        }
    }
    Ok(())
}

fn check_shapes(graph: &OperatorGraph) -> Result<()> {
    for entry in graph.post_order() {
        let node = entry.node;
        let in_nested = entry.scope.is_some();
        let n = graph.node(node);
        let expected_inputs = match &n.op {
            Operator::EmptyTupleSource | Operator::NestedTupleSource => Some(0),
            Operator::Join { .. } => Some(2),
            Operator::DataSourceScan { .. } => None,
            _ => Some(1),
        };
        if let Some(k) = expected_inputs {
            if n.inputs.len() != k {
                return Err(Error::Invariant(format!(
                    "{node} ({}) has {} inputs, expected {k}",
                    n.op.tag(),
                    n.inputs.len()
                )));
            }
        }
        match &n.op {
            Operator::NestedTupleSource if !in_nested => {
                return Err(Error::Invariant(format!(
                    "{node} is a nested-tuple-source outside any nested plan"
                )));
            }
            Operator::Subplan if n.nested.is_empty() => {
                return Err(Error::Invariant(format!("subplan {node} has no nested plan")));
            }
            Operator::Subplan => {}
            _ if !n.nested.is_empty() => {
                return Err(Error::Invariant(format!(
                    "{node} ({}) carries nested plans",
                    n.op.tag()
                )));
            }
            _ => {}
        }
        if let Operator::Assign { variables, exprs } | Operator::Aggregate { variables, exprs } =
            &n.op
        {
            if variables.len() != exprs.len() {
                return Err(Error::Invariant(format!(
                    "{node} binds {} variables with {} expressions",
                    variables.len(),
                    exprs.len()
                )));
            }
        }
    }
    Ok(())
}

fn check_unique_producers(graph: &OperatorGraph) -> Result<()> {
    let mut seen: HashMap<VarId, NodeId> = HashMap::new();
    for n in graph.live_nodes() {
        for v in graph.op(n).produced_variables() {
            if let Some(prev) = seen.insert(v, n) {
                return Err(Error::Invariant(format!("{v} is bound by both {prev} and {n}")));
            }
        }
    }
    Ok(())
}

fn check_scoping(graph: &OperatorGraph) -> Result<()> {
    let schemas = schema::compute(graph);
    for n in graph.live_nodes() {
        let node = graph.node(n);
        let visible: BTreeSet<VarId> = node
            .inputs
            .iter()
            .filter_map(|s| schemas.get(&graph.target(*s)))
            .flatten()
            .copied()
            .collect();
        for v in node.op.used_variables() {
            if !visible.contains(&v) {
                return Err(Error::Invariant(format!(
                    "{n} ({}) references {v} which is not in scope",
                    node.op.tag()
                )));
            }
        }
    }
    Ok(())
}
