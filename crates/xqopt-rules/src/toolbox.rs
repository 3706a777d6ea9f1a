//! Shared matching helpers for rules.

use xqopt_core::error::{Error, Result};
use xqopt_core::expr::{Expr, FunctionCall};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, SlotId};
use xqopt_core::types::{ConstantValue, SequenceType, TypeSystem};

use crate::rule::{NodeSpec, RewriteContext};

/// The only input of `node`, as (slot, child).
pub fn single_input(graph: &OperatorGraph, node: NodeId) -> Option<(SlotId, NodeId)> {
    let n = graph.node(node);
    match n.inputs.as_slice() {
        [slot] => Some((*slot, graph.target(*slot))),
        _ => None,
    }
}

/// The only nested root of a Subplan, as (slot, root).
pub fn single_nested(graph: &OperatorGraph, node: NodeId) -> Option<(SlotId, NodeId)> {
    let n = graph.node(node);
    match (&n.op, n.nested.as_slice()) {
        (Operator::Subplan, [slot]) => Some((*slot, graph.target(*slot))),
        _ => None,
    }
}

/// Walk a linear chain from `top` down to its NestedTupleSource leaf and
/// return the slot that holds the leaf. `None` if the chain branches or ends
/// anywhere else.
pub fn nested_leaf_slot(graph: &OperatorGraph, top: NodeId) -> Option<SlotId> {
    let mut cur = top;
    loop {
        let (slot, child) = single_input(graph, cur)?;
        match graph.op(child) {
            Operator::NestedTupleSource => return Some(slot),
            Operator::Subplan | Operator::Join { .. } => return None,
            _ => cur = child,
        }
    }
}

pub fn constant_string(types: &dyn TypeSystem, expr: &Expr) -> Result<Option<String>> {
    match expr.as_constant() {
        Some(c) => match types.decode_constant(c)? {
            ConstantValue::String(s) => Ok(Some(s)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

/// Target type of a `treat`/`cast`/`promote` call.
pub fn type_argument(types: &dyn TypeSystem, call: &FunctionCall) -> Result<Option<SequenceType>> {
    let Some(c) = call.args.get(1).and_then(|a| a.as_constant()) else {
        return Ok(None);
    };
    match types.decode_constant(c)? {
        ConstantValue::Integer(code) => types.lookup_sequence_type(code).map(Some),
        other => Err(Error::MalformedConstant(format!(
            "{} expects a type code, got {other:?}",
            call.function
        ))),
    }
}

pub type CallRewriter<'r> = dyn FnMut(&FunctionCall, &mut RewriteContext<'_>) -> Result<Option<Expr>> + 'r;

/// Post-order rewrite of every call in `expr`. Returns `None` when nothing
/// changed.
pub fn transform_calls(
    expr: &Expr,
    cx: &mut RewriteContext<'_>,
    f: &mut CallRewriter<'_>,
) -> Result<Option<Expr>> {
    let Expr::Call(call) = expr else {
        return Ok(None);
    };
    let mut changed = false;
    let mut args = Vec::with_capacity(call.args.len());
    for a in &call.args {
        match transform_calls(a, cx, f)? {
            Some(new) => {
                changed = true;
                args.push(new);
            }
            None => args.push(a.clone()),
        }
    }
    let rebuilt = FunctionCall {
        args,
        ..call.clone()
    };
    match f(&rebuilt, cx)? {
        Some(new) => Ok(Some(new)),
        None if changed => Ok(Some(Expr::Call(rebuilt))),
        None => Ok(None),
    }
}

/// Apply `transform_calls` to every expression of `node`; on any change,
/// return a replacement spec with the same children.
pub fn rewrite_node_calls(
    graph: &OperatorGraph,
    node: NodeId,
    cx: &mut RewriteContext<'_>,
    f: &mut CallRewriter<'_>,
) -> Result<Option<NodeSpec>> {
    let op = graph.op(node);
    let mut replaced = Vec::new();
    let mut changed = false;
    for e in op.expressions() {
        let new = transform_calls(e, cx, f)?;
        changed |= new.is_some();
        replaced.push(new);
    }
    if !changed {
        return Ok(None);
    }
    let mut it = replaced.into_iter();
    let new_op = op.map_expressions(|old| it.next().flatten().unwrap_or_else(|| old.clone()));
    Ok(Some(NodeSpec::like(graph, node, new_op)))
}
