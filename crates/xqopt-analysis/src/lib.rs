#![forbid(unsafe_code)]
//! xqopt-analysis: monotone dataflow analyses over the operator graph.
//!
//! Each analysis computes a map for the whole live plan in one pass. The
//! functions at the crate root read through the context's cache and fill it
//! on a miss; the driver drops the cache after every edit, so results are
//! always recomputed from scratch, never patched.

pub mod cardinality;
pub mod doc_order;
pub mod schema;
pub mod typing;
pub mod used_vars;
pub mod verify;

use std::collections::BTreeSet;

use xqopt_core::context::OptimizationContext;
use xqopt_core::error::Result;
use xqopt_core::expr::Expr;
use xqopt_core::functions::FunctionCatalog;
use xqopt_core::graph::OperatorGraph;
use xqopt_core::id::{NodeId, VarId};
use xqopt_core::props::{Cardinality, VariableProperties};
use xqopt_core::types::{SequenceType, TypeSystem};

pub use typing::TypeEnv;
pub use verify::check_well_formed;

/// Variables referenced strictly above `node`.
pub fn used_above(
    graph: &OperatorGraph,
    ctx: &mut OptimizationContext,
    node: NodeId,
) -> BTreeSet<VarId> {
    ctx.cache_mut()
        .used_above
        .get_or_insert_with(|| used_vars::compute(graph))
        .get(&node)
        .cloned()
        .unwrap_or_default()
}

pub fn is_live_above(
    graph: &OperatorGraph,
    ctx: &mut OptimizationContext,
    node: NodeId,
    var: VarId,
) -> bool {
    ctx.cache_mut()
        .used_above
        .get_or_insert_with(|| used_vars::compute(graph))
        .get(&node)
        .map(|s| s.contains(&var))
        .unwrap_or(false)
}

/// Unreachable nodes report `Many`.
pub fn cardinality(
    graph: &OperatorGraph,
    ctx: &mut OptimizationContext,
    node: NodeId,
) -> Cardinality {
    ctx.cache_mut()
        .cardinality
        .get_or_insert_with(|| cardinality::compute(graph))
        .get(&node)
        .copied()
        .unwrap_or(Cardinality::Many)
}

pub fn properties(
    graph: &OperatorGraph,
    ctx: &mut OptimizationContext,
    catalog: &dyn FunctionCatalog,
    node: NodeId,
) -> Result<VariableProperties> {
    if ctx.cache().properties.is_none() {
        let computed = doc_order::compute(graph, catalog)?;
        ctx.cache_mut().properties = Some(computed);
    }
    Ok(ctx
        .cache()
        .properties
        .as_ref()
        .and_then(|m| m.get(&node))
        .cloned()
        .unwrap_or_default())
}

pub fn schema(graph: &OperatorGraph, ctx: &mut OptimizationContext, node: NodeId) -> Vec<VarId> {
    ctx.cache_mut()
        .schema
        .get_or_insert_with(|| schema::compute(graph))
        .get(&node)
        .cloned()
        .unwrap_or_default()
}

pub fn producer(graph: &OperatorGraph, ctx: &mut OptimizationContext, var: VarId) -> Option<NodeId> {
    ctx.cache_mut()
        .producers
        .get_or_insert_with(|| typing::producers(graph))
        .get(&var)
        .copied()
}

pub fn static_type(
    graph: &OperatorGraph,
    ctx: &mut OptimizationContext,
    catalog: &dyn FunctionCatalog,
    types: &dyn TypeSystem,
    expr: &Expr,
) -> Result<Option<SequenceType>> {
    let producers = ctx
        .cache_mut()
        .producers
        .get_or_insert_with(|| typing::producers(graph));
    TypeEnv {
        graph,
        producers,
        catalog,
        types,
    }
    .static_type(expr)
}
