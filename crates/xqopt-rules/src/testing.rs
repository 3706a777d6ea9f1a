//! Single-rule harness for unit tests: one traversal, first match applied.

use xqopt_core::context::OptimizationContext;
use xqopt_core::error::Result;
use xqopt_core::functions::BuiltinCatalog;
use xqopt_core::graph::OperatorGraph;
use xqopt_core::id::SlotId;
use xqopt_core::types::BuiltinTypeSystem;

use crate::apply::apply_rewrite;
use crate::rule::{Rewrite, RewriteContext, Rule};

pub struct Harness {
    pub graph: OperatorGraph,
    pub ctx: OptimizationContext,
    pub catalog: BuiltinCatalog,
    pub types: BuiltinTypeSystem,
}

impl Harness {
    pub fn new(graph: OperatorGraph) -> Self {
        let mut ctx = OptimizationContext::new();
        ctx.observe_graph(&graph);
        Self {
            graph,
            ctx,
            catalog: BuiltinCatalog::new(),
            types: BuiltinTypeSystem,
        }
    }
}

fn find(rule: &dyn Rule, root: SlotId, h: &mut Harness) -> Result<Option<Rewrite>> {
    // (slot, children already visited)
    let mut stack = vec![(root, false)];
    while let Some((slot, post)) = stack.pop() {
        let mut cx = RewriteContext::new(&mut h.ctx, &h.catalog, &h.types);
        if post {
            if let Some(rw) = rule.rewrite_post(slot, &h.graph, &mut cx)? {
                return Ok(Some(rw));
            }
            continue;
        }
        if let Some(rw) = rule.rewrite_pre(slot, &h.graph, &mut cx)? {
            return Ok(Some(rw));
        }
        stack.push((slot, true));
        let node = h.graph.node(h.graph.target(slot));
        stack.extend(node.inputs.iter().chain(&node.nested).rev().map(|c| (*c, false)));
    }
    Ok(None)
}

/// Run one traversal of `rule`; apply the first rewrite found.
pub fn apply_once(rule: &dyn Rule, h: &mut Harness) -> Result<bool> {
    let root = h.graph.root();
    match find(rule, root, h)? {
        Some(rw) => {
            apply_rewrite(&mut h.graph, &mut h.ctx, &rw)?;
            h.ctx.invalidate_analyses();
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Apply `rule` until it stops matching; returns the number of applications.
pub fn apply_to_fixed_point(rule: &dyn Rule, h: &mut Harness) -> Result<usize> {
    let mut n = 0;
    while apply_once(rule, h)? {
        n += 1;
        assert!(n < 100, "{} does not converge", rule.name());
    }
    Ok(n)
}
