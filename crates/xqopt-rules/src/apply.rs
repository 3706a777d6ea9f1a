//! Materializing a `Rewrite` into the graph.
//!
//! Every replacement node is fully built before its slot is written, and all
//! edits of one rewrite land before any rule runs again.

use xqopt_core::context::OptimizationContext;
use xqopt_core::error::Result;
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, SlotId};

use crate::rule::{EditOp, NodeSpec, Rewrite, Target};

fn materialize(graph: &mut OperatorGraph, spec: &NodeSpec) -> NodeId {
    let inputs: Vec<NodeId> = spec.inputs.iter().map(|t| resolve(graph, t)).collect();
    let nested: Vec<NodeId> = spec.nested.iter().map(|t| resolve(graph, t)).collect();
    graph.insert(spec.op.clone(), &inputs, &nested)
}

fn resolve(graph: &mut OperatorGraph, target: &Target) -> NodeId {
    match target {
        Target::Existing(id) => *id,
        Target::New(spec) => materialize(graph, spec),
    }
}

/// Apply every edit and return the slots that were written.
pub fn apply_rewrite(
    graph: &mut OperatorGraph,
    ctx: &mut OptimizationContext,
    rewrite: &Rewrite,
) -> Result<Vec<SlotId>> {
    ctx.ensure_mutable()?;
    let mut written = Vec::new();
    for edit in &rewrite.edits {
        match edit {
            EditOp::Replace { slot, with } => {
                let node = materialize(graph, with);
                graph.set_target(*slot, node)?;
                written.push(*slot);
            }
            EditOp::Redirect { slot, to } => {
                graph.set_target(*slot, *to)?;
                written.push(*slot);
            }
            EditOp::AppendSteps { source, steps } => ctx.append_steps(*source, steps)?,
            EditOp::ScanCollection {
                slot,
                collection,
                variable,
                input,
            } => {
                let source = ctx.register_collection(collection)?;
                let input = resolve(graph, input);
                let node = graph.insert(Operator::scan(source, *variable), &[input], &[]);
                graph.set_target(*slot, node)?;
                tracing::trace!(collection = %collection, source = %source, "registered data source");
                written.push(*slot);
            }
        }
    }
    Ok(written)
}
