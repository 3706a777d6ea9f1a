//! Copy propagation for variable-to-variable assignments.

use std::collections::BTreeMap;

use xqopt_core::error::Result;
use xqopt_core::expr::Expr;
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, SlotId, VarId};

use crate::rule::{NodeSpec, Rewrite, RewriteContext, Rule};

/// A read of `$b`, where `Assign($b: $a)` sits below the reader in its own
/// pipeline, becomes a read of `$a`. The copy itself stays; it is dead
/// once every reader has been rewritten.
pub struct InlineReferenceVariables;

/// The variable `var` copies, if its binding is `Assign($var: $src)` and is
/// reached from `node` through first inputs that keep every variable in
/// scope.
fn copy_source(graph: &OperatorGraph, node: NodeId, var: VarId) -> Option<VarId> {
    let mut at = graph.input(node, 0)?;
    loop {
        match graph.op(at) {
            Operator::Assign { variables, exprs } => {
                if let Some(i) = variables.iter().position(|v| *v == var) {
                    let src = exprs.get(i)?.as_var()?;
                    return (!variables.contains(&src)).then_some(src);
                }
            }
            Operator::Select { .. }
            | Operator::Unnest { .. }
            | Operator::Order { .. }
            | Operator::Limit { .. }
            | Operator::DataSourceScan { .. }
            | Operator::Subplan => {}
            _ => return None,
        }
        at = graph.input(at, 0)?;
    }
}

impl Rule for InlineReferenceVariables {
    fn name(&self) -> &'static str {
        "inline-reference-variables"
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        _cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let op = graph.op(node);
        let mut read = std::collections::BTreeSet::new();
        for e in op.expressions() {
            e.collect_variables(&mut read);
        }
        let renames: BTreeMap<VarId, Expr> = read
            .into_iter()
            .filter_map(|v| copy_source(graph, node, v).map(|src| (v, Expr::var(src))))
            .collect();
        if renames.is_empty() {
            return Ok(None);
        }
        tracing::trace!(node = %node, copies = renames.len(), "inlining variable copies");
        let rewritten = op.map_expressions(|e| {
            renames
                .iter()
                .fold(e.clone(), |acc, (from, to)| acc.substitute(*from, to))
        });
        Ok(Some(Rewrite::replace(
            slot,
            NodeSpec::like(graph, node, rewritten),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{apply_once, apply_to_fixed_point, Harness};
    use xqopt_core::prelude::*;

    fn v(n: u64) -> VarId {
        VarId::new(n)
    }

    #[test]
    fn reader_takes_the_copied_variable() {
        // distribute($3) <- select(not($2)) <- assign($2: $1) <- assign($1: true)
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let one = b.add(Operator::assign(v(1), Expr::boolean(true)), &[ets]);
        let copy = b.add(Operator::assign(v(2), Expr::var(v(1))), &[one]);
        let select = b.add(
            Operator::Select {
                condition: Expr::call(FunctionId::Not, vec![Expr::var(v(2))]),
            },
            &[copy],
        );
        let top = b.add(
            Operator::DistributeResult {
                exprs: vec![Expr::var(v(2))],
            },
            &[select],
        );
        let mut h = Harness::new(b.finish(top));
        assert_eq!(apply_to_fixed_point(&InlineReferenceVariables, &mut h).expect("apply"), 2);

        let root = h.graph.root_node();
        assert_eq!(
            h.graph.op(root),
            &Operator::DistributeResult {
                exprs: vec![Expr::var(v(1))]
            }
        );
        // The copy is kept but nothing reads it.
        assert_eq!(h.graph.count_references(v(2)), 0);
        assert!(h.graph.live_nodes().iter().any(|n| h.graph.op(*n) == &Operator::assign(v(2), Expr::var(v(1)))));
    }

    #[test]
    fn copy_chains_collapse_to_the_origin() {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let mut top = b.add(Operator::assign(v(1), Expr::integer(7)), &[ets]);
        for i in 2..=4 {
            top = b.add(Operator::assign(v(i), Expr::var(v(i - 1))), &[top]);
        }
        let top = b.add(
            Operator::DistributeResult {
                exprs: vec![Expr::var(v(4))],
            },
            &[top],
        );
        let mut h = Harness::new(b.finish(top));
        apply_to_fixed_point(&InlineReferenceVariables, &mut h).expect("apply");
        assert_eq!(
            h.graph.op(h.graph.root_node()),
            &Operator::DistributeResult {
                exprs: vec![Expr::var(v(1))]
            }
        );
    }

    #[test]
    fn projection_stops_the_search() {
        // distribute($2) <- project($2) <- assign($2: $1) <- assign($1: 1)
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let one = b.add(Operator::assign(v(1), Expr::integer(1)), &[ets]);
        let copy = b.add(Operator::assign(v(2), Expr::var(v(1))), &[one]);
        let project = b.add(Operator::Project { variables: vec![v(2)] }, &[copy]);
        let top = b.add(
            Operator::DistributeResult {
                exprs: vec![Expr::var(v(2))],
            },
            &[project],
        );
        let mut h = Harness::new(b.finish(top));
        assert!(!apply_once(&InlineReferenceVariables, &mut h).expect("apply"));
    }

    #[test]
    fn computed_bindings_are_not_inlined() {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let one = b.add(Operator::assign(v(1), Expr::integer(1)), &[ets]);
        let top = b.add(
            Operator::DistributeResult {
                exprs: vec![Expr::var(v(1))],
            },
            &[one],
        );
        let mut h = Harness::new(b.finish(top));
        assert!(!apply_once(&InlineReferenceVariables, &mut h).expect("apply"));
    }
}
