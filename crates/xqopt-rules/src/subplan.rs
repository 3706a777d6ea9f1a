//! Subplan elimination.
//!
//! A Subplan evaluates its nested plan once per input row, with the nested
//! `NestedTupleSource` replaying that row. The rules here remove the Subplan
//! when that per-row evaluation is provably trivial, wiring the nested chain
//! straight onto the Subplan's input.

use std::collections::BTreeSet;

use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, SlotId, VarId};
use xqopt_core::props::Cardinality;
use xqopt_core::types::Quantifier;

use crate::rule::{EditOp, NodeSpec, Rewrite, RewriteContext, Rule, RuleScope, Target};
use crate::toolbox::{nested_leaf_slot, single_input, single_nested};

/// `Aggregate($a: sequence(e))` as (a, e).
fn sequence_aggregate(op: &Operator) -> Option<(VarId, &Expr)> {
    let Operator::Aggregate { variables, exprs } = op else {
        return None;
    };
    match (variables.as_slice(), exprs.as_slice()) {
        ([a], [agg]) => {
            let call = agg.as_call_to(FunctionId::Sequence)?;
            match call.args.as_slice() {
                [e] => Some((*a, e)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Scenario: `Subplan{Aggregate($v2: sequence($v1)) <- Unnest($v1: iterate($v0))
/// <- NTS}` where `$v0` is statically a single item collapses to
/// `Assign($v2: $v0)`.
pub struct EliminateSubplanForSingleItems;

impl Rule for EliminateSubplanForSingleItems {
    fn name(&self) -> &'static str {
        "eliminate-subplan-for-single-items"
    }

    fn rewrite_pre(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let Some((_, aggregate)) = single_nested(graph, node) else {
            return Ok(None);
        };
        let Some((collected, body)) = sequence_aggregate(graph.op(aggregate)) else {
            return Ok(None);
        };
        let Some(item) = body.as_var() else {
            return Ok(None);
        };
        let Some((_, unnest)) = single_input(graph, aggregate) else {
            return Ok(None);
        };
        let Operator::Unnest {
            variable,
            positional: None,
            expr,
        } = graph.op(unnest)
        else {
            return Ok(None);
        };
        if *variable != item {
            return Ok(None);
        }
        let Some(source) = expr
            .as_call_to(FunctionId::Iterate)
            .and_then(|c| c.args.first())
            .and_then(|a| a.as_var())
        else {
            return Ok(None);
        };
        match single_input(graph, unnest) {
            Some((_, leaf)) if matches!(graph.op(leaf), Operator::NestedTupleSource) => {}
            _ => return Ok(None),
        }
        let Some((_, input)) = single_input(graph, node) else {
            return Ok(None);
        };
        if !cx.schema(graph, input).contains(&source) {
            return Ok(None);
        }
        let Some(ty) = cx.static_type(graph, &Expr::var(source))? else {
            return Ok(None);
        };
        if ty.quantifier != Quantifier::One {
            return Ok(None);
        }

        let assign = NodeSpec::new(
            Operator::assign(collected, Expr::var(source)),
            vec![Target::Existing(input)],
        );
        Ok(Some(Rewrite::replace(slot, assign)))
    }
}

/// `Unnest($v: iterate($a)) <- Subplan{Aggregate($a: sequence(e)) <- chain <- NTS}`
/// flattens to `Unnest($v: iterate($t)) <- Assign($t: e) <- chain <- input`.
pub struct EliminateUnnestAggregateSubplan;

impl Rule for EliminateUnnestAggregateSubplan {
    fn name(&self) -> &'static str {
        "eliminate-unnest-aggregate-subplan"
    }

    // Reads whole-graph reference counts.
    fn scope(&self) -> RuleScope {
        RuleScope::WholeGraph
    }

    fn rewrite_pre(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let Operator::Unnest {
            variable,
            positional,
            expr,
        } = graph.op(node)
        else {
            return Ok(None);
        };
        let Some(collected) = expr
            .as_call_to(FunctionId::Iterate)
            .filter(|c| c.args.len() == 1)
            .and_then(|c| c.args[0].as_var())
        else {
            return Ok(None);
        };
        let Some((_, subplan)) = single_input(graph, node) else {
            return Ok(None);
        };
        let Some((_, aggregate)) = single_nested(graph, subplan) else {
            return Ok(None);
        };
        let Some((a, body)) = sequence_aggregate(graph.op(aggregate)) else {
            return Ok(None);
        };
        if a != collected || graph.count_references(a) != 1 {
            return Ok(None);
        }
        let Some((_, input)) = single_input(graph, subplan) else {
            return Ok(None);
        };
        let Some((_, below)) = single_input(graph, aggregate) else {
            return Ok(None);
        };
        // Splice point: either the aggregate sits on the NTS, or a linear
        // chain leads down to it.
        let (assign_input, rewire) = match graph.op(below) {
            Operator::NestedTupleSource => (input, None),
            _ => match nested_leaf_slot(graph, below) {
                Some(leaf) => (below, Some(leaf)),
                None => return Ok(None),
            },
        };

        let t = cx.new_var()?;
        let assign = NodeSpec::new(
            Operator::assign(t, body.clone()),
            vec![Target::Existing(assign_input)],
        );
        let unnest = NodeSpec::new(
            Operator::Unnest {
                variable: *variable,
                positional: *positional,
                expr: Expr::call(FunctionId::Iterate, vec![Expr::var(t)]),
            },
            vec![assign.boxed()],
        );
        let mut rewrite = Rewrite::default();
        if let Some(leaf) = rewire {
            rewrite = rewrite.then(EditOp::Redirect {
                slot: leaf,
                to: input,
            });
        }
        Ok(Some(rewrite.then(EditOp::Replace { slot, with: unnest })))
    }
}

/// A Subplan over a single-row input whose nested plan yields a single row
/// per input row is just that nested plan run once on the input.
pub struct EliminateSubplanInputCardinalityOne;

impl EliminateSubplanInputCardinalityOne {
    /// Variables the Subplan exposes that the nested root alone would drop.
    fn hidden(
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
        input: NodeId,
        root: NodeId,
    ) -> BTreeSet<VarId> {
        let kept: BTreeSet<VarId> = cx.schema(graph, root).into_iter().collect();
        cx.schema(graph, input)
            .into_iter()
            .filter(|v| !kept.contains(v))
            .collect()
    }
}

impl Rule for EliminateSubplanInputCardinalityOne {
    fn name(&self) -> &'static str {
        "eliminate-subplan-input-cardinality-one"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::WholeGraph
    }

    fn rewrite_pre(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let Some((_, root)) = single_nested(graph, node) else {
            return Ok(None);
        };
        let Some((_, input)) = single_input(graph, node) else {
            return Ok(None);
        };
        if cx.cardinality(graph, input) != Cardinality::One
            || cx.cardinality(graph, root) != Cardinality::One
        {
            return Ok(None);
        }
        let leaf = match graph.op(root) {
            Operator::NestedTupleSource => None,
            _ => match nested_leaf_slot(graph, root) {
                Some(leaf) => Some(leaf),
                None => return Ok(None),
            },
        };
        let hidden = Self::hidden(graph, cx, input, root);
        for v in &hidden {
            if cx.is_live_above(graph, node, *v) {
                return Ok(None);
            }
        }

        tracing::trace!(node = %node, hidden = hidden.len(), "inlining single-row subplan");
        let rewrite = match leaf {
            Some(leaf) => Rewrite {
                edits: vec![
                    EditOp::Redirect {
                        slot: leaf,
                        to: input,
                    },
                    EditOp::Redirect { slot, to: root },
                ],
            },
            None => Rewrite {
                edits: vec![EditOp::Redirect { slot, to: input }],
            },
        };
        Ok(Some(rewrite))
    }
}
