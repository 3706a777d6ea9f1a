//! Unnest-chain fusion.
//!
//! `Unnest($v2: f($v1)) <- Unnest($v1: g(..))` becomes `Unnest($v2: f(g(..)))`
//! when `g` can be evaluated as a scalar over a whole sequence and `$v1` is
//! not read anywhere above. Descendant axes are excluded: evaluated as a
//! scalar they can yield duplicates the unnesting form would not.

use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::SlotId;

use crate::rule::{NodeSpec, Rewrite, RewriteContext, Rule, RuleScope};
use crate::toolbox::single_input;

pub struct ConsolidateUnnests;

impl Rule for ConsolidateUnnests {
    fn name(&self) -> &'static str {
        "consolidate-unnests"
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
        let Operator::Unnest {
            variable: outer_var,
            positional: None,
            expr: outer_expr,
        } = graph.op(node)
        else {
            return Ok(None);
        };
        let Some((_, inner)) = single_input(graph, node) else {
            return Ok(None);
        };
        let Operator::Unnest {
            variable: inner_var,
            positional: None,
            expr: inner_expr,
        } = graph.op(inner)
        else {
            return Ok(None);
        };
        let Some(inner_call) = inner_expr.as_call() else {
            return Ok(None);
        };
        if matches!(
            inner_call.function,
            FunctionId::Descendant | FunctionId::DescendantOrSelf
        ) || !cx.catalog.info(inner_call.function)?.evaluation.has_scalar()
        {
            return Ok(None);
        }
        if outer_expr.as_call().is_none() || outer_expr.count_references(*inner_var) == 0 {
            return Ok(None);
        }
        if cx.is_live_above(graph, node, *inner_var) {
            return Ok(None);
        }

        let fused = Operator::Unnest {
            variable: *outer_var,
            positional: None,
            expr: outer_expr.substitute(*inner_var, &Expr::Call(inner_call.clone())),
        };
        Ok(Some(Rewrite::replace(
            slot,
            NodeSpec::like(graph, inner, fused),
        )))
    }
}
