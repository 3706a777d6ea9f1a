//! Rules that tighten the area around data-source scans: folding navigation
//! steps into the scan, dropping `iterate` over single items, and merging
//! pass-through Assigns into the operator that binds their operand.

use xqopt_core::context::NavigationStep;
use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{SlotId, VarId};

use crate::rule::{EditOp, NodeSpec, Rewrite, RewriteContext, Rule, RuleScope};
use crate::toolbox::single_input;

/// Scan/step fusion. An Unnest of a path step (or an Assign of a key access)
/// directly over a scan whose variable is dead above folds into the scan's
/// step list; the Unnest becomes `Assign($out: $scanned)` so consumers of
/// `$out` stay valid.
pub struct PushNavigationIntoScan;

/// Steps of a navigation chain that bottoms out at `base`, innermost first.
fn navigation_steps(
    expr: &Expr,
    base: VarId,
    allowed: &[FunctionId],
) -> Option<Vec<NavigationStep>> {
    match expr {
        Expr::Var(v) if *v == base => Some(Vec::new()),
        Expr::Call(call) if allowed.contains(&call.function) => {
            let (context, rest) = call.args.split_first()?;
            let args = rest
                .iter()
                .map(|a| a.as_constant().cloned())
                .collect::<Option<Vec<_>>>()?;
            let mut steps = navigation_steps(context, base, allowed)?;
            steps.push(NavigationStep {
                function: call.function,
                args,
            });
            Some(steps)
        }
        _ => None,
    }
}

const UNNEST_STEPS: &[FunctionId] = &[
    FunctionId::Child,
    FunctionId::Descendant,
    FunctionId::DescendantOrSelf,
    FunctionId::Attribute,
    FunctionId::KeysOrMembers,
];

// Single-valued per item, so row count is preserved.
const ASSIGN_STEPS: &[FunctionId] = &[FunctionId::Value];

impl Rule for PushNavigationIntoScan {
    fn name(&self) -> &'static str {
        "push-navigation-into-scan"
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
        let (out_var, expr, allowed) = match graph.op(node) {
            Operator::Unnest {
                variable,
                positional: None,
                expr,
            } => {
                // iterate() over a step is the same unnesting.
                let expr = match expr.as_call_to(FunctionId::Iterate) {
                    Some(c) if c.args.len() == 1 => &c.args[0],
                    _ => expr,
                };
                (*variable, expr, UNNEST_STEPS)
            }
            Operator::Assign { variables, exprs } => match (variables.as_slice(), exprs.as_slice()) {
                ([v], [e]) => (*v, e, ASSIGN_STEPS),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        let Some((_, scan)) = single_input(graph, node) else {
            return Ok(None);
        };
        let Operator::DataSourceScan { source, variables } = graph.op(scan) else {
            return Ok(None);
        };
        let [scanned] = variables.as_slice() else {
            return Ok(None);
        };
        let Some(steps) = navigation_steps(expr, *scanned, allowed) else {
            return Ok(None);
        };
        if steps.is_empty() || cx.is_live_above(graph, node, *scanned) {
            return Ok(None);
        }

        tracing::trace!(node = %node, source = %source, steps = steps.len(), "folding navigation into scan");
        let new_scan = NodeSpec::like(graph, scan, graph.op(scan).clone());
        let noop = NodeSpec::new(
            Operator::assign(out_var, Expr::var(*scanned)),
            vec![new_scan.boxed()],
        );
        Ok(Some(Rewrite::replace(slot, noop).then(EditOp::AppendSteps {
            source: *source,
            steps,
        })))
    }
}

/// `Unnest($v2: iterate($v1))` where `$v1` is a single item bound by the
/// scan or Unnest right below becomes `Assign($v2: $v1)`.
pub struct RemoveUnusedUnnestIterate;

impl Rule for RemoveUnusedUnnestIterate {
    fn name(&self) -> &'static str {
        "remove-unused-unnest-iterate"
    }

    fn rewrite_pre(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        _cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let Operator::Unnest {
            variable,
            positional: None,
            expr,
        } = graph.op(node)
        else {
            return Ok(None);
        };
        let Some(operand) = expr
            .as_call_to(FunctionId::Iterate)
            .filter(|c| c.args.len() == 1)
            .and_then(|c| c.args[0].as_var())
        else {
            return Ok(None);
        };
        let Some((_, below)) = single_input(graph, node) else {
            return Ok(None);
        };
        let single_item = match graph.op(below) {
            Operator::DataSourceScan { variables, .. } => variables.as_slice() == [operand],
            Operator::Unnest {
                variable: bound, ..
            } => *bound == operand,
            _ => false,
        };
        if !single_item {
            return Ok(None);
        }
        let noop = NodeSpec::like(graph, node, Operator::assign(*variable, Expr::var(operand)));
        Ok(Some(Rewrite::replace(slot, noop)))
    }
}

/// `Assign($x: $y)` directly over the scan or Unnest binding `$y`, with `$y`
/// dead above the Assign, renames the producer to bind `$x`.
pub struct InlineNoOpAssign;

impl Rule for InlineNoOpAssign {
    fn name(&self) -> &'static str {
        "inline-noop-assign"
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
        let Operator::Assign { variables, exprs } = graph.op(node) else {
            return Ok(None);
        };
        let ([target], [Expr::Var(operand)]) = (variables.as_slice(), exprs.as_slice()) else {
            return Ok(None);
        };
        let Some((_, below)) = single_input(graph, node) else {
            return Ok(None);
        };
        let renamed = match graph.op(below) {
            Operator::DataSourceScan { source, variables } if variables.as_slice() == [*operand] => {
                Operator::scan(*source, *target)
            }
            Operator::Unnest {
                variable,
                positional,
                expr,
            } if variable == operand => Operator::Unnest {
                variable: *target,
                positional: *positional,
                expr: expr.clone(),
            },
            _ => return Ok(None),
        };
        if cx.is_live_above(graph, node, *operand) {
            return Ok(None);
        }
        Ok(Some(Rewrite::replace(
            slot,
            NodeSpec::like(graph, below, renamed),
        )))
    }
}
