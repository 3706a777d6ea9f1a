//! Aggregate rewrites: folding an aggregate function into the nested
//! `Aggregate` that collects its argument, then marking decomposable
//! aggregates with their local/global steps.

use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionCall, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{SlotId, VarId};

use crate::rule::{NodeSpec, Rewrite, RewriteContext, Rule, RuleScope};
use crate::toolbox::{single_input, single_nested};

/// `Assign($v: agg(w($s))) <- Subplan{Aggregate($s: sequence(e)) <- ..}`
/// becomes `Assign($v: $s) <- Subplan{Aggregate($s: agg(w(e))) <- ..}`,
/// where `w` is the argument wrapper the aggregate accepts: `treat` for
/// `count`, `promote(data(..))` for the others, or nothing.
pub struct ConsolidateAggregate;

/// The collected variable under an aggregate's argument, and the argument
/// itself. The wrapper travels with the argument into the nested plan.
fn aggregated_operand(call: &FunctionCall) -> Option<(VarId, &Expr)> {
    let [arg] = call.args.as_slice() else {
        return None;
    };
    let var = match arg {
        Expr::Var(s) => *s,
        Expr::Call(treat) if treat.function == FunctionId::Treat => {
            if call.function != FunctionId::Count {
                return None;
            }
            treat.args.first()?.as_var()?
        }
        Expr::Call(promote) if promote.function == FunctionId::Promote => {
            if call.function == FunctionId::Count {
                return None;
            }
            let data = promote.args.first()?.as_call_to(FunctionId::Data)?;
            match data.args.as_slice() {
                [Expr::Var(s)] => *s,
                _ => return None,
            }
        }
        _ => return None,
    };
    Some((var, arg))
}

impl Rule for ConsolidateAggregate {
    fn name(&self) -> &'static str {
        "consolidate-aggregate"
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
        let Operator::Assign { variables, exprs } = graph.op(node) else {
            return Ok(None);
        };
        let ([v], [Expr::Call(agg)]) = (variables.as_slice(), exprs.as_slice()) else {
            return Ok(None);
        };
        if cx.catalog.info(agg.function)?.aggregate.is_none() {
            return Ok(None);
        }
        let Some((s, operand)) = aggregated_operand(agg) else {
            return Ok(None);
        };
        let Some((_, subplan)) = single_input(graph, node) else {
            return Ok(None);
        };
        let Some((_, aggregate)) = single_nested(graph, subplan) else {
            return Ok(None);
        };
        let Operator::Aggregate {
            variables: collected,
            exprs: collecting,
        } = graph.op(aggregate)
        else {
            return Ok(None);
        };
        let ([collected], [Expr::Call(seq)]) = (collected.as_slice(), collecting.as_slice()) else {
            return Ok(None);
        };
        if *collected != s || seq.function != FunctionId::Sequence || seq.args.len() != 1 {
            return Ok(None);
        }
        if graph.count_references(s) != 1 {
            return Ok(None);
        }

        let folded = Operator::aggregate(
            s,
            Expr::call(agg.function, vec![operand.substitute(s, &seq.args[0])]),
        );
        let mut subplan_spec = NodeSpec::like(graph, subplan, Operator::Subplan);
        subplan_spec.nested = vec![NodeSpec::like(graph, aggregate, folded).boxed()];
        let assign = NodeSpec::new(
            Operator::assign(*v, Expr::var(s)),
            vec![subplan_spec.boxed()],
        );
        tracing::trace!(node = %node, aggregate = %agg.function, "folding aggregate into subplan");
        Ok(Some(Rewrite::replace(slot, assign)))
    }
}

/// Annotates aggregate calls of `Aggregate` operators with their
/// (local, global) decomposition.
pub struct IntroduceTwoStepAggregate;

impl Rule for IntroduceTwoStepAggregate {
    fn name(&self) -> &'static str {
        "introduce-two-step-aggregate"
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let Operator::Aggregate { variables, exprs } = graph.op(node) else {
            return Ok(None);
        };
        let mut changed = false;
        let mut annotated = Vec::with_capacity(exprs.len());
        for e in exprs {
            match e {
                Expr::Call(call) if call.two_step.is_none() => {
                    match cx.catalog.info(call.function)?.aggregate {
                        Some(steps) => {
                            changed = true;
                            annotated.push(Expr::Call(FunctionCall {
                                two_step: Some((steps.local, steps.global)),
                                ..call.clone()
                            }));
                        }
                        None => annotated.push(e.clone()),
                    }
                }
                _ => annotated.push(e.clone()),
            }
        }
        if !changed {
            return Ok(None);
        }
        let op = Operator::Aggregate {
            variables: variables.clone(),
            exprs: annotated,
        };
        Ok(Some(Rewrite::replace(slot, NodeSpec::like(graph, node, op))))
    }
}
