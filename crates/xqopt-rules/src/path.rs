//! Path-step shapes that collapse into a single unnesting step.

use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionCall, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::SlotId;
use xqopt_core::types::{ItemType, TypeSystem};

use crate::rule::{NodeSpec, Rewrite, RewriteContext, Rule, RuleScope};
use crate::toolbox::{rewrite_node_calls, single_input, type_argument};

/// `Unnest($v2: iterate($v1)) <- Assign($v1: child($v0, T))` becomes
/// `Unnest($v2: child($v0, T))` when `$v1` is dead above the Unnest.
pub struct ConvertAssignToUnnest;

impl Rule for ConvertAssignToUnnest {
    fn name(&self) -> &'static str {
        "convert-assign-to-unnest"
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
            variable,
            positional,
            expr,
        } = graph.op(node)
        else {
            return Ok(None);
        };
        let Some(sequence) = expr
            .as_call_to(FunctionId::Iterate)
            .and_then(|c| c.args.first())
            .and_then(|a| a.as_var())
        else {
            return Ok(None);
        };
        let Some((_, assign)) = single_input(graph, node) else {
            return Ok(None);
        };
        let Operator::Assign { variables, exprs } = graph.op(assign) else {
            return Ok(None);
        };
        let ([bound], [step]) = (variables.as_slice(), exprs.as_slice()) else {
            return Ok(None);
        };
        if *bound != sequence || step.as_call_to(FunctionId::Child).is_none() {
            return Ok(None);
        }
        if cx.is_live_above(graph, node, sequence) {
            return Ok(None);
        }
        let unnest = Operator::Unnest {
            variable: *variable,
            positional: *positional,
            expr: step.clone(),
        };
        Ok(Some(Rewrite::replace(
            slot,
            NodeSpec::like(graph, assign, unnest),
        )))
    }
}

/// `descendant-or-self::node()/child::T` is `descendant::T`.
///
/// Matches the two-operator form
/// `Unnest($v2: child($v1, T)) <- Unnest($v1: descendant-or-self($v0, node()))`
/// with `$v1` dead above, and the same steps nested in one expression.
pub struct ConsolidateDescendantChild;

fn is_any_node_step(types: &dyn TypeSystem, call: &FunctionCall) -> Result<bool> {
    Ok(call.function == FunctionId::DescendantOrSelf
        && matches!(type_argument(types, call)?, Some(t) if t.item == ItemType::AnyNode))
}

/// `child(descendant-or-self(e, node()), T)` -> `descendant(e, T)`.
fn fold_nested(call: &FunctionCall, types: &dyn TypeSystem) -> Result<Option<Expr>> {
    if call.function != FunctionId::Child {
        return Ok(None);
    }
    let [Expr::Call(inner), test] = call.args.as_slice() else {
        return Ok(None);
    };
    if !is_any_node_step(types, inner)? {
        return Ok(None);
    }
    let Some(origin) = inner.args.first() else {
        return Ok(None);
    };
    Ok(Some(Expr::call(
        FunctionId::Descendant,
        vec![origin.clone(), test.clone()],
    )))
}

impl ConsolidateDescendantChild {
    fn fold_unnests(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
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
        let Some(child) = expr.as_call_to(FunctionId::Child) else {
            return Ok(None);
        };
        let [Expr::Var(step), test] = child.args.as_slice() else {
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
        if inner_var != step {
            return Ok(None);
        }
        let Some(walk) = inner_expr.as_call() else {
            return Ok(None);
        };
        let Some(origin) = walk.args.first() else {
            return Ok(None);
        };
        if !is_any_node_step(cx.types, walk)? || cx.is_live_above(graph, node, *step) {
            return Ok(None);
        }
        let fused = Operator::unnest(
            *variable,
            Expr::call(FunctionId::Descendant, vec![origin.clone(), test.clone()]),
        );
        Ok(Some(Rewrite::replace(
            slot,
            NodeSpec::like(graph, inner, fused),
        )))
    }
}

impl Rule for ConsolidateDescendantChild {
    fn name(&self) -> &'static str {
        "consolidate-descendant-child"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::WholeGraph
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        if let Some(rw) = self.fold_unnests(slot, graph, cx)? {
            return Ok(Some(rw));
        }
        let node = graph.target(slot);
        let spec = rewrite_node_calls(graph, node, cx, &mut |call, cx| fold_nested(call, cx.types))?;
        Ok(spec.map(|s| Rewrite::replace(slot, s)))
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

    fn elem() -> Expr {
        Expr::type_arg(SequenceType::one(ItemType::Element))
    }

    fn any_node() -> Expr {
        Expr::type_arg(SequenceType::one(ItemType::AnyNode))
    }

    fn step(function: FunctionId, of: Expr, test: Expr) -> Expr {
        Expr::call(function, vec![of, test])
    }

    /// distribute(outputs) <- unnest($3: child($2, element()))
    ///   <- unnest($2: descendant-or-self($1, test)) <- assign($1: doc("a.xml"))
    fn descendant_fixture(test: Expr, outputs: &[u64]) -> Harness {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let doc = b.add(
            Operator::assign(v(1), Expr::call(FunctionId::Doc, vec![Expr::string("a.xml")])),
            &[ets],
        );
        let all = b.add(
            Operator::unnest(v(2), step(FunctionId::DescendantOrSelf, Expr::var(v(1)), test)),
            &[doc],
        );
        let children = b.add(
            Operator::unnest(v(3), step(FunctionId::Child, Expr::var(v(2)), elem())),
            &[all],
        );
        let top = b.add(
            Operator::DistributeResult {
                exprs: outputs.iter().map(|i| Expr::var(v(*i))).collect(),
            },
            &[children],
        );
        Harness::new(b.finish(top))
    }

    #[test]
    fn descendant_or_self_then_child_becomes_descendant() {
        let mut h = descendant_fixture(any_node(), &[3]);
        assert!(apply_once(&ConsolidateDescendantChild, &mut h).expect("apply"));

        let unnest = h.graph.input(h.graph.root_node(), 0).expect("unnest");
        assert_eq!(
            h.graph.op(unnest),
            &Operator::unnest(v(3), step(FunctionId::Descendant, Expr::var(v(1)), elem()))
        );
        let doc = h.graph.input(unnest, 0).expect("doc");
        assert!(matches!(h.graph.op(doc), Operator::Assign { variables, .. } if variables == &vec![v(1)]));
    }

    #[test]
    fn narrower_self_test_is_not_folded() {
        // descendant-or-self::element()/child::element() skips the document's own children.
        let mut h = descendant_fixture(elem(), &[3]);
        assert!(!apply_once(&ConsolidateDescendantChild, &mut h).expect("apply"));
    }

    #[test]
    fn intermediate_variable_read_above_blocks_the_fold() {
        let mut h = descendant_fixture(any_node(), &[2, 3]);
        assert!(!apply_once(&ConsolidateDescendantChild, &mut h).expect("apply"));
    }

    #[test]
    fn nested_steps_fold_inside_an_expression() {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let doc = b.add(
            Operator::assign(v(1), Expr::call(FunctionId::Doc, vec![Expr::string("a.xml")])),
            &[ets],
        );
        let path = step(
            FunctionId::Child,
            step(FunctionId::DescendantOrSelf, Expr::var(v(1)), any_node()),
            elem(),
        );
        let count = b.add(
            Operator::assign(v(2), Expr::call(FunctionId::Count, vec![path])),
            &[doc],
        );
        let mut h = Harness::new(b.finish(count));
        assert_eq!(apply_to_fixed_point(&ConsolidateDescendantChild, &mut h).expect("apply"), 1);

        let expected = Expr::call(
            FunctionId::Count,
            vec![step(FunctionId::Descendant, Expr::var(v(1)), elem())],
        );
        assert_eq!(h.graph.op(h.graph.root_node()), &Operator::assign(v(2), expected));
    }

    /// distribute(outputs) <- unnest($3: iterate($2)) <- assign($2: child($1, element()))
    ///   <- assign($1: doc("a.xml"))
    fn assign_fixture(outputs: &[u64]) -> Harness {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let doc = b.add(
            Operator::assign(v(1), Expr::call(FunctionId::Doc, vec![Expr::string("a.xml")])),
            &[ets],
        );
        let children = b.add(
            Operator::assign(v(2), step(FunctionId::Child, Expr::var(v(1)), elem())),
            &[doc],
        );
        let unnest = b.add(
            Operator::unnest(v(3), Expr::call(FunctionId::Iterate, vec![Expr::var(v(2))])),
            &[children],
        );
        let top = b.add(
            Operator::DistributeResult {
                exprs: outputs.iter().map(|i| Expr::var(v(*i))).collect(),
            },
            &[unnest],
        );
        Harness::new(b.finish(top))
    }

    #[test]
    fn iterate_over_assigned_child_step_unnests_it() {
        let mut h = assign_fixture(&[3]);
        assert!(apply_once(&ConvertAssignToUnnest, &mut h).expect("apply"));

        let unnest = h.graph.input(h.graph.root_node(), 0).expect("unnest");
        assert_eq!(
            h.graph.op(unnest),
            &Operator::unnest(v(3), step(FunctionId::Child, Expr::var(v(1)), elem()))
        );
        assert_eq!(h.graph.count_references(v(2)), 0);
    }

    #[test]
    fn assigned_sequence_read_above_is_kept() {
        let mut h = assign_fixture(&[2, 3]);
        assert!(!apply_once(&ConvertAssignToUnnest, &mut h).expect("apply"));
    }
}
