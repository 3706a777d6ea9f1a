//! Conversion between XQuery boolean/comparison functions and the two-valued
//! algebricks operators the physical layer evaluates.
//!
//! Every algebricks call produced here carries the XQuery function it
//! replaced as its annotation, so the reverse conversion restores the exact
//! original call.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionCall, FunctionId};
use xqopt_core::graph::OperatorGraph;
use xqopt_core::id::SlotId;

use crate::rule::{Rewrite, RewriteContext, Rule};
use crate::toolbox::rewrite_node_calls;

/// algebricks operator -> (form wrapped in `fn:boolean`, direct form).
static FROM_ALGEBRICKS: Lazy<HashMap<FunctionId, (Option<FunctionId>, Option<FunctionId>)>> =
    Lazy::new(|| {
        use FunctionId as F;
        HashMap::from([
            (F::AlgAnd, (Some(F::And), None)),
            (F::AlgOr, (Some(F::Or), None)),
            (F::AlgEq, (Some(F::ValueEq), Some(F::GeneralEq))),
            (F::AlgNeq, (Some(F::ValueNe), Some(F::GeneralNe))),
            (F::AlgLt, (Some(F::ValueLt), Some(F::GeneralLt))),
            (F::AlgLe, (Some(F::ValueLe), Some(F::GeneralLe))),
            (F::AlgGt, (Some(F::ValueGt), Some(F::GeneralGt))),
            (F::AlgGe, (Some(F::ValueGe), Some(F::GeneralGe))),
            (F::AlgNot, (None, Some(F::Not))),
            (F::AlgIsNull, (None, Some(F::Empty))),
        ])
    });

/// XQuery function only convertible under `fn:boolean` -> algebricks operator.
static WRAPPED_TO_ALGEBRICKS: Lazy<HashMap<FunctionId, FunctionId>> = Lazy::new(|| {
    FROM_ALGEBRICKS
        .iter()
        .filter_map(|(alg, (wrapped, _))| wrapped.map(|w| (w, *alg)))
        .collect()
});

/// XQuery function convertible wherever it appears -> algebricks operator.
static DIRECT_TO_ALGEBRICKS: Lazy<HashMap<FunctionId, FunctionId>> = Lazy::new(|| {
    FROM_ALGEBRICKS
        .iter()
        .filter_map(|(alg, (_, direct))| direct.map(|d| (d, *alg)))
        .collect()
});

fn annotated(alg: FunctionId, original: &FunctionCall) -> Expr {
    Expr::Call(FunctionCall {
        function: alg,
        args: original.args.clone(),
        annotation: Some(original.function),
        two_step: None,
    })
}

fn to_algebricks(call: &FunctionCall) -> Option<Expr> {
    if call.function == FunctionId::Boolean {
        if let [Expr::Call(inner)] = call.args.as_slice() {
            if let Some(alg) = WRAPPED_TO_ALGEBRICKS.get(&inner.function) {
                return Some(annotated(*alg, inner));
            }
        }
        return None;
    }
    DIRECT_TO_ALGEBRICKS
        .get(&call.function)
        .map(|alg| annotated(*alg, call))
}

fn from_algebricks(call: &FunctionCall) -> Option<Expr> {
    let original = call.annotation?;
    let (wrapped, direct) = FROM_ALGEBRICKS.get(&call.function)?;
    if *wrapped == Some(original) {
        Some(Expr::call(
            FunctionId::Boolean,
            vec![Expr::call(original, call.args.clone())],
        ))
    } else if *direct == Some(original) {
        Some(Expr::call(original, call.args.clone()))
    } else {
        None
    }
}

pub struct ConvertToAlgebricks;

impl Rule for ConvertToAlgebricks {
    fn name(&self) -> &'static str {
        "convert-to-algebricks"
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let spec = rewrite_node_calls(graph, node, cx, &mut |call, _| Ok(to_algebricks(call)))?;
        Ok(spec.map(|s| Rewrite::replace(slot, s)))
    }
}

pub struct ConvertFromAlgebricks;

impl Rule for ConvertFromAlgebricks {
    fn name(&self) -> &'static str {
        "convert-from-algebricks"
    }

    fn rewrite_post(
        &self,
        slot: SlotId,
        graph: &OperatorGraph,
        cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        let node = graph.target(slot);
        let spec = rewrite_node_calls(graph, node, cx, &mut |call, _| Ok(from_algebricks(call)))?;
        Ok(spec.map(|s| Rewrite::replace(slot, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{apply_to_fixed_point, Harness};
    use xqopt_core::prelude::*;

    fn v(n: u64) -> VarId {
        VarId::new(n)
    }

    fn select_over(condition: Expr) -> Harness {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let a = b.add(
            Operator::Assign {
                variables: vec![v(1), v(2)],
                exprs: vec![Expr::integer(1), Expr::integer(2)],
            },
            &[ets],
        );
        let s = b.add(Operator::Select { condition }, &[a]);
        Harness::new(b.finish(s))
    }

    fn condition(h: &Harness) -> Expr {
        let Operator::Select { condition } = h.graph.op(h.graph.root_node()) else {
            panic!("expected select");
        };
        condition.clone()
    }

    #[test]
    fn value_comparison_under_boolean_converts() {
        let cmp = Expr::call(FunctionId::ValueLt, vec![Expr::var(v(1)), Expr::var(v(2))]);
        let mut h = select_over(Expr::call(FunctionId::Boolean, vec![cmp.clone()]));
        assert_eq!(apply_to_fixed_point(&ConvertToAlgebricks, &mut h).expect("apply"), 1);
        let c = condition(&h);
        let call = c.as_call().expect("call");
        assert_eq!(call.function, FunctionId::AlgLt);
        assert_eq!(call.annotation, Some(FunctionId::ValueLt));

        assert_eq!(apply_to_fixed_point(&ConvertFromAlgebricks, &mut h).expect("apply"), 1);
        assert_eq!(condition(&h), Expr::call(FunctionId::Boolean, vec![cmp]));
    }

    #[test]
    fn bare_value_comparison_is_left_alone() {
        let cmp = Expr::call(FunctionId::ValueEq, vec![Expr::var(v(1)), Expr::var(v(2))]);
        let mut h = select_over(cmp);
        assert_eq!(apply_to_fixed_point(&ConvertToAlgebricks, &mut h).expect("apply"), 0);
    }

    #[test]
    fn unannotated_algebricks_call_is_kept() {
        let raw = Expr::call(FunctionId::AlgAnd, vec![Expr::var(v(1)), Expr::var(v(2))]);
        let mut h = select_over(raw.clone());
        assert_eq!(apply_to_fixed_point(&ConvertFromAlgebricks, &mut h).expect("apply"), 0);
        assert_eq!(condition(&h), raw);
    }

    #[test]
    fn tables_are_mutually_consistent() {
        for (alg, (wrapped, direct)) in FROM_ALGEBRICKS.iter() {
            assert!(alg.is_algebricks());
            if let Some(w) = wrapped {
                assert_eq!(WRAPPED_TO_ALGEBRICKS.get(w), Some(alg));
            }
            if let Some(d) = direct {
                assert_eq!(DIRECT_TO_ALGEBRICKS.get(d), Some(alg));
            }
        }
    }
}
