//! `Unnest($v2: iterate($v1)) <- Assign($v1: collection("name"))` becomes a
//! `DataSourceScan` binding `$v2` directly.

use xqopt_core::error::Result;
use xqopt_core::expr::{Expr, FunctionId};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::SlotId;

use crate::rule::{EditOp, Rewrite, RewriteContext, Rule, RuleScope, Target};
use crate::toolbox::{constant_string, single_input};

pub struct IntroduceCollection;

/// Collection name behind `arg`: a string constant, possibly wrapped in
/// `promote`/`fn:data`, or a variable bound to one by an Assign.
fn collection_name(
    graph: &OperatorGraph,
    arg: &Expr,
    cx: &mut RewriteContext<'_>,
) -> Result<Option<String>> {
    match arg {
        Expr::Constant(_) => constant_string(cx.types, arg),
        Expr::Call(call) if matches!(call.function, FunctionId::Promote | FunctionId::Data) => {
            match call.args.first() {
                Some(inner) => collection_name(graph, inner, cx),
                None => Ok(None),
            }
        }
        Expr::Var(v) => {
            let Some(producer) = cx.producer(graph, *v) else {
                return Ok(None);
            };
            match graph.op(producer) {
                Operator::Assign { variables, exprs } => {
                    match variables.iter().position(|x| x == v).and_then(|i| exprs.get(i)) {
                        Some(e) => collection_name(graph, e, cx),
                        None => Ok(None),
                    }
                }
                _ => Ok(None),
            }
        }
        Expr::Call(_) => Ok(None),
    }
}

impl Rule for IntroduceCollection {
    fn name(&self) -> &'static str {
        "introduce-collection"
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
            positional: None,
            expr,
        } = graph.op(node)
        else {
            return Ok(None);
        };
        let Some(source_var) = expr
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
        if variables.as_slice() != [source_var] {
            return Ok(None);
        }
        let Some(arg) = exprs
            .first()
            .and_then(|e| e.as_call_to(FunctionId::Collection))
            .and_then(|c| c.args.first())
        else {
            return Ok(None);
        };
        // The sequence variable disappears; nothing else may read it.
        if graph.count_references(source_var) != 1 {
            return Ok(None);
        }
        let Some(name) = collection_name(graph, arg, cx)? else {
            return Ok(None);
        };

        let Some(below) = graph.input(assign, 0) else {
            return Ok(None);
        };
        tracing::trace!(node = %node, collection = %name, "introducing data-source scan");
        Ok(Some(Rewrite {
            edits: vec![EditOp::ScanCollection {
                slot,
                collection: name,
                variable: *variable,
                input: Target::Existing(below),
            }],
        }))
    }
}
