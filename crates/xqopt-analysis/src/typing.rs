//! Producer lookup and static type inference for expressions in a plan.
//!
//! Unknown types are `Ok(None)`; a variable without a producer is an error.

use std::collections::HashMap;

use xqopt_core::error::{Error, Result};
use xqopt_core::expr::{Expr, FunctionId};
use xqopt_core::functions::FunctionCatalog;
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, VarId};
use xqopt_core::types::{ConstantValue, ItemType, Quantifier, SequenceType, TypeSystem};

/// Producer of every variable bound in the live plan.
pub fn producers(graph: &OperatorGraph) -> HashMap<VarId, NodeId> {
    let mut out = HashMap::new();
    for n in graph.live_nodes() {
        for v in graph.op(n).produced_variables() {
            out.entry(v).or_insert(n);
        }
    }
    out
}

pub struct TypeEnv<'a> {
    pub graph: &'a OperatorGraph,
    pub producers: &'a HashMap<VarId, NodeId>,
    pub catalog: &'a dyn FunctionCatalog,
    pub types: &'a dyn TypeSystem,
}

impl TypeEnv<'_> {
    pub fn static_type(&self, expr: &Expr) -> Result<Option<SequenceType>> {
        match expr {
            Expr::Constant(c) => Ok(Some(c.declared_type())),
            Expr::Var(v) => self.variable_type(*v),
            Expr::Call(call) => match call.function {
                FunctionId::Treat | FunctionId::Cast | FunctionId::Promote => {
                    match call.args.get(1).and_then(|a| a.as_constant()) {
                        Some(c) => self.type_argument(self.types.decode_constant(c)?).map(Some),
                        None => Ok(Some(self.catalog.info(call.function)?.return_type)),
                    }
                }
                FunctionId::Iterate => match call.args.first() {
                    Some(arg) => match self.static_type(arg)? {
                        Some(t) => Ok(Some(t)),
                        None => Ok(Some(self.catalog.info(call.function)?.return_type)),
                    },
                    None => Ok(Some(self.catalog.info(call.function)?.return_type)),
                },
                f => Ok(Some(self.catalog.info(f)?.return_type)),
            },
        }
    }

    fn type_argument(&self, value: ConstantValue) -> Result<SequenceType> {
        match value {
            ConstantValue::Integer(code) => self.types.lookup_sequence_type(code),
            other => Err(Error::MalformedConstant(format!(
                "type argument must be a type code, got {other:?}"
            ))),
        }
    }

    /// Copies (`Assign($a: $b)`) are followed in a loop, so long alias
    /// chains cost no stack.
    pub fn variable_type(&self, v: VarId) -> Result<Option<SequenceType>> {
        let mut v = v;
        for _ in 0..=self.producers.len() {
            let producer = self
                .producers
                .get(&v)
                .copied()
                .ok_or_else(|| Error::TypeInference(format!("{v} has no producer in the plan")))?;
            let expr = match self.graph.op(producer) {
                Operator::DataSourceScan { .. } => {
                    return Ok(Some(SequenceType::one(ItemType::AnyNode)))
                }
                Operator::Unnest {
                    positional, expr, ..
                } => {
                    if *positional == Some(v) {
                        return Ok(Some(SequenceType::one(ItemType::Integer)));
                    }
                    // One row per item.
                    return Ok(self
                        .static_type(expr)?
                        .map(|t| t.with_quantifier(Quantifier::One)));
                }
                Operator::Assign { variables, exprs } | Operator::Aggregate { variables, exprs } => {
                    match variables.iter().position(|x| *x == v).and_then(|i| exprs.get(i)) {
                        Some(e) => e,
                        None => return Ok(None),
                    }
                }
                Operator::EmptyTupleSource
                | Operator::NestedTupleSource
                | Operator::Select { .. }
                | Operator::Subplan
                | Operator::Join { .. }
                | Operator::Order { .. }
                | Operator::Project { .. }
                | Operator::Limit { .. }
                | Operator::DistributeResult { .. } => return Ok(None),
            };
            match expr {
                Expr::Var(next) => v = *next,
                other => return self.static_type(other),
            }
        }
        Err(Error::TypeInference(format!("{v} is defined through a cycle of copies")))
    }
}
