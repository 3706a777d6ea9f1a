//! YAML -> OperatorGraph parser for plan fixtures.
//!
//! Plans are written top-down; every operator names its input, Subplans also
//! list their nested plans. Variables are plain integers.
//!
//! Example:
//! ```yaml
//! plan:
//!   op: distribute-result
//!   exprs: [ { var: 2 } ]
//!   input:
//!     op: unnest
//!     variable: 2
//!     expr: { call: { function: iterate, args: [ { var: 1 } ] } }
//!     input:
//!       op: assign
//!       variables: [1]
//!       exprs:
//!         - call: { function: "fn:collection", args: [ { string: docs } ] }
//!       input: { op: empty-tuple-source }
//! ```

use serde::{Deserialize, Serialize};

use xqopt_core::context::OptimizationContext;
use xqopt_core::error::{Error, Result};
use xqopt_core::expr::{Expr, FunctionCall, FunctionId};
use xqopt_core::graph::{GraphBuilder, JoinKind, Operator, OperatorGraph, OrderKey};
use xqopt_core::id::{NodeId, VarId};
use xqopt_core::types::SequenceType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub plan: PlanNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "op")]
pub enum PlanNode {
    EmptyTupleSource,
    NestedTupleSource,
    DataSourceScan {
        collection: String,
        variables: Vec<u64>,
        input: Box<PlanNode>,
    },
    Unnest {
        variable: u64,
        #[serde(default)]
        positional: Option<u64>,
        expr: ExprNode,
        input: Box<PlanNode>,
    },
    Assign {
        variables: Vec<u64>,
        exprs: Vec<ExprNode>,
        input: Box<PlanNode>,
    },
    Aggregate {
        variables: Vec<u64>,
        exprs: Vec<ExprNode>,
        input: Box<PlanNode>,
    },
    Select {
        condition: ExprNode,
        input: Box<PlanNode>,
    },
    Subplan {
        nested: Vec<PlanNode>,
        input: Box<PlanNode>,
    },
    Join {
        #[serde(default)]
        left_outer: bool,
        condition: ExprNode,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    Order {
        keys: Vec<OrderKeyNode>,
        input: Box<PlanNode>,
    },
    Project {
        variables: Vec<u64>,
        input: Box<PlanNode>,
    },
    Limit {
        count: u64,
        input: Box<PlanNode>,
    },
    DistributeResult {
        exprs: Vec<ExprNode>,
        input: Box<PlanNode>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderKeyNode {
    pub expr: ExprNode,
    #[serde(default = "ascending")]
    pub ascending: bool,
}

fn ascending() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprNode {
    Var(u64),
    Call(CallNode),
    String(String),
    Integer(i64),
    Boolean(bool),
    /// Type argument of treat/cast/promote.
    Type(SequenceType),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNode {
    pub function: String,
    #[serde(default)]
    pub args: Vec<ExprNode>,
}

#[derive(Debug)]
pub struct ParsedPlan {
    pub graph: OperatorGraph,
    pub context: OptimizationContext,
}

/// Parse a YAML plan document. Collections named by `data-source-scan`
/// entries are registered in the returned context.
pub fn parse_yaml_plan(yaml_src: &str) -> Result<ParsedPlan> {
    let doc: PlanDocument =
        serde_yaml::from_str(yaml_src).map_err(|e| Error::Dsl(e.to_string()))?;
    let mut context = OptimizationContext::new();
    let mut builder = GraphBuilder::new();
    let root = build(&doc.plan, &mut builder, &mut context)?;
    let graph = builder.finish(root);
    context.observe_graph(&graph);
    Ok(ParsedPlan { graph, context })
}

fn vars(ids: &[u64]) -> Vec<VarId> {
    ids.iter().map(|v| VarId::new(*v)).collect()
}

fn exprs(nodes: &[ExprNode]) -> Result<Vec<Expr>> {
    nodes.iter().map(to_expr).collect()
}

fn to_expr(node: &ExprNode) -> Result<Expr> {
    Ok(match node {
        ExprNode::Var(v) => Expr::var(VarId::new(*v)),
        ExprNode::Call(call) => {
            let function = FunctionId::from_name(&call.function)
                .ok_or_else(|| Error::Dsl(format!("unknown function `{}`", call.function)))?;
            Expr::Call(FunctionCall::new(function, exprs(&call.args)?))
        }
        ExprNode::String(s) => Expr::string(s),
        ExprNode::Integer(i) => Expr::integer(*i),
        ExprNode::Boolean(b) => Expr::boolean(*b),
        ExprNode::Type(ty) => Expr::type_arg(*ty),
    })
}

fn same_length(what: &str, variables: &[u64], exprs: &[ExprNode]) -> Result<()> {
    if variables.len() != exprs.len() {
        return Err(Error::Dsl(format!(
            "{what}: {} variables but {} expressions",
            variables.len(),
            exprs.len()
        )));
    }
    Ok(())
}

fn build(
    node: &PlanNode,
    b: &mut GraphBuilder,
    ctx: &mut OptimizationContext,
) -> Result<NodeId> {
    use PlanNode as P;

    let id = match node {
        P::EmptyTupleSource => b.leaf(Operator::EmptyTupleSource),
        P::NestedTupleSource => b.leaf(Operator::NestedTupleSource),
        P::DataSourceScan {
            collection,
            variables,
            input,
        } => {
            let input = build(input, b, ctx)?;
            let source = ctx.register_collection(collection)?;
            b.add(
                Operator::DataSourceScan {
                    source,
                    variables: vars(variables),
                },
                &[input],
            )
        }
        P::Unnest {
            variable,
            positional,
            expr,
            input,
        } => {
            let input = build(input, b, ctx)?;
            b.add(
                Operator::Unnest {
                    variable: VarId::new(*variable),
                    positional: positional.map(VarId::new),
                    expr: to_expr(expr)?,
                },
                &[input],
            )
        }
        P::Assign {
            variables,
            exprs: e,
            input,
        } => {
            same_length("assign", variables, e)?;
            let input = build(input, b, ctx)?;
            b.add(
                Operator::Assign {
                    variables: vars(variables),
                    exprs: exprs(e)?,
                },
                &[input],
            )
        }
        P::Aggregate {
            variables,
            exprs: e,
            input,
        } => {
            same_length("aggregate", variables, e)?;
            let input = build(input, b, ctx)?;
            b.add(
                Operator::Aggregate {
                    variables: vars(variables),
                    exprs: exprs(e)?,
                },
                &[input],
            )
        }
        P::Select { condition, input } => {
            let input = build(input, b, ctx)?;
            b.add(
                Operator::Select {
                    condition: to_expr(condition)?,
                },
                &[input],
            )
        }
        P::Subplan { nested, input } => {
            if nested.is_empty() {
                return Err(Error::Dsl("subplan without nested plans".into()));
            }
            let input = build(input, b, ctx)?;
            let roots = nested
                .iter()
                .map(|n| build(n, b, ctx))
                .collect::<Result<Vec<_>>>()?;
            b.subplan(input, &roots)
        }
        P::Join {
            left_outer,
            condition,
            left,
            right,
        } => {
            let l = build(left, b, ctx)?;
            let r = build(right, b, ctx)?;
            let kind = if *left_outer {
                JoinKind::LeftOuter
            } else {
                JoinKind::Inner
            };
            b.add(
                Operator::Join {
                    kind,
                    condition: to_expr(condition)?,
                },
                &[l, r],
            )
        }
        P::Order { keys, input } => {
            let input = build(input, b, ctx)?;
            let keys = keys
                .iter()
                .map(|k| {
                    Ok(OrderKey {
                        expr: to_expr(&k.expr)?,
                        ascending: k.ascending,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            b.add(Operator::Order { keys }, &[input])
        }
        P::Project { variables, input } => {
            let input = build(input, b, ctx)?;
            b.add(
                Operator::Project {
                    variables: vars(variables),
                },
                &[input],
            )
        }
        P::Limit { count, input } => {
            let input = build(input, b, ctx)?;
            b.add(Operator::Limit { count: *count }, &[input])
        }
        P::DistributeResult { exprs: e, input } => {
            let input = build(input, b, ctx)?;
            b.add(Operator::DistributeResult { exprs: exprs(e)? }, &[input])
        }
    };
    Ok(id)
}
