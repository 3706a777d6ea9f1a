//! The rule abstraction: a pure function from a matched position to an edit
//! descriptor. Rules never mutate the graph; the driver applies the returned
//! `Rewrite` atomically.

use std::collections::BTreeSet;

use xqopt_core::context::{NavigationStep, OptimizationContext};
use xqopt_core::error::Result;
use xqopt_core::expr::Expr;
use xqopt_core::functions::FunctionCatalog;
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{DataSourceId, NodeId, SlotId, VarId};
use xqopt_core::props::{Cardinality, VariableProperties};
use xqopt_core::types::{SequenceType, TypeSystem};

/// How the driver schedules a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Memoized per (rule, node).
    PerNode,
    /// Consumes whole-graph facts (liveness, reference counts). Runs at most once per
    /// attempt, guarded by a one-shot flag reset after any mutation.
    WholeGraph,
}

/// A child of a node being built: an existing live node or a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Existing(NodeId),
    New(Box<NodeSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub op: Operator,
    pub inputs: Vec<Target>,
    pub nested: Vec<Target>,
}

impl NodeSpec {
    pub fn new(op: Operator, inputs: Vec<Target>) -> Self {
        Self {
            op,
            inputs,
            nested: Vec::new(),
        }
    }

    /// Copy `node`'s operator shape with a different operator, keeping children.
    pub fn like(graph: &OperatorGraph, node: NodeId, op: Operator) -> Self {
        let n = graph.node(node);
        Self {
            op,
            inputs: n
                .inputs
                .iter()
                .map(|s| Target::Existing(graph.target(*s)))
                .collect(),
            nested: n
                .nested
                .iter()
                .map(|s| Target::Existing(graph.target(*s)))
                .collect(),
        }
    }

    pub fn boxed(self) -> Target {
        Target::New(Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Build `with` and install it in `slot`.
    Replace { slot: SlotId, with: NodeSpec },
    /// Point `slot` at an existing node.
    Redirect { slot: SlotId, to: NodeId },
    AppendSteps {
        source: DataSourceId,
        steps: Vec<NavigationStep>,
    },
    /// Register `collection` as a new data source, then install in `slot` a
    /// scan of it binding `variable` over `input`.
    ScanCollection {
        slot: SlotId,
        collection: String,
        variable: VarId,
        input: Target,
    },
}

impl EditOp {
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            EditOp::Replace { slot, .. }
            | EditOp::Redirect { slot, .. }
            | EditOp::ScanCollection { slot, .. } => Some(*slot),
            EditOp::AppendSteps { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rewrite {
    pub edits: Vec<EditOp>,
}

impl Rewrite {
    pub fn replace(slot: SlotId, with: NodeSpec) -> Self {
        Self {
            edits: vec![EditOp::Replace { slot, with }],
        }
    }

    pub fn then(mut self, edit: EditOp) -> Self {
        self.edits.push(edit);
        self
    }
}

/// What a rule may consult while matching.
pub struct RewriteContext<'a> {
    pub ctx: &'a mut OptimizationContext,
    pub catalog: &'a dyn FunctionCatalog,
    pub types: &'a dyn TypeSystem,
}

impl<'a> RewriteContext<'a> {
    pub fn new(
        ctx: &'a mut OptimizationContext,
        catalog: &'a dyn FunctionCatalog,
        types: &'a dyn TypeSystem,
    ) -> Self {
        Self {
            ctx,
            catalog,
            types,
        }
    }

    pub fn new_var(&mut self) -> Result<VarId> {
        self.ctx.new_var()
    }

    pub fn used_above(&mut self, graph: &OperatorGraph, node: NodeId) -> BTreeSet<VarId> {
        xqopt_analysis::used_above(graph, self.ctx, node)
    }

    pub fn is_live_above(&mut self, graph: &OperatorGraph, node: NodeId, var: VarId) -> bool {
        xqopt_analysis::is_live_above(graph, self.ctx, node, var)
    }

    pub fn cardinality(&mut self, graph: &OperatorGraph, node: NodeId) -> Cardinality {
        xqopt_analysis::cardinality(graph, self.ctx, node)
    }

    pub fn properties(
        &mut self,
        graph: &OperatorGraph,
        node: NodeId,
    ) -> Result<VariableProperties> {
        xqopt_analysis::properties(graph, self.ctx, self.catalog, node)
    }

    pub fn schema(&mut self, graph: &OperatorGraph, node: NodeId) -> Vec<VarId> {
        xqopt_analysis::schema(graph, self.ctx, node)
    }

    pub fn producer(&mut self, graph: &OperatorGraph, var: VarId) -> Option<NodeId> {
        xqopt_analysis::producer(graph, self.ctx, var)
    }

    pub fn static_type(
        &mut self,
        graph: &OperatorGraph,
        expr: &Expr,
    ) -> Result<Option<SequenceType>> {
        xqopt_analysis::static_type(graph, self.ctx, self.catalog, self.types, expr)
    }
}

pub trait Rule: Send + Sync {
    /// Stable identifier; also the don't-apply memo key.
    fn name(&self) -> &'static str;

    fn scope(&self) -> RuleScope {
        RuleScope::PerNode
    }

    /// Called before the node's children are visited.
    fn rewrite_pre(
        &self,
        _slot: SlotId,
        _graph: &OperatorGraph,
        _cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        Ok(None)
    }

    /// Called after the node's children are visited.
    fn rewrite_post(
        &self,
        _slot: SlotId,
        _graph: &OperatorGraph,
        _cx: &mut RewriteContext<'_>,
    ) -> Result<Option<Rewrite>> {
        Ok(None)
    }
}
