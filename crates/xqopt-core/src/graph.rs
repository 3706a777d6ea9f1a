//! Operator DAG: an arena of nodes connected through swappable edge slots.
//!
//! Every edge is a cell (`SlotId`) holding the current child `NodeId`.
//! Rewriting a subtree means building the replacement completely and then
//! overwriting one cell. Nodes are never mutated after insertion, so a
//! `NodeId` names one immutable operator for the whole compilation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::id::{DataSourceId, NodeId, SlotId, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub expr: Expr,
    pub ascending: bool,
}

/// Closed set of logical operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    EmptyTupleSource,
    /// Leaf of a nested plan; yields the enclosing Subplan's current input tuple.
    NestedTupleSource,
    DataSourceScan {
        source: DataSourceId,
        variables: Vec<VarId>,
    },
    Unnest {
        variable: VarId,
        positional: Option<VarId>,
        expr: Expr,
    },
    Assign {
        variables: Vec<VarId>,
        exprs: Vec<Expr>,
    },
    Aggregate {
        variables: Vec<VarId>,
        exprs: Vec<Expr>,
    },
    Select {
        condition: Expr,
    },
    Subplan,
    Join {
        kind: JoinKind,
        condition: Expr,
    },
    Order {
        keys: Vec<OrderKey>,
    },
    Project {
        variables: Vec<VarId>,
    },
    Limit {
        count: u64,
    },
    DistributeResult {
        exprs: Vec<Expr>,
    },
}

impl Operator {
    pub fn assign(variable: VarId, expr: Expr) -> Self {
        Operator::Assign {
            variables: vec![variable],
            exprs: vec![expr],
        }
    }

    pub fn aggregate(variable: VarId, expr: Expr) -> Self {
        Operator::Aggregate {
            variables: vec![variable],
            exprs: vec![expr],
        }
    }

    pub fn unnest(variable: VarId, expr: Expr) -> Self {
        Operator::Unnest {
            variable,
            positional: None,
            expr,
        }
    }

    pub fn scan(source: DataSourceId, variable: VarId) -> Self {
        Operator::DataSourceScan {
            source,
            variables: vec![variable],
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Operator::EmptyTupleSource => "empty-tuple-source",
            Operator::NestedTupleSource => "nested-tuple-source",
            Operator::DataSourceScan { .. } => "data-source-scan",
            Operator::Unnest { .. } => "unnest",
            Operator::Assign { .. } => "assign",
            Operator::Aggregate { .. } => "aggregate",
            Operator::Select { .. } => "select",
            Operator::Subplan => "subplan",
            Operator::Join { .. } => "join",
            Operator::Order { .. } => "order",
            Operator::Project { .. } => "project",
            Operator::Limit { .. } => "limit",
            Operator::DistributeResult { .. } => "distribute-result",
        }
    }

    /// Variables this operator binds (not the ones it forwards).
    pub fn produced_variables(&self) -> Vec<VarId> {
        match self {
            Operator::DataSourceScan { variables, .. }
            | Operator::Assign { variables, .. }
            | Operator::Aggregate { variables, .. } => variables.clone(),
            Operator::Unnest {
                variable,
                positional,
                ..
            } => std::iter::once(*variable).chain(*positional).collect(),
            Operator::EmptyTupleSource
            | Operator::NestedTupleSource
            | Operator::Select { .. }
            | Operator::Subplan
            | Operator::Join { .. }
            | Operator::Order { .. }
            | Operator::Project { .. }
            | Operator::Limit { .. }
            | Operator::DistributeResult { .. } => Vec::new(),
        }
    }

    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Operator::Unnest { expr, .. } => vec![expr],
            Operator::Assign { exprs, .. }
            | Operator::Aggregate { exprs, .. }
            | Operator::DistributeResult { exprs } => exprs.iter().collect(),
            Operator::Select { condition } | Operator::Join { condition, .. } => vec![condition],
            Operator::Order { keys } => keys.iter().map(|k| &k.expr).collect(),
            Operator::EmptyTupleSource
            | Operator::NestedTupleSource
            | Operator::DataSourceScan { .. }
            | Operator::Subplan
            | Operator::Project { .. }
            | Operator::Limit { .. } => Vec::new(),
        }
    }

    /// Copy of the operator with every expression passed through `f`.
    pub fn map_expressions(&self, mut f: impl FnMut(&Expr) -> Expr) -> Operator {
        match self {
            Operator::Unnest {
                variable,
                positional,
                expr,
            } => Operator::Unnest {
                variable: *variable,
                positional: *positional,
                expr: f(expr),
            },
            Operator::Assign { variables, exprs } => Operator::Assign {
                variables: variables.clone(),
                exprs: exprs.iter().map(&mut f).collect(),
            },
            Operator::Aggregate { variables, exprs } => Operator::Aggregate {
                variables: variables.clone(),
                exprs: exprs.iter().map(&mut f).collect(),
            },
            Operator::DistributeResult { exprs } => Operator::DistributeResult {
                exprs: exprs.iter().map(&mut f).collect(),
            },
            Operator::Select { condition } => Operator::Select {
                condition: f(condition),
            },
            Operator::Join { kind, condition } => Operator::Join {
                kind: *kind,
                condition: f(condition),
            },
            Operator::Order { keys } => Operator::Order {
                keys: keys
                    .iter()
                    .map(|k| OrderKey {
                        expr: f(&k.expr),
                        ascending: k.ascending,
                    })
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// Variables referenced by this operator's own expressions and lists.
    pub fn used_variables(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        for e in self.expressions() {
            e.collect_variables(&mut out);
        }
        if let Operator::Project { variables } = self {
            out.extend(variables.iter().copied());
        }
        out
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(items: &[T]) -> String {
            items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            Operator::DataSourceScan { source, variables } => {
                write!(f, "data-source-scan {source} [{}]", list(variables))
            }
            Operator::Unnest {
                variable,
                positional,
                expr,
            } => match positional {
                Some(p) => write!(f, "unnest {variable} at {p} <- {expr}"),
                None => write!(f, "unnest {variable} <- {expr}"),
            },
            Operator::Assign { variables, exprs } | Operator::Aggregate { variables, exprs } => {
                let pairs: Vec<String> = variables
                    .iter()
                    .zip(exprs)
                    .map(|(v, e)| format!("{v} <- {e}"))
                    .collect();
                write!(f, "{} [{}]", self.tag(), pairs.join(", "))
            }
            Operator::Select { condition } => write!(f, "select {condition}"),
            Operator::Join { kind, condition } => write!(f, "join {kind:?} {condition}"),
            Operator::Order { keys } => {
                let ks: Vec<String> = keys.iter().map(|k| k.expr.to_string()).collect();
                write!(f, "order [{}]", ks.join(", "))
            }
            Operator::Project { variables } => write!(f, "project [{}]", list(variables)),
            Operator::Limit { count } => write!(f, "limit {count}"),
            Operator::DistributeResult { exprs } => {
                write!(f, "distribute-result [{}]", list(exprs))
            }
            other => f.write_str(other.tag()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorNode {
    pub op: Operator,
    pub inputs: Vec<SlotId>,
    /// Roots of nested plans; non-empty only for `Subplan`.
    pub nested: Vec<SlotId>,
}

/// Serializable tree rendering of the reachable plan. Used for fingerprints
/// and structural assertions; it carries no node identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTree {
    pub op: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PlanTree>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<PlanTree>,
}

impl PlanTree {
    pub fn leaf(op: Operator) -> Self {
        Self {
            op,
            inputs: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn over(op: Operator, input: PlanTree) -> Self {
        Self {
            op,
            inputs: vec![input],
            nested: Vec::new(),
        }
    }

    fn render(&self, depth: usize, out: &mut String) {
        use std::fmt::Write as _;
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), self.op);
        for n in &self.nested {
            let _ = writeln!(out, "{}{{", "  ".repeat(depth + 1));
            n.render(depth + 2, out);
            let _ = writeln!(out, "{}}}", "  ".repeat(depth + 1));
        }
        for i in &self.inputs {
            i.render(depth + 1, out);
        }
    }
}

impl fmt::Display for PlanTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.render(0, &mut s);
        f.write_str(&s)
    }
}

/// How a slot hangs off its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Input(usize),
    Nested(usize),
}

/// One visited position of a pre-order walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkEntry {
    pub slot: SlotId,
    pub node: NodeId,
    /// Owner of `slot`, `None` for the root slot.
    pub parent: Option<(NodeId, EdgeKind)>,
}

/// One position of a post-order walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopedNode {
    pub node: NodeId,
    /// Subplan whose nested plan encloses this position.
    pub scope: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
struct Arena {
    nodes: Vec<OperatorNode>,
    slots: Vec<NodeId>,
}

impl Arena {
    fn alloc_slot(&mut self, target: NodeId) -> SlotId {
        self.slots.push(target);
        SlotId::new(self.slots.len() as u64 - 1)
    }

    fn insert(&mut self, op: Operator, inputs: &[NodeId], nested: &[NodeId]) -> NodeId {
        let inputs = inputs.iter().map(|n| self.alloc_slot(*n)).collect();
        let nested = nested.iter().map(|n| self.alloc_slot(*n)).collect();
        self.nodes.push(OperatorNode { op, inputs, nested });
        NodeId::new(self.nodes.len() as u64 - 1)
    }
}

/// The mutable plan. Only the root slot and everything reachable from it is
/// live; replaced nodes stay in the arena but are unreachable.
#[derive(Debug, Clone)]
pub struct OperatorGraph {
    arena: Arena,
    root: SlotId,
}

impl OperatorGraph {
    pub fn root(&self) -> SlotId {
        self.root
    }

    pub fn root_node(&self) -> NodeId {
        self.target(self.root)
    }

    pub fn target(&self, slot: SlotId) -> NodeId {
        self.arena.slots[slot.get() as usize]
    }

    pub fn node(&self, id: NodeId) -> &OperatorNode {
        &self.arena.nodes[id.get() as usize]
    }

    pub fn op(&self, id: NodeId) -> &Operator {
        &self.node(id).op
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        (id.get() as usize) < self.arena.nodes.len()
    }

    pub fn contains_slot(&self, slot: SlotId) -> bool {
        (slot.get() as usize) < self.arena.slots.len()
    }

    /// Node behind the `idx`-th input of `id`.
    pub fn input(&self, id: NodeId, idx: usize) -> Option<NodeId> {
        self.node(id).inputs.get(idx).map(|s| self.target(*s))
    }

    pub fn input_slot(&self, id: NodeId, idx: usize) -> Option<SlotId> {
        self.node(id).inputs.get(idx).copied()
    }

    /// Node behind the `idx`-th nested root of a Subplan.
    pub fn nested_root(&self, id: NodeId, idx: usize) -> Option<NodeId> {
        self.node(id).nested.get(idx).map(|s| self.target(*s))
    }

    /// Insert a new node with fresh slots pointing at existing children.
    pub fn insert(&mut self, op: Operator, inputs: &[NodeId], nested: &[NodeId]) -> NodeId {
        self.arena.insert(op, inputs, nested)
    }

    /// Overwrite one edge cell. The replacement must already be fully built.
    pub fn set_target(&mut self, slot: SlotId, node: NodeId) -> Result<()> {
        if !self.contains_slot(slot) {
            return Err(Error::Plan(format!("unknown slot {slot}")));
        }
        if !self.contains_node(node) {
            return Err(Error::Plan(format!("unknown node {node}")));
        }
        self.arena.slots[slot.get() as usize] = node;
        Ok(())
    }

    /// Pre-order walk of the live plan, inputs before nested plans.
    pub fn walk(&self) -> Vec<WalkEntry> {
        let mut out = Vec::new();
        let mut stack = vec![WalkEntry {
            slot: self.root,
            node: self.root_node(),
            parent: None,
        }];
        while let Some(entry) = stack.pop() {
            out.push(entry);
            let n = self.node(entry.node);
            let children = n
                .inputs
                .iter()
                .enumerate()
                .map(|(i, s)| (*s, EdgeKind::Input(i)))
                .chain(
                    n.nested
                        .iter()
                        .enumerate()
                        .map(|(i, s)| (*s, EdgeKind::Nested(i))),
                );
            let mut pending: Vec<WalkEntry> = children
                .map(|(slot, kind)| WalkEntry {
                    slot,
                    node: self.target(slot),
                    parent: Some((entry.node, kind)),
                })
                .collect();
            pending.reverse();
            stack.extend(pending);
        }
        out
    }

    /// Distinct live nodes in pre-order.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        self.walk()
            .into_iter()
            .filter(|e| seen.insert(e.node))
            .map(|e| e.node)
            .collect()
    }

    /// Owners of each live node (several if the node is shared).
    pub fn parent_map(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut out: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for e in self.walk() {
            if let Some((p, _)) = e.parent {
                let ps = out.entry(e.node).or_default();
                if !ps.contains(&p) {
                    ps.push(p);
                }
            }
        }
        out
    }

    /// Live node that binds `var`. Variable ids are unique, so the search
    /// covers nested plans too.
    pub fn find_producer(&self, var: VarId) -> Option<NodeId> {
        self.live_nodes()
            .into_iter()
            .find(|n| self.op(*n).produced_variables().contains(&var))
    }

    pub fn count_references(&self, var: VarId) -> usize {
        self.live_nodes()
            .into_iter()
            .map(|n| {
                let op = self.op(n);
                let in_exprs: usize = op.expressions().iter().map(|e| e.count_references(var)).sum();
                let in_project = match op {
                    Operator::Project { variables } => {
                        variables.iter().filter(|v| **v == var).count()
                    }
                    _ => 0,
                };
                in_exprs + in_project
            })
            .sum()
    }

    /// Largest variable id bound or referenced in the live plan.
    pub fn max_variable(&self) -> Option<VarId> {
        self.live_nodes()
            .into_iter()
            .flat_map(|n| {
                let op = self.op(n);
                let mut vs = op.used_variables();
                vs.extend(op.produced_variables());
                vs
            })
            .max()
    }

    pub fn to_tree(&self) -> PlanTree {
        self.subtree(self.root_node())
    }

    pub fn subtree(&self, id: NodeId) -> PlanTree {
        let mut built: Vec<PlanTree> = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((node, expanded)) = stack.pop() {
            let n = self.node(node);
            if !expanded {
                stack.push((node, true));
                let children = n.inputs.iter().chain(&n.nested).rev();
                stack.extend(children.map(|s| (self.target(*s), false)));
                continue;
            }
            let nested = built.split_off(built.len() - n.nested.len());
            let inputs = built.split_off(built.len() - n.inputs.len());
            built.push(PlanTree {
                op: n.op.clone(),
                inputs,
                nested,
            });
        }
        built.pop().unwrap_or_else(|| PlanTree::leaf(self.op(id).clone()))
    }

    /// Post-order walk of the live plan: a node's inputs, then its nested
    /// plans, then the node itself. Shared nodes appear once per path.
    pub fn post_order(&self) -> Vec<ScopedNode> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root_node(), None, false)];
        while let Some((node, scope, expanded)) = stack.pop() {
            if expanded {
                out.push(ScopedNode { node, scope });
                continue;
            }
            stack.push((node, scope, true));
            let n = self.node(node);
            for s in n.nested.iter().rev() {
                stack.push((self.target(*s), Some(node), false));
            }
            for s in n.inputs.iter().rev() {
                stack.push((self.target(*s), scope, false));
            }
        }
        out
    }

    /// Stable fingerprint of the live plan: the pre-order walk with each
    /// position's edge kind and arity, so no node identities leak in.
    pub fn fingerprint(&self) -> Result<crate::hash::Hash256> {
        let shape: Vec<_> = self
            .walk()
            .into_iter()
            .map(|e| {
                let n = self.node(e.node);
                (e.parent.map(|(_, kind)| kind), n.inputs.len(), n.nested.len(), &n.op)
            })
            .collect();
        crate::hash::digest_of(&shape)
    }
}

/// Builds an `OperatorGraph` bottom-up; used by the translator and by tests.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    arena: Arena,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        self.arena.insert(op, inputs, &[])
    }

    pub fn leaf(&mut self, op: Operator) -> NodeId {
        self.add(op, &[])
    }

    pub fn subplan(&mut self, input: NodeId, nested_roots: &[NodeId]) -> NodeId {
        self.arena.insert(Operator::Subplan, &[input], nested_roots)
    }

    pub fn finish(mut self, root: NodeId) -> OperatorGraph {
        let root = self.arena.alloc_slot(root);
        OperatorGraph {
            arena: self.arena,
            root,
        }
    }
}
