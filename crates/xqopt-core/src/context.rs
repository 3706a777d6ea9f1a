//! Per-compilation mutable state shared by the driver, rules, and analyses.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::expr::{Constant, FunctionId};
use crate::graph::{Operator, OperatorGraph};
use crate::id::{DataSourceId, NodeId, VarId};
use crate::props::{Cardinality, VariableProperties};

/// A navigation step folded into a data-source scan: the step function plus
/// its non-context arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationStep {
    pub function: FunctionId,
    pub args: Vec<Constant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DataSourceId,
    pub collection: String,
    pub steps: Vec<NavigationStep>,
}

/// Analysis results keyed by node identity. Every map is computed for the
/// whole live plan at once and dropped wholesale on any structural change.
#[derive(Debug, Clone, Default)]
pub struct AnalysisCache {
    pub used_above: Option<HashMap<NodeId, BTreeSet<VarId>>>,
    pub cardinality: Option<HashMap<NodeId, Cardinality>>,
    pub properties: Option<HashMap<NodeId, VariableProperties>>,
    pub schema: Option<HashMap<NodeId, Vec<VarId>>>,
    pub producers: Option<HashMap<VarId, NodeId>>,
}

#[derive(Debug)]
pub struct OptimizationContext {
    compilation_id: Uuid,
    next_var: u64,
    next_source: u64,
    dont_apply: HashSet<(&'static str, NodeId)>,
    one_shot: HashSet<&'static str>,
    sources: BTreeMap<DataSourceId, DataSource>,
    cache: AnalysisCache,
    frozen: bool,
}

impl Default for OptimizationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationContext {
    pub fn new() -> Self {
        Self {
            compilation_id: Uuid::new_v4(),
            next_var: 1,
            next_source: 1,
            dont_apply: HashSet::new(),
            one_shot: HashSet::new(),
            sources: BTreeMap::new(),
            cache: AnalysisCache::default(),
            frozen: false,
        }
    }

    pub fn compilation_id(&self) -> Uuid {
        self.compilation_id
    }

    /// Raise the counters above every id present in `graph`.
    pub fn observe_graph(&mut self, graph: &OperatorGraph) {
        if let Some(max) = graph.max_variable() {
            self.next_var = self.next_var.max(max.get() + 1);
        }
        for n in graph.live_nodes() {
            if let Operator::DataSourceScan { source, .. } = graph.op(n) {
                self.next_source = self.next_source.max(source.get() + 1);
            }
        }
    }

    pub fn new_var(&mut self) -> Result<VarId> {
        self.ensure_mutable()?;
        let v = VarId::new(self.next_var);
        self.next_var += 1;
        Ok(v)
    }

    /// Every id below this value has been allocated or observed.
    pub fn variable_high_watermark(&self) -> u64 {
        self.next_var
    }

    // ---- don't-apply memo ----

    pub fn dont_apply(&self, rule: &'static str, node: NodeId) -> bool {
        self.dont_apply.contains(&(rule, node))
    }

    pub fn mark_dont_apply(&mut self, rule: &'static str, node: NodeId) {
        self.dont_apply.insert((rule, node));
    }

    /// Drop memo entries of every rule for the given nodes.
    pub fn forget_nodes(&mut self, nodes: &BTreeSet<NodeId>) {
        self.dont_apply.retain(|(_, n)| !nodes.contains(n));
    }

    pub fn memo_len(&self) -> usize {
        self.dont_apply.len()
    }

    // ---- whole-graph one-shot flags ----

    pub fn has_run(&self, rule: &'static str) -> bool {
        self.one_shot.contains(rule)
    }

    pub fn mark_run(&mut self, rule: &'static str) {
        self.one_shot.insert(rule);
    }

    pub fn reset_one_shot(&mut self) {
        self.one_shot.clear();
    }

    // ---- data sources ----

    pub fn register_collection(&mut self, collection: &str) -> Result<DataSourceId> {
        self.ensure_mutable()?;
        let id = DataSourceId::new(self.next_source);
        self.next_source += 1;
        self.sources.insert(
            id,
            DataSource {
                id,
                collection: collection.to_string(),
                steps: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn append_steps(&mut self, id: DataSourceId, steps: &[NavigationStep]) -> Result<()> {
        self.ensure_mutable()?;
        let source = self
            .sources
            .get_mut(&id)
            .ok_or_else(|| Error::Plan(format!("unknown data source {id}")))?;
        source.steps.extend_from_slice(steps);
        Ok(())
    }

    pub fn data_source(&self, id: DataSourceId) -> Option<&DataSource> {
        self.sources.get(&id)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSource> {
        self.sources.values()
    }

    // ---- analysis caches ----

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut AnalysisCache {
        &mut self.cache
    }

    pub fn invalidate_analyses(&mut self) {
        self.cache = AnalysisCache::default();
    }

    // ---- lifecycle ----

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::graph::GraphBuilder;

    #[test]
    fn counter_stays_above_observed_ids() {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let a = b.add(Operator::assign(VarId::new(41), Expr::boolean(true)), &[ets]);
        let g = b.finish(a);

        let mut ctx = OptimizationContext::new();
        ctx.observe_graph(&g);
        assert_eq!(ctx.new_var().expect("var"), VarId::new(42));
        assert_eq!(ctx.variable_high_watermark(), 43);
    }

    #[test]
    fn memo_forget_is_per_node() {
        let mut ctx = OptimizationContext::new();
        ctx.mark_dont_apply("a", NodeId::new(1));
        ctx.mark_dont_apply("b", NodeId::new(1));
        ctx.mark_dont_apply("a", NodeId::new(2));
        ctx.forget_nodes(&[NodeId::new(1)].into_iter().collect());
        assert!(!ctx.dont_apply("a", NodeId::new(1)));
        assert!(ctx.dont_apply("a", NodeId::new(2)));
        assert_eq!(ctx.memo_len(), 1);
    }

    #[test]
    fn frozen_context_rejects_mutation() {
        let mut ctx = OptimizationContext::new();
        let ds = ctx.register_collection("docs").expect("register");
        ctx.freeze();
        assert!(matches!(ctx.new_var(), Err(Error::Frozen)));
        assert!(matches!(ctx.append_steps(ds, &[]), Err(Error::Frozen)));
        assert_eq!(ctx.data_source(ds).map(|d| d.collection.as_str()), Some("docs"));
    }
}
