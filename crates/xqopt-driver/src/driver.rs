//! Fixed-point rule driver.
//!
//! Phases run in order; each runs until a sweep over its rules changes
//! nothing. A sweep tries the rules in catalog order. Each rule gets one walk
//! of the plan, pre-order with inputs before nested plans, calling a pre-hook
//! before a node's children and a post-hook after them. Every rewrite found
//! is applied as the walk goes. A sweep that changed anything is followed by
//! another from the first rule, and the iteration bound counts sweeps.
//!
//! Memo discipline:
//! - `PerNode` rules skip nodes recorded in the don't-apply memo and record a
//!   node once both hooks declined it.
//! - `WholeGraph` rules have no memo. A walk that finds nothing sets the
//!   rule's one-shot flag; any edit clears every flag.
//! - After an edit, memo entries are dropped for the owners of the written
//!   slots and all their ancestors, the nested plans of any Subplan among
//!   them, and whatever a redirected slot now points at.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, trace, warn};

use xqopt_analysis::check_well_formed;
use xqopt_core::config::OptimizerConfig;
use xqopt_core::context::OptimizationContext;
use xqopt_core::error::{Error, Result};
use xqopt_core::functions::{BuiltinCatalog, FunctionCatalog};
use xqopt_core::graph::{Operator, OperatorGraph};
use xqopt_core::id::{NodeId, SlotId};
use xqopt_core::types::{BuiltinTypeSystem, TypeSystem};
use xqopt_rules::apply::apply_rewrite;
use xqopt_rules::rule::{EditOp, Rewrite, RewriteContext, Rule, RuleScope};
use xqopt_rules::ruleset::{default_rule_sets, RuleSet};

use crate::metrics::emit_span;
use crate::report::{plan_hash, AppliedRule, OptimizeReport};

/// A rewrite found during a sweep, with the position it matched.
struct Hit {
    slot: SlotId,
    node: NodeId,
    rewrite: Rewrite,
}

#[derive(Clone, Copy)]
enum Stage {
    Pre,
    Post { pre_ran: bool, epoch: usize },
}

struct Frame {
    slot: SlotId,
    node: NodeId,
    stage: Stage,
}

#[derive(Default)]
struct RunState {
    iterations: usize,
    applied: BTreeMap<String, usize>,
    trace: Vec<AppliedRule>,
}

pub struct RuleDriver {
    config: OptimizerConfig,
    rule_sets: Vec<RuleSet>,
    catalog: Box<dyn FunctionCatalog + Send + Sync>,
    types: Box<dyn TypeSystem + Send + Sync>,
}

impl std::fmt::Debug for RuleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDriver")
            .field("config", &self.config)
            .field("rule_sets", &self.rule_sets)
            .finish_non_exhaustive()
    }
}

impl RuleDriver {
    /// Driver with the default catalog and builtin collaborators.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rule_sets: default_rule_sets(),
            catalog: Box::new(BuiltinCatalog::new()),
            types: Box::new(BuiltinTypeSystem),
        })
    }

    pub fn with_rule_sets(mut self, rule_sets: Vec<RuleSet>) -> Self {
        self.rule_sets = rule_sets;
        self
    }

    pub fn with_collaborators(
        mut self,
        catalog: Box<dyn FunctionCatalog + Send + Sync>,
        types: Box<dyn TypeSystem + Send + Sync>,
    ) -> Self {
        self.catalog = catalog;
        self.types = types;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Enabled rules per phase, in execution order.
    pub fn rule_names(&self) -> Vec<(&'static str, Vec<&'static str>)> {
        self.rule_sets
            .iter()
            .map(|s| {
                let names = s
                    .rule_names()
                    .into_iter()
                    .filter(|n| !self.config.is_disabled(n))
                    .collect();
                (s.name, names)
            })
            .collect()
    }

    /// Rewrite `graph` to a fixed point. The context is frozen afterwards,
    /// whether or not optimization succeeded.
    pub fn optimize(
        &self,
        graph: &mut OperatorGraph,
        ctx: &mut OptimizationContext,
    ) -> Result<OptimizeReport> {
        let result = self.run(graph, ctx);
        ctx.freeze();
        result
    }

    fn run(&self, graph: &mut OperatorGraph, ctx: &mut OptimizationContext) -> Result<OptimizeReport> {
        ctx.ensure_mutable()?;
        ctx.observe_graph(graph);
        ctx.invalidate_analyses();
        if self.config.verify_after_each_edit {
            check_well_formed(graph)?;
        }

        let mut state = RunState::default();
        for set in &self.rule_sets {
            self.run_phase(set, graph, ctx, &mut state)?;
        }

        let report = OptimizeReport {
            compilation_id: ctx.compilation_id(),
            iterations: state.iterations,
            rules_applied: state.applied,
            trace: state.trace,
            plan_hash: plan_hash(graph, ctx)?,
        };
        debug!(
            compilation = %report.compilation_id,
            iterations = report.iterations,
            applied = report.total_applied(),
            plan_hash = %report.plan_hash.short(),
            "optimization converged"
        );
        Ok(report)
    }

    fn run_phase(
        &self,
        set: &RuleSet,
        graph: &mut OperatorGraph,
        ctx: &mut OptimizationContext,
        state: &mut RunState,
    ) -> Result<()> {
        let rules: Vec<&dyn Rule> = set
            .rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| !self.config.is_disabled(r.name()))
            .collect();
        debug!(phase = set.name, rules = rules.len(), "entering phase");
        ctx.reset_one_shot();

        loop {
            if state.iterations >= self.config.max_iterations {
                warn!(
                    phase = set.name,
                    iterations = state.iterations,
                    "fixed-point bound exceeded"
                );
                return Err(Error::NonTermination {
                    iterations: state.iterations,
                });
            }
            state.iterations += 1;
            debug!(phase = set.name, iteration = state.iterations, "fixed-point sweep");

            let mut changed = false;
            for rule in &rules {
                changed |= self.sweep(set.name, *rule, graph, ctx, state)?;
            }
            if !changed {
                debug!(phase = set.name, memo = ctx.memo_len(), "phase converged");
                return Ok(());
            }
        }
    }

    /// One walk of the plan for `rule`, committing every rewrite it offers.
    /// A node rewritten by its pre-hook is not descended into; the next sweep
    /// sees the replacement.
    fn sweep(
        &self,
        phase: &'static str,
        rule: &dyn Rule,
        graph: &mut OperatorGraph,
        ctx: &mut OptimizationContext,
        state: &mut RunState,
    ) -> Result<bool> {
        let memoized = match rule.scope() {
            RuleScope::PerNode => true,
            RuleScope::WholeGraph if ctx.has_run(rule.name()) => return Ok(false),
            RuleScope::WholeGraph => false,
        };

        let mut commits = 0usize;
        let mut live: Option<HashSet<SlotId>> = None;
        let root = graph.root();
        let mut stack = vec![Frame {
            slot: root,
            node: graph.target(root),
            stage: Stage::Pre,
        }];

        while let Some(Frame { slot, node, stage }) = stack.pop() {
            // Frames queued before an edit may point at replaced or detached slots.
            if graph.target(slot) != node || live.as_ref().is_some_and(|l| !l.contains(&slot)) {
                continue;
            }
            let skip = memoized && ctx.dont_apply(rule.name(), node);

            let found = match stage {
                Stage::Pre if skip => None,
                Stage::Pre => {
                    let mut cx = RewriteContext::new(ctx, self.catalog.as_ref(), self.types.as_ref());
                    rule.rewrite_pre(slot, graph, &mut cx)?
                }
                Stage::Post { .. } if skip => continue,
                Stage::Post { .. } => {
                    let mut cx = RewriteContext::new(ctx, self.catalog.as_ref(), self.types.as_ref());
                    rule.rewrite_post(slot, graph, &mut cx)?
                }
            };

            if let Some(rewrite) = found {
                self.commit(phase, rule, Hit { slot, node, rewrite }, graph, ctx, state)?;
                commits += 1;
                live = Some(graph.walk().into_iter().map(|e| e.slot).collect());
                continue;
            }

            match stage {
                Stage::Pre => {
                    stack.push(Frame {
                        slot,
                        node,
                        stage: Stage::Post {
                            pre_ran: !skip,
                            epoch: commits,
                        },
                    });
                    let n = graph.node(node);
                    for child in n.inputs.iter().chain(&n.nested).rev() {
                        stack.push(Frame {
                            slot: *child,
                            node: graph.target(*child),
                            stage: Stage::Pre,
                        });
                    }
                }
                // Only memoize a decline both hooks made against the same plan.
                Stage::Post { pre_ran, epoch } => {
                    if memoized && pre_ran && epoch == commits {
                        ctx.mark_dont_apply(rule.name(), node);
                    }
                }
            }
        }

        if !memoized && commits == 0 {
            ctx.mark_run(rule.name());
        }
        Ok(commits > 0)
    }

    fn commit(
        &self,
        phase: &'static str,
        rule: &dyn Rule,
        hit: Hit,
        graph: &mut OperatorGraph,
        ctx: &mut OptimizationContext,
        state: &mut RunState,
    ) -> Result<()> {
        let written = apply_rewrite(graph, ctx, &hit.rewrite)?;
        ctx.invalidate_analyses();
        ctx.reset_one_shot();
        ctx.forget_nodes(&stale_nodes(graph, &written, &hit.rewrite));
        if self.config.verify_after_each_edit {
            check_well_formed(graph).map_err(|e| {
                Error::Invariant(format!("{} produced an ill-formed plan: {e}", rule.name()))
            })?;
        }

        *state.applied.entry(rule.name().to_string()).or_default() += 1;
        trace!(
            rule = rule.name(),
            node = %hit.node,
            slot = %hit.slot,
            iteration = state.iterations,
            "rule applied"
        );
        emit_span(
            "rule_applied",
            &[
                ("phase", phase.to_string()),
                ("rule", rule.name().to_string()),
                ("node", hit.node.to_string()),
                ("edits", hit.rewrite.edits.len().to_string()),
            ],
        );
        if self.config.trace_rules {
            state.trace.push(AppliedRule {
                phase: phase.to_string(),
                rule: rule.name().to_string(),
                node: hit.node,
                iteration: state.iterations,
            });
        }
        Ok(())
    }
}

/// Nodes whose memo entries an edit invalidates.
fn stale_nodes(graph: &OperatorGraph, written: &[SlotId], rewrite: &Rewrite) -> BTreeSet<NodeId> {
    let walk = graph.walk();
    let owners: HashMap<SlotId, NodeId> = walk
        .iter()
        .filter_map(|e| e.parent.map(|(p, _)| (e.slot, p)))
        .collect();
    let parents = graph.parent_map();

    let mut stale = BTreeSet::new();
    let mut pending: Vec<NodeId> = written.iter().filter_map(|s| owners.get(s).copied()).collect();
    while let Some(n) = pending.pop() {
        if stale.insert(n) {
            if let Some(ps) = parents.get(&n) {
                pending.extend(ps.iter().copied());
            }
        }
    }

    // Nested plans read their Subplan's input through the NTS, and a
    // redirected subtree sits in a new context.
    let mut roots: Vec<NodeId> = stale
        .iter()
        .filter(|n| matches!(graph.op(**n), Operator::Subplan))
        .flat_map(|n| {
            graph
                .node(*n)
                .nested
                .iter()
                .map(|s| graph.target(*s))
                .collect::<Vec<_>>()
        })
        .collect();
    roots.extend(rewrite.edits.iter().filter_map(|e| match e {
        EditOp::Redirect { to, .. } => Some(*to),
        _ => None,
    }));
    while let Some(n) = roots.pop() {
        if stale.insert(n) {
            let node = graph.node(n);
            roots.extend(node.inputs.iter().chain(&node.nested).map(|s| graph.target(*s)));
        }
    }
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use xqopt_core::prelude::*;
    use xqopt_rules::rule::NodeSpec;

    /// Rebuilds the root on every visit, so it never converges.
    struct Churn;

    impl Rule for Churn {
        fn name(&self) -> &'static str {
            "churn"
        }

        fn rewrite_pre(
            &self,
            slot: SlotId,
            graph: &OperatorGraph,
            _cx: &mut RewriteContext<'_>,
        ) -> Result<Option<Rewrite>> {
            if slot != graph.root() {
                return Ok(None);
            }
            let root = graph.target(slot);
            let spec = NodeSpec::like(graph, root, graph.op(root).clone());
            Ok(Some(Rewrite::replace(slot, spec)))
        }
    }

    fn v(n: u64) -> VarId {
        VarId::new(n)
    }

    /// distribute-result($2) <- assign($2 := treat($1, item()*)) <- assign($1 := 1) <- ETS
    fn treat_plan() -> (OperatorGraph, OptimizationContext) {
        let mut b = GraphBuilder::new();
        let ets = b.leaf(Operator::EmptyTupleSource);
        let one = b.add(Operator::assign(v(1), Expr::integer(1)), &[ets]);
        let treat = Expr::call(
            FunctionId::Treat,
            vec![
                Expr::var(v(1)),
                Expr::type_arg(SequenceType::star(ItemType::AnyItem)),
            ],
        );
        let two = b.add(Operator::assign(v(2), treat), &[one]);
        let root = b.add(
            Operator::DistributeResult {
                exprs: vec![Expr::var(v(2))],
            },
            &[two],
        );
        (b.finish(root), OptimizationContext::new())
    }

    #[test]
    fn non_converging_rule_hits_the_bound() {
        let driver = RuleDriver::new(OptimizerConfig::default().with_max_iterations(5))
            .expect("driver")
            .with_rule_sets(vec![RuleSet::new("loop").with(Churn)]);
        let (mut graph, mut ctx) = treat_plan();
        let err = driver.optimize(&mut graph, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::NonTermination { iterations: 5 }));
        assert!(ctx.is_frozen());
    }

    /// distribute-result($n) <- assign($n := treat($n-1, item()*)) <- ... <- assign($1 := 1) <- ETS
    fn treat_chain(len: u64) -> (OperatorGraph, OptimizationContext) {
        let mut b = GraphBuilder::new();
        let mut top = b.leaf(Operator::EmptyTupleSource);
        top = b.add(Operator::assign(v(1), Expr::integer(1)), &[top]);
        for i in 2..=len {
            let treat = Expr::call(
                FunctionId::Treat,
                vec![
                    Expr::var(v(i - 1)),
                    Expr::type_arg(SequenceType::star(ItemType::AnyItem)),
                ],
            );
            top = b.add(Operator::assign(v(i), treat), &[top]);
        }
        let root = b.add(
            Operator::DistributeResult {
                exprs: vec![Expr::var(v(len))],
            },
            &[top],
        );
        (b.finish(root), OptimizationContext::new())
    }

    #[test]
    fn bound_counts_sweeps_not_rewrites() {
        let driver =
            RuleDriver::new(OptimizerConfig::default().with_max_iterations(10)).expect("driver");
        let (mut graph, mut ctx) = treat_chain(40);
        let report = driver.optimize(&mut graph, &mut ctx).expect("optimize");
        assert_eq!(report.rules_applied.get("remove-redundant-treat"), Some(&39));
        assert!(report.iterations <= 10);
    }

    #[test]
    fn one_sweep_rewrites_every_match() {
        let driver = RuleDriver::new(OptimizerConfig::default().with_trace(true))
            .expect("driver")
            .with_rule_sets(vec![RuleSet::new("normalization").with(
                xqopt_rules::conversions::RemoveRedundantConversion::treat(),
            )]);
        let (mut graph, mut ctx) = treat_chain(6);
        let report = driver.optimize(&mut graph, &mut ctx).expect("optimize");
        assert_eq!(report.iterations, 2);
        assert_eq!(report.trace.len(), 5);
        assert!(report.trace.iter().all(|a| a.iteration == 1));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let config = OptimizerConfig::default().disable_rule("churn");
        let driver = RuleDriver::new(config)
            .expect("driver")
            .with_rule_sets(vec![RuleSet::new("loop").with(Churn)]);
        assert_eq!(driver.rule_names(), vec![("loop", vec![])]);
        let (mut graph, mut ctx) = treat_plan();
        let report = driver.optimize(&mut graph, &mut ctx).expect("optimize");
        assert_eq!(report.total_applied(), 0);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn trace_records_each_application() {
        let driver = RuleDriver::new(OptimizerConfig::default().with_trace(true).with_verify(true))
            .expect("driver");
        let (mut graph, mut ctx) = treat_plan();
        let report = driver.optimize(&mut graph, &mut ctx).expect("optimize");
        assert_eq!(report.trace.len(), report.total_applied());
        let first = report.trace.first().expect("at least one application");
        assert_eq!(first.phase, "normalization");
        assert_eq!(first.rule, "remove-redundant-treat");
    }

    #[test]
    fn frozen_context_is_rejected() {
        let driver = RuleDriver::new(OptimizerConfig::default()).expect("driver");
        let (mut graph, mut ctx) = treat_plan();
        driver.optimize(&mut graph, &mut ctx).expect("first run");
        assert!(matches!(
            driver.optimize(&mut graph, &mut ctx),
            Err(Error::Frozen)
        ));
    }

    #[test]
    fn zero_iteration_bound_is_a_config_error() {
        let err = RuleDriver::new(OptimizerConfig::default().with_max_iterations(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
