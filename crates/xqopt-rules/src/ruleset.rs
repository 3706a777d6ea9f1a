//! Ordered rule phases.
//!
//! Each `RuleSet` is run to its own fixed point before the next one starts.
//! The forward and reverse boolean conversions live in different phases so
//! they can never undo each other inside one fixed point.

use crate::aggregate::{ConsolidateAggregate, IntroduceTwoStepAggregate};
use crate::algebricks::{ConvertFromAlgebricks, ConvertToAlgebricks};
use crate::collection::IntroduceCollection;
use crate::conversions::RemoveRedundantConversion;
use crate::inline::InlineReferenceVariables;
use crate::path::{ConsolidateDescendantChild, ConvertAssignToUnnest};
use crate::rule::Rule;
use crate::scan::{InlineNoOpAssign, PushNavigationIntoScan, RemoveUnusedUnnestIterate};
use crate::sort_distinct::RemoveUnusedSortDistinctNodes;
use crate::subplan::{
    EliminateSubplanForSingleItems, EliminateSubplanInputCardinalityOne,
    EliminateUnnestAggregateSubplan,
};
use crate::unnest::ConsolidateUnnests;

pub struct RuleSet {
    pub name: &'static str,
    pub rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rules: Vec::new(),
        }
    }

    pub fn with(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("name", &self.name)
            .field("rules", &self.rule_names())
            .finish()
    }
}

pub fn normalization() -> RuleSet {
    RuleSet::new("normalization")
        .with(RemoveRedundantConversion::treat())
        .with(RemoveRedundantConversion::data())
        .with(RemoveRedundantConversion::promote())
        .with(RemoveRedundantConversion::boolean())
        .with(EliminateUnnestAggregateSubplan)
        .with(EliminateSubplanForSingleItems)
        .with(ConvertAssignToUnnest)
        .with(IntroduceCollection)
        .with(ConsolidateDescendantChild)
        .with(RemoveUnusedUnnestIterate)
        .with(PushNavigationIntoScan)
        .with(ConsolidateUnnests)
        .with(InlineNoOpAssign)
        .with(EliminateSubplanInputCardinalityOne)
        .with(RemoveUnusedSortDistinctNodes)
        .with(InlineReferenceVariables)
}

pub fn aggregation() -> RuleSet {
    RuleSet::new("aggregation")
        .with(ConsolidateAggregate)
        .with(IntroduceTwoStepAggregate)
}

pub fn algebricks() -> RuleSet {
    RuleSet::new("algebricks").with(ConvertToAlgebricks)
}

pub fn job_gen() -> RuleSet {
    RuleSet::new("job-gen").with(ConvertFromAlgebricks)
}

/// The full catalog, in execution order.
pub fn default_rule_sets() -> Vec<RuleSet> {
    vec![normalization(), aggregation(), algebricks(), job_gen()]
}
