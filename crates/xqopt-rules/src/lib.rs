#![forbid(unsafe_code)]
//! xqopt-rules: the rewrite rule catalog.
//!
//! A rule inspects one slot of the graph and, on a match, returns a
//! `Rewrite` describing the edit. Rules never mutate the graph themselves;
//! `apply::apply_rewrite` materializes the edit and the driver decides when.
//!
//! Catalog (see `ruleset::default_rule_sets` for the order):
//! - conversions: redundant `treat` / `promote` / `data` / `boolean` removal
//! - collection:  `iterate(collection(..))` -> data-source scan
//! - path:        assigned child steps and `descendant-or-self::node()/child::x` fusion
//! - scan:        step fusion into scans, `iterate` over single items, no-op assigns
//! - unnest:      unnest-chain fusion
//! - subplan:     subplan elimination
//! - sort_distinct: document-order driven normalization removal
//! - inline:      copy propagation through `Assign($b: $a)`
//! - aggregate:   aggregate folding and two-step annotation
//! - algebricks:  boolean/comparison function conversion and its inverse

pub mod aggregate;
pub mod algebricks;
pub mod apply;
pub mod collection;
pub mod conversions;
pub mod dsl;
pub mod inline;
pub mod path;
pub mod rule;
pub mod ruleset;
pub mod scan;
pub mod sort_distinct;
pub mod subplan;
pub mod toolbox;
pub mod unnest;

#[cfg(test)]
mod testing;

pub use apply::apply_rewrite;
pub use dsl::yaml::parse_yaml_plan;
pub use rule::{EditOp, NodeSpec, Rewrite, RewriteContext, Rule, RuleScope, Target};
pub use ruleset::{default_rule_sets, RuleSet};
