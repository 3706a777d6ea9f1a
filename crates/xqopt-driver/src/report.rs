//! What one optimization run did.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use xqopt_core::context::OptimizationContext;
use xqopt_core::error::Result;
use xqopt_core::graph::OperatorGraph;
use xqopt_core::hash::{digest_of, Hash256};
use xqopt_core::id::NodeId;

/// One successful rule application, recorded when `trace_rules` is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub phase: String,
    pub rule: String,
    /// Node the rule matched (before the edit).
    pub node: NodeId,
    pub iteration: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub compilation_id: Uuid,
    /// Fixed-point passes over all phases, including each phase's final
    /// no-change pass.
    pub iterations: usize,
    pub rules_applied: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<AppliedRule>,
    /// Digest of the converged plan and the data-source registry.
    pub plan_hash: Hash256,
}

impl OptimizeReport {
    pub fn total_applied(&self) -> usize {
        self.rules_applied.values().sum()
    }

    pub fn applied(&self, rule: &str) -> usize {
        self.rules_applied.get(rule).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Digest of the live plan chained with the data-source registry.
pub fn plan_hash(graph: &OperatorGraph, ctx: &OptimizationContext) -> Result<Hash256> {
    let sources: Vec<_> = ctx.data_sources().collect();
    Ok(graph.fingerprint()?.chain(&digest_of(&sources)?))
}
