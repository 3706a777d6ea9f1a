//! Optimizer configuration that embedders can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Upper bound on whole-catalog fixed-point iterations across all rule sets.
    /// Exceeding it is reported as `Error::NonTermination`.
    pub max_iterations: usize,

    /// Re-check plan well-formedness (scoping, slot targets) after every edit.
    pub verify_after_each_edit: bool,

    /// Record every rule application in the report, not just per-rule counts.
    pub trace_rules: bool,

    /// Rule names the driver skips.
    pub disabled_rules: Vec<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1_000,
            verify_after_each_edit: cfg!(debug_assertions),
            trace_rules: false,
            disabled_rules: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `XQOPT_MAX_ITERATIONS`: fixed-point iteration bound
    /// - `XQOPT_VERIFY`: `true`/`false`, verify after each edit
    /// - `XQOPT_TRACE_RULES`: `true`/`false`, keep a per-application trace
    /// - `XQOPT_DISABLED_RULES`: comma-separated rule names
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("XQOPT_MAX_ITERATIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_iterations = v;
            }
        }

        if let Ok(s) = std::env::var("XQOPT_VERIFY") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.verify_after_each_edit = v;
            }
        }

        if let Ok(s) = std::env::var("XQOPT_TRACE_RULES") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.trace_rules = v;
            }
        }

        if let Ok(s) = std::env::var("XQOPT_DISABLED_RULES") {
            cfg.disabled_rules = s
                .split(',')
                .map(|r| r.trim())
                .filter(|r| !r.is_empty())
                .map(|r| r.to_string())
                .collect();
        }

        cfg
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace_rules = on;
        self
    }

    pub fn with_verify(mut self, on: bool) -> Self {
        self.verify_after_each_edit = on;
        self
    }

    pub fn disable_rule(mut self, name: impl Into<String>) -> Self {
        self.disabled_rules.push(name.into());
        self
    }

    pub fn is_disabled(&self, rule: &str) -> bool {
        self.disabled_rules.iter().any(|r| r == rule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}
