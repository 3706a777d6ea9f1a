#![forbid(unsafe_code)]
//! xqopt-driver: runs the rule catalog over a plan to a fixed point.
//!
//! ```ignore
//! let driver = RuleDriver::new(OptimizerConfig::from_env())?;
//! let report = driver.optimize(&mut graph, &mut ctx)?;
//! ```

pub mod driver;
pub mod metrics;
pub mod report;

pub use driver::RuleDriver;
pub use report::{plan_hash, AppliedRule, OptimizeReport};
