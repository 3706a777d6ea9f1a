#![forbid(unsafe_code)]
//! xqopt-core: the data model of the XQuery logical-plan rewriter.
//!
//! - `graph`: operator arena with swappable edge slots
//! - `expr`, `types`, `functions`: expressions and the collaborator interfaces
//!   (type system, function catalog) the rules consume
//! - `context`: per-compilation state (variable counter, memo, caches)
//!
//! No logging, no I/O here. Analyses, rules, and the driver build on top.

pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod functions;
pub mod graph;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod props;
pub mod types;

pub use error::{Error, Result};
