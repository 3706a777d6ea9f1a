//! Textual plan fixtures.

pub mod yaml;

pub use yaml::{parse_yaml_plan, ParsedPlan};
