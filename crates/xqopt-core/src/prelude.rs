//! Convenient re-exports for downstream crates.

pub use crate::config::OptimizerConfig;
pub use crate::context::{DataSource, NavigationStep, OptimizationContext};
pub use crate::error::{Error, Result};
pub use crate::expr::{Constant, Expr, FunctionCall, FunctionId};
pub use crate::functions::{BuiltinCatalog, EvaluationStrategy, FunctionCatalog, FunctionInfo};
pub use crate::graph::{GraphBuilder, JoinKind, Operator, OperatorGraph, OrderKey, PlanTree};
pub use crate::id::{DataSourceId, NodeId, SlotId, VarId};
pub use crate::props::{Cardinality, DocumentOrder, PropagationPolicy, UniqueNodes};
pub use crate::types::{BuiltinTypeSystem, ConstantValue, ItemType, Quantifier, SequenceType, TypeSystem};
