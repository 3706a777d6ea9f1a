//! Function metadata consumed by the rules and analyses.
//!
//! `BuiltinCatalog::new()` is the one place the table is built; callers keep
//! the catalog for the lifetime of a driver.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::expr::FunctionId;
use crate::props::PropagationPolicy;
use crate::types::{ItemType, SequenceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    AtLeast(usize),
}

/// Which evaluators a function provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStrategy {
    Scalar,
    Unnesting,
    ScalarAndUnnesting,
}

impl EvaluationStrategy {
    pub fn has_scalar(self) -> bool {
        matches!(
            self,
            EvaluationStrategy::Scalar | EvaluationStrategy::ScalarAndUnnesting
        )
    }
}

/// Local/global decomposition of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSteps {
    pub local: FunctionId,
    pub global: FunctionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub arity: Arity,
    pub evaluation: EvaluationStrategy,
    pub order_policy: PropagationPolicy,
    pub unique_policy: PropagationPolicy,
    pub return_type: SequenceType,
    pub aggregate: Option<AggregateSteps>,
}

pub trait FunctionCatalog {
    fn info(&self, function: FunctionId) -> Result<&FunctionInfo>;
}

#[derive(Debug, Clone)]
pub struct BuiltinCatalog {
    table: HashMap<FunctionId, FunctionInfo>,
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        use EvaluationStrategy::*;
        use FunctionId as F;
        use PropagationPolicy::*;

        let item_star = SequenceType::star(ItemType::AnyItem);
        let node_star = SequenceType::star(ItemType::AnyNode);
        let bool_one = SequenceType::one(ItemType::Boolean);
        let bool_opt = SequenceType::optional(ItemType::Boolean);
        let atomic_opt = SequenceType::optional(ItemType::AnyAtomic);

        let mut table = HashMap::new();
        let mut def = |f: FunctionId,
                       arity: Arity,
                       evaluation: EvaluationStrategy,
                       order: PropagationPolicy,
                       unique: PropagationPolicy,
                       ret: SequenceType| {
            table.insert(
                f,
                FunctionInfo {
                    arity,
                    evaluation,
                    order_policy: order,
                    unique_policy: unique,
                    return_type: ret,
                    aggregate: None,
                },
            );
        };

        // Navigation and sources.
        def(F::Iterate, Arity::Fixed(1), ScalarAndUnnesting, PreservesIfAllArgs, PreservesIfAllArgs, item_star);
        def(F::Child, Arity::Fixed(2), ScalarAndUnnesting, PreservesIfAllArgs, PreservesIfAllArgs, node_star);
        def(F::Attribute, Arity::Fixed(2), ScalarAndUnnesting, PreservesIfAllArgs, PreservesIfAllArgs, SequenceType::star(ItemType::Attribute));
        def(F::Descendant, Arity::Fixed(2), ScalarAndUnnesting, AlwaysLoses, AlwaysLoses, node_star);
        def(F::DescendantOrSelf, Arity::Fixed(2), ScalarAndUnnesting, AlwaysLoses, AlwaysLoses, node_star);
        def(F::KeysOrMembers, Arity::Fixed(1), ScalarAndUnnesting, PreservesIfAllArgs, PreservesIfAllArgs, item_star);
        def(F::Value, Arity::Fixed(2), Scalar, PreservesIfAllArgs, PreservesIfAllArgs, item_star);
        def(F::Collection, Arity::Fixed(1), ScalarAndUnnesting, AlwaysYields, AlwaysYields, node_star);
        def(F::Doc, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, SequenceType::optional(ItemType::Document));

        // Conversions. treat/cast/promote return their type argument; the entry is a fallback.
        def(F::Treat, Arity::Fixed(2), Scalar, PreservesIfAllArgs, PreservesIfAllArgs, item_star);
        def(F::Promote, Arity::Fixed(2), Scalar, PreservesIfAllArgs, PreservesIfAllArgs, SequenceType::star(ItemType::AnyAtomic));
        def(F::Cast, Arity::Fixed(2), Scalar, AlwaysYields, AlwaysYields, atomic_opt);
        def(F::Data, Arity::Fixed(1), Scalar, PreservesIfAllArgs, PreservesIfAllArgs, SequenceType::star(ItemType::AnyAtomic));
        def(F::Boolean, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, bool_one);

        // Logic and comparisons.
        def(F::Not, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, bool_one);
        def(F::Empty, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, bool_one);
        for f in [F::And, F::Or] {
            def(f, Arity::AtLeast(2), Scalar, AlwaysYields, AlwaysYields, bool_one);
        }
        for f in [F::ValueEq, F::ValueNe, F::ValueLt, F::ValueLe, F::ValueGt, F::ValueGe] {
            def(f, Arity::Fixed(2), Scalar, AlwaysYields, AlwaysYields, bool_opt);
        }
        for f in [F::GeneralEq, F::GeneralNe, F::GeneralLt, F::GeneralLe, F::GeneralGt, F::GeneralGe] {
            def(f, Arity::Fixed(2), Scalar, AlwaysYields, AlwaysYields, bool_one);
        }

        // Sequences and aggregates.
        def(F::Sequence, Arity::AtLeast(0), Scalar, AlwaysLoses, AlwaysLoses, item_star);
        def(F::Count, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, SequenceType::one(ItemType::Integer));
        def(F::Min, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, atomic_opt);
        def(F::Max, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, atomic_opt);
        def(F::Sum, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, SequenceType::one(ItemType::AnyAtomic));
        def(F::Avg, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, atomic_opt);
        def(F::AvgLocal, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, item_star);
        def(F::AvgGlobal, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, atomic_opt);

        // Node-sequence normalization.
        def(F::SortDistinctNodesAscOrAtomics, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, item_star);
        def(F::DistinctNodesOrAtomics, Arity::Fixed(1), Scalar, PreservesIfAllArgs, AlwaysYields, item_star);
        def(F::SortNodesAsc, Arity::Fixed(1), Scalar, AlwaysYields, PreservesIfAllArgs, item_star);

        // Two-valued boolean algebra.
        for f in [F::AlgAnd, F::AlgOr] {
            def(f, Arity::AtLeast(2), Scalar, AlwaysYields, AlwaysYields, bool_one);
        }
        for f in [F::AlgEq, F::AlgNeq, F::AlgLt, F::AlgLe, F::AlgGt, F::AlgGe] {
            def(f, Arity::Fixed(2), Scalar, AlwaysYields, AlwaysYields, bool_one);
        }
        def(F::AlgNot, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, bool_one);
        def(F::AlgIsNull, Arity::Fixed(1), Scalar, AlwaysYields, AlwaysYields, bool_one);

        for (agg, local, global) in [
            (F::Count, F::Count, F::Sum),
            (F::Min, F::Min, F::Min),
            (F::Max, F::Max, F::Max),
            (F::Sum, F::Sum, F::Sum),
            (F::Avg, F::AvgLocal, F::AvgGlobal),
        ] {
            if let Some(info) = table.get_mut(&agg) {
                info.aggregate = Some(AggregateSteps { local, global });
            }
        }

        Self { table }
    }
}

impl FunctionCatalog for BuiltinCatalog {
    fn info(&self, function: FunctionId) -> Result<&FunctionInfo> {
        self.table
            .get(&function)
            .ok_or_else(|| Error::UnknownFunction(function.name().to_string()))
    }
}
