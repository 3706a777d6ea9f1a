//! Lattice values produced by the dataflow analyses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::VarId;

/// Rows produced by an operator: exactly one, or possibly many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// Three-valued property lattice shared by document order and node uniqueness.
pub trait Tristate: Copy + Eq {
    const YES: Self;
    const NO: Self;
    const UNKNOWN: Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentOrder {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniqueNodes {
    Yes,
    No,
    Unknown,
}

impl Tristate for DocumentOrder {
    const YES: Self = DocumentOrder::Yes;
    const NO: Self = DocumentOrder::No;
    const UNKNOWN: Self = DocumentOrder::Unknown;
}

impl Tristate for UniqueNodes {
    const YES: Self = UniqueNodes::Yes;
    const NO: Self = UniqueNodes::No;
    const UNKNOWN: Self = UniqueNodes::Unknown;
}

/// How a function's result relates to the property of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagationPolicy {
    PreservesIfAllArgs,
    AlwaysLoses,
    AlwaysYields,
}

impl PropagationPolicy {
    pub fn propagate<P: Tristate>(self, args: impl IntoIterator<Item = P>) -> P {
        match self {
            PropagationPolicy::AlwaysLoses => P::NO,
            PropagationPolicy::AlwaysYields => P::YES,
            PropagationPolicy::PreservesIfAllArgs => {
                let mut out = P::YES;
                for a in args {
                    if a == P::NO {
                        return P::NO;
                    }
                    if a == P::UNKNOWN {
                        out = P::UNKNOWN;
                    }
                }
                out
            }
        }
    }
}

/// Per-variable order and uniqueness flags visible at one operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableProperties {
    pub order: BTreeMap<VarId, DocumentOrder>,
    pub unique: BTreeMap<VarId, UniqueNodes>,
}

impl VariableProperties {
    pub fn order_of(&self, v: VarId) -> DocumentOrder {
        self.order.get(&v).copied().unwrap_or(DocumentOrder::Unknown)
    }

    pub fn unique_of(&self, v: VarId) -> UniqueNodes {
        self.unique.get(&v).copied().unwrap_or(UniqueNodes::Unknown)
    }

    pub fn set(&mut self, v: VarId, order: DocumentOrder, unique: UniqueNodes) {
        self.order.insert(v, order);
        self.unique.insert(v, unique);
    }

    /// Every known variable drops to NO.
    pub fn reset_all(&mut self) {
        self.order.values_mut().for_each(|o| *o = DocumentOrder::No);
        self.unique.values_mut().for_each(|u| *u = UniqueNodes::No);
    }

    pub fn extend(&mut self, other: &VariableProperties) {
        self.order.extend(other.order.iter().map(|(k, v)| (*k, *v)));
        self.unique.extend(other.unique.iter().map(|(k, v)| (*k, *v)));
    }

    pub fn retain(&mut self, keep: impl Fn(VarId) -> bool) {
        self.order.retain(|k, _| keep(*k));
        self.unique.retain(|k, _| keep(*k));
    }
}
