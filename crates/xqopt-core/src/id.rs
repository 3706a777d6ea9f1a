//! Strongly-typed identifiers used across the optimizer.
//!
//! Downstream crates (analysis, rules, driver) should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

// Logical variable bound by an operator; unique within one compilation.
new_id!(VarId, "$v");
// Arena handle of an operator node. Identity, not structure, keys memoization.
new_id!(NodeId, "#");
// Arena handle of an edge cell.
new_id!(SlotId, "slot:");
new_id!(DataSourceId, "ds:");
