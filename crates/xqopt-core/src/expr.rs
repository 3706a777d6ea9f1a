//! Expression trees hanging off operators: function calls, variable
//! references, and typed opaque constants.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::id::VarId;
use crate::types::{ItemType, SequenceType, TAG_BOOLEAN, TAG_INTEGER, TAG_STRING};

macro_rules! functions {
    ($($variant:ident => $name:literal,)*) => {
        /// Closed set of function identifiers the rewriter understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum FunctionId {
            $($variant,)*
        }

        impl FunctionId {
            pub const ALL: &'static [FunctionId] = &[$(FunctionId::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(FunctionId::$variant => $name,)*
                }
            }
        }
    };
}

functions! {
    Iterate => "iterate",
    Child => "child",
    Descendant => "descendant",
    DescendantOrSelf => "descendant-or-self",
    Attribute => "attribute",
    KeysOrMembers => "keys-or-members",
    Value => "value",
    Collection => "fn:collection",
    Doc => "fn:doc",
    Treat => "treat",
    Promote => "promote",
    Data => "fn:data",
    Boolean => "fn:boolean",
    Cast => "cast",
    Not => "fn:not",
    Empty => "fn:empty",
    And => "and",
    Or => "or",
    ValueEq => "value-eq",
    ValueNe => "value-ne",
    ValueLt => "value-lt",
    ValueLe => "value-le",
    ValueGt => "value-gt",
    ValueGe => "value-ge",
    GeneralEq => "general-eq",
    GeneralNe => "general-ne",
    GeneralLt => "general-lt",
    GeneralLe => "general-le",
    GeneralGt => "general-gt",
    GeneralGe => "general-ge",
    Sequence => "sequence",
    Count => "fn:count",
    Min => "fn:min",
    Max => "fn:max",
    Sum => "fn:sum",
    Avg => "fn:avg",
    AvgLocal => "avg-local",
    AvgGlobal => "avg-global",
    SortDistinctNodesAscOrAtomics => "sort-distinct-nodes-asc-or-atomics",
    DistinctNodesOrAtomics => "distinct-nodes-or-atomics",
    SortNodesAsc => "sort-nodes-asc",
    AlgAnd => "algebricks:and",
    AlgOr => "algebricks:or",
    AlgNot => "algebricks:not",
    AlgEq => "algebricks:eq",
    AlgNeq => "algebricks:neq",
    AlgLt => "algebricks:lt",
    AlgLe => "algebricks:le",
    AlgGt => "algebricks:gt",
    AlgGe => "algebricks:ge",
    AlgIsNull => "algebricks:is-null",
}

static BY_NAME: Lazy<HashMap<&'static str, FunctionId>> =
    Lazy::new(|| FunctionId::ALL.iter().map(|f| (f.name(), *f)).collect());

impl FunctionId {
    pub fn from_name(name: &str) -> Option<FunctionId> {
        BY_NAME.get(name).copied()
    }

    pub fn is_algebricks(self) -> bool {
        self.name().starts_with("algebricks:")
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed opaque constant. The byte layout belongs to the type system; this
/// crate only knows how to build the three literal kinds the rewriter emits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constant {
    ty: SequenceType,
    bytes: Vec<u8>,
}

impl Constant {
    pub fn from_raw(ty: SequenceType, bytes: Vec<u8>) -> Self {
        Self { ty, bytes }
    }

    pub fn integer(v: i64) -> Self {
        let mut bytes = Vec::with_capacity(9);
        bytes.push(TAG_INTEGER);
        bytes.extend_from_slice(&v.to_be_bytes());
        Self::from_raw(SequenceType::one(ItemType::Integer), bytes)
    }

    pub fn string(s: &str) -> Self {
        let mut bytes = Vec::with_capacity(5 + s.len());
        bytes.push(TAG_STRING);
        bytes.extend_from_slice(&(s.len() as u32).to_be_bytes());
        bytes.extend_from_slice(s.as_bytes());
        Self::from_raw(SequenceType::one(ItemType::String), bytes)
    }

    pub fn boolean(v: bool) -> Self {
        Self::from_raw(
            SequenceType::one(ItemType::Boolean),
            vec![TAG_BOOLEAN, u8::from(v)],
        )
    }

    /// Type argument of `treat`/`cast`/`promote`.
    pub fn type_code(ty: SequenceType) -> Self {
        Self::integer(ty.code())
    }

    pub fn declared_type(&self) -> SequenceType {
        self.ty
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: FunctionId,
    pub args: Vec<Expr>,
    /// Set on algebricks calls: the XQuery function this call replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<FunctionId>,
    /// Set on aggregate calls split into (local, global) steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_step: Option<(FunctionId, FunctionId)>,
}

impl FunctionCall {
    pub fn new(function: FunctionId, args: Vec<Expr>) -> Self {
        Self {
            function,
            args,
            annotation: None,
            two_step: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Call(FunctionCall),
    Var(VarId),
    Constant(Constant),
}

impl Expr {
    pub fn call(function: FunctionId, args: Vec<Expr>) -> Expr {
        Expr::Call(FunctionCall::new(function, args))
    }

    pub fn var(v: VarId) -> Expr {
        Expr::Var(v)
    }

    pub fn string(s: &str) -> Expr {
        Expr::Constant(Constant::string(s))
    }

    pub fn integer(v: i64) -> Expr {
        Expr::Constant(Constant::integer(v))
    }

    pub fn boolean(v: bool) -> Expr {
        Expr::Constant(Constant::boolean(v))
    }

    pub fn type_arg(ty: SequenceType) -> Expr {
        Expr::Constant(Constant::type_code(ty))
    }

    pub fn as_call(&self) -> Option<&FunctionCall> {
        match self {
            Expr::Call(c) => Some(c),
            _ => None,
        }
    }

    /// The call if it invokes `function`.
    pub fn as_call_to(&self, function: FunctionId) -> Option<&FunctionCall> {
        self.as_call().filter(|c| c.function == function)
    }

    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Expr::Var(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expr::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn collect_variables(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Expr::Var(v) => {
                out.insert(*v);
            }
            Expr::Call(c) => c.args.iter().for_each(|a| a.collect_variables(out)),
            Expr::Constant(_) => {}
        }
    }

    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    pub fn count_references(&self, var: VarId) -> usize {
        match self {
            Expr::Var(v) => usize::from(*v == var),
            Expr::Call(c) => c.args.iter().map(|a| a.count_references(var)).sum(),
            Expr::Constant(_) => 0,
        }
    }

    /// Copy of `self` with every reference to `var` replaced by `with`.
    pub fn substitute(&self, var: VarId, with: &Expr) -> Expr {
        match self {
            Expr::Var(v) if *v == var => with.clone(),
            Expr::Call(c) => Expr::Call(FunctionCall {
                args: c.args.iter().map(|a| a.substitute(var, with)).collect(),
                ..c.clone()
            }),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Constant(c) => write!(f, "const<{}>", c.declared_type()),
            Expr::Call(c) => {
                write!(f, "{}(", c.function)?;
                for (i, a) in c.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}
