//! Sequence types, the quantifier lattice, and the type-system interface.
//!
//! The full static type checker lives outside this crate; the rewriter only
//! needs subtype tests, type-code lookup, and constant decoding.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Occurrence indicator of a sequence type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quantifier {
    Zero,
    One,
    Optional,
    Star,
    Plus,
}

impl Quantifier {
    const ALL: [Quantifier; 5] = [
        Quantifier::Zero,
        Quantifier::One,
        Quantifier::Optional,
        Quantifier::Star,
        Quantifier::Plus,
    ];

    /// Lattice order: ONE < OPTIONAL, ONE < PLUS, OPTIONAL < STAR, PLUS < STAR,
    /// ZERO < OPTIONAL < STAR.
    pub fn is_sub_quantifier_of(self, other: Quantifier) -> bool {
        use Quantifier::*;
        match (self, other) {
            (a, b) if a == b => true,
            (_, Star) => true,
            (One, Optional) | (One, Plus) | (Zero, Optional) => true,
            _ => false,
        }
    }

    fn code(self) -> i64 {
        self as i64
    }

    fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|q| q.code() == code)
    }

    fn suffix(self) -> &'static str {
        match self {
            Quantifier::Zero | Quantifier::One => "",
            Quantifier::Optional => "?",
            Quantifier::Star => "*",
            Quantifier::Plus => "+",
        }
    }
}

/// Item types known to the rewriter, arranged in a single-inheritance tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    AnyItem,
    AnyNode,
    Document,
    Element,
    Attribute,
    Text,
    AnyAtomic,
    UntypedAtomic,
    String,
    Boolean,
    Numeric,
    Decimal,
    Integer,
    Double,
    Float,
}

impl ItemType {
    const ALL: [ItemType; 15] = [
        ItemType::AnyItem,
        ItemType::AnyNode,
        ItemType::Document,
        ItemType::Element,
        ItemType::Attribute,
        ItemType::Text,
        ItemType::AnyAtomic,
        ItemType::UntypedAtomic,
        ItemType::String,
        ItemType::Boolean,
        ItemType::Numeric,
        ItemType::Decimal,
        ItemType::Integer,
        ItemType::Double,
        ItemType::Float,
    ];

    pub fn parent(self) -> Option<ItemType> {
        use ItemType::*;
        match self {
            AnyItem => None,
            AnyNode | AnyAtomic => Some(AnyItem),
            Document | Element | Attribute | Text => Some(AnyNode),
            UntypedAtomic | String | Boolean | Numeric => Some(AnyAtomic),
            Decimal | Double | Float => Some(Numeric),
            Integer => Some(Decimal),
        }
    }

    pub fn is_subtype_of(self, other: ItemType) -> bool {
        let mut cur = Some(self);
        while let Some(t) = cur {
            if t == other {
                return true;
            }
            cur = t.parent();
        }
        false
    }

    pub fn is_atomic(self) -> bool {
        self.is_subtype_of(ItemType::AnyAtomic)
    }

    pub fn is_node(self) -> bool {
        self.is_subtype_of(ItemType::AnyNode)
    }

    pub fn name(self) -> &'static str {
        use ItemType::*;
        match self {
            AnyItem => "item()",
            AnyNode => "node()",
            Document => "document-node()",
            Element => "element()",
            Attribute => "attribute()",
            Text => "text()",
            AnyAtomic => "xs:anyAtomicType",
            UntypedAtomic => "xs:untypedAtomic",
            String => "xs:string",
            Boolean => "xs:boolean",
            Numeric => "xs:numeric",
            Decimal => "xs:decimal",
            Integer => "xs:integer",
            Double => "xs:double",
            Float => "xs:float",
        }
    }

    fn code(self) -> i64 {
        self as i64
    }

    fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceType {
    pub item: ItemType,
    pub quantifier: Quantifier,
}

impl SequenceType {
    pub const fn new(item: ItemType, quantifier: Quantifier) -> Self {
        Self { item, quantifier }
    }
    pub const fn one(item: ItemType) -> Self {
        Self::new(item, Quantifier::One)
    }
    pub const fn optional(item: ItemType) -> Self {
        Self::new(item, Quantifier::Optional)
    }
    pub const fn star(item: ItemType) -> Self {
        Self::new(item, Quantifier::Star)
    }
    pub const fn plus(item: ItemType) -> Self {
        Self::new(item, Quantifier::Plus)
    }
    pub const fn empty() -> Self {
        Self::new(ItemType::AnyItem, Quantifier::Zero)
    }

    pub fn with_quantifier(self, quantifier: Quantifier) -> Self {
        Self { quantifier, ..self }
    }

    /// Integer code used by `treat`/`cast`/`promote` type arguments and
    /// resolved through `TypeSystem::lookup_sequence_type`.
    pub fn code(self) -> i64 {
        (self.item.code() << 3) | self.quantifier.code()
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quantifier == Quantifier::Zero {
            return write!(f, "empty-sequence()");
        }
        write!(f, "{}{}", self.item.name(), self.quantifier.suffix())
    }
}

/// Decoded value of an opaque constant blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantValue {
    Integer(i64),
    String(String),
    Boolean(bool),
}

pub(crate) const TAG_INTEGER: u8 = 0x01;
pub(crate) const TAG_STRING: u8 = 0x02;
pub(crate) const TAG_BOOLEAN: u8 = 0x03;

/// Query interface of the static type system.
pub trait TypeSystem {
    /// Resolve a type code carried by a constant argument.
    fn lookup_sequence_type(&self, code: i64) -> Result<SequenceType>;

    /// Quantifier-lattice subtype test.
    fn is_subtype(&self, sub: &SequenceType, sup: &SequenceType) -> bool;

    /// Decode a constant blob as its declared type.
    fn decode_constant(&self, constant: &crate::expr::Constant) -> Result<ConstantValue>;
}

/// Default type system over the built-in item hierarchy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTypeSystem;

impl TypeSystem for BuiltinTypeSystem {
    fn lookup_sequence_type(&self, code: i64) -> Result<SequenceType> {
        let item = ItemType::from_code(code >> 3).ok_or(Error::UnknownType(code))?;
        let quantifier = Quantifier::from_code(code & 0b111).ok_or(Error::UnknownType(code))?;
        Ok(SequenceType::new(item, quantifier))
    }

    fn is_subtype(&self, sub: &SequenceType, sup: &SequenceType) -> bool {
        if !sub.quantifier.is_sub_quantifier_of(sup.quantifier) {
            return false;
        }
        // The empty sequence matches any item type.
        sub.quantifier == Quantifier::Zero || sub.item.is_subtype_of(sup.item)
    }

    fn decode_constant(&self, constant: &crate::expr::Constant) -> Result<ConstantValue> {
        let bytes = constant.bytes();
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| Error::MalformedConstant("empty constant blob".into()))?;
        let value = match *tag {
            TAG_INTEGER => {
                let raw: [u8; 8] = body.try_into().map_err(|_| {
                    Error::MalformedConstant(format!("integer body of {} bytes", body.len()))
                })?;
                ConstantValue::Integer(i64::from_be_bytes(raw))
            }
            TAG_STRING => {
                if body.len() < 4 {
                    return Err(Error::MalformedConstant("truncated string length".into()));
                }
                let (len, rest) = body.split_at(4);
                let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
                if rest.len() != len {
                    return Err(Error::MalformedConstant(format!(
                        "string length {} but {} bytes follow",
                        len,
                        rest.len()
                    )));
                }
                let s = std::str::from_utf8(rest)
                    .map_err(|e| Error::MalformedConstant(e.to_string()))?;
                ConstantValue::String(s.to_string())
            }
            TAG_BOOLEAN => match body {
                [0] => ConstantValue::Boolean(false),
                [1] => ConstantValue::Boolean(true),
                _ => return Err(Error::MalformedConstant("boolean body".into())),
            },
            other => {
                return Err(Error::MalformedConstant(format!("unknown tag 0x{other:02x}")));
            }
        };

        let declared = constant.declared_type().item;
        let fits = match &value {
            ConstantValue::Integer(_) => declared.is_subtype_of(ItemType::Numeric),
            ConstantValue::String(_) => {
                declared.is_subtype_of(ItemType::String) || declared == ItemType::UntypedAtomic
            }
            ConstantValue::Boolean(_) => declared == ItemType::Boolean,
        };
        if !fits {
            return Err(Error::MalformedConstant(format!(
                "{:?} does not decode as declared type {}",
                value,
                constant.declared_type()
            )));
        }
        Ok(value)
    }
}
