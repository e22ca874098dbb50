//! Decoded value tree — what [`crate::Runtime::decode`] returns and what
//! [`crate::Runtime::encode`] consumes.

use indexmap::IndexMap;
use num_bigint::BigInt;
use serde::Serialize;

use crate::cell::Cell;

/// A decoded (or to-be-encoded) datum. Plain machine integers use `Int`;
/// fields wider than 64 bits, `VarInteger`, and `Coins` use `Big` so no
/// precision is lost in either direction.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Record(Record),
    Int(i64),
    Big(#[serde(serialize_with = "serialize_bigint")] BigInt),
    Bool(bool),
    Bits(Vec<bool>),
    Text(String),
    Cell(#[serde(serialize_with = "serialize_cell")] Cell),
    Seq(Vec<Value>),
    Dict(IndexMap<i64, Value>),
    Null,
}

fn serialize_bigint<S: serde::Serializer>(n: &BigInt, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&n.to_string())
}

fn serialize_cell<S: serde::Serializer>(c: &Cell, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&c.to_base64())
}

/// A decoded constructor instance: which type/constructor it is, its named
/// fields in declaration order, and any anonymous fields' values (in
/// declaration order, field name suppressed per spec.md §3) so encoding can
/// write them back verbatim instead of fabricating placeholders.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub type_name: String,
    pub constructor: String,
    pub fields: IndexMap<String, Value>,
    pub anonymous: Vec<Value>,
}

impl Value {
    /// `type_name$constructor`-style discriminator, or `None` for
    /// non-record values (spec.md's "kind" lookups always go through
    /// `as_record`, this is a convenience accessor).
    pub fn kind(&self) -> Option<&str> {
        match self {
            Value::Record(r) => Some(&r.constructor),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
