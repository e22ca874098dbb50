//! Untyped-ish mirror of TL-B source syntax — the contract an external
//! parser is expected to hand back (spec.md §1: "provided by an external
//! parser returning a typed AST of types, constructors, fields, and
//! field-type nodes"). [`crate::schema::Model`] consumes this exclusively;
//! nothing downstream of `schema` ever sees TL-B syntax again.
//!
//! This crate ships its own parser ([`crate::parse`]) producing this AST,
//! since no published crate implements exactly this grammar, but the
//! boundary is kept as if it were a third party: `ast` has no dependency
//! on `parse` and could be fed by any other front end.

use crate::expr::Expr;

#[derive(Debug, Clone, PartialEq)]
pub struct AstSchema {
    pub types: Vec<AstType>,
    /// The RHS type name of the last declaration occurring in source text,
    /// in textual order — a decoding hint, not necessarily `types.last()`
    /// (constructors of the same type need not be textually adjacent).
    pub last_type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstType {
    pub name: String,
    pub constructors: Vec<AstConstructor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstConstructor {
    pub name: String,
    /// `None` means "no explicit tag" (`$_` or bare name with no `#`/`$`).
    pub tag: Option<AstTag>,
    pub params: Vec<AstParameter>,
    pub fields: Vec<AstField>,
    pub constraints: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AstTag {
    pub bit_len: u8,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstParameter {
    pub name: String,
    pub constant: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstField {
    /// Empty means anonymous.
    pub name: String,
    pub field_type: AstFieldType,
    /// Non-empty means "lives inside a new referenced cell".
    pub sub_fields: Vec<AstField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstFieldType {
    Number { bits: Expr, signed: bool },
    Bool { fixed: Option<bool> },
    Bits { bits: Expr },
    Named { name: String, arguments: Vec<AstFieldType> },
    Coins,
    Address,
    Cell,
    CellInside(Box<AstFieldType>),
    Hashmap { key_bits: Expr, value: Box<AstFieldType> },
    VarInteger { n: Expr, signed: bool },
    Multiple { times: Expr, item: Box<AstFieldType> },
    Cond { condition: Expr, item: Box<AstFieldType> },
    Tuple,
}
