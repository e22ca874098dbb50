//! A small, hand-written recursive-descent parser from TL-B source text to
//! [`AstSchema`]. This plays the role of the "external parser" the core
//! spec treats as a collaborator (spec.md §1) — it is isolated in its own
//! module and [`crate::schema::Model`] only ever sees its [`AstSchema`]
//! output, never raw source text.
//!
//! Grammar (informal):
//!
//! ```text
//! schema       := declaration*
//! declaration  := ident tag? param* field* constraint* '=' ident ';'
//! tag          := '$' ('_' | [01]+) | '#' ('_' | hexdigit+)
//! param        := '{' ident ':' paramtype '}'
//! constraint   := '{' expr '}'                     ; only once a field has been seen
//! field        := (ident ':')? fieldtype
//!               | (ident ':')? '^[' field* ']'      ; sub-field group, stored in referenced cell
//! fieldtype    := '#' digit*
//!               | '##' expr                         ; only valid parenthesized: (## expr)
//!               | '(' 'bits' expr ')'
//!               | '(' ('HashmapE'|'Hashmap') expr fieldtype ')'
//!               | '(' ('VarInteger'|'VarUInteger') expr ')'
//!               | '(' ('int'|'uint') expr ')'
//!               | 'int' digit+ | 'uint' digit+
//!               | 'Bool' | 'Coins' | 'Address' | 'Cell' | 'Tuple'
//!               | '^' fieldtype
//!               | ident '?' fieldtype                ; conditional field
//!               | ident ('(' fieldtype* ')')?         ; named reference, optionally parameterized
//! expr         := term (('+'|'-') term)*
//! term         := cmp
//! cmp          := sum (('='|'<>'|'<='|'<'|'>='|'>') sum)?
//! sum          := factor (('+'|'-') factor)*
//! factor       := atom (('*'|'/') atom)*
//! atom         := integer | ident | '(' expr ')'
//! ```

use crate::ast::{AstConstructor, AstField, AstFieldType, AstParameter, AstSchema, AstTag, AstType};
use crate::error::SchemaError;
use crate::expr::Expr;
use indexmap::IndexMap;

pub fn parse(src: &str) -> Result<AstSchema, SchemaError> {
    let mut p = Parser::new(src);
    p.parse_schema()
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<(), SchemaError> {
        self.skip_ws();
        if self.eat(c) {
            Ok(())
        } else {
            self.err(expected)
        }
    }

    fn err<T>(&self, expected: &'static str) -> Result<T, SchemaError> {
        match self.peek() {
            Some(c) => Err(SchemaError::UnexpectedToken {
                pos: self.pos,
                found: c.to_string(),
                expected,
            }),
            None => Err(SchemaError::UnexpectedEof { expected }),
        }
    }

    fn read_ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                self.pos += 1;
            }
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn read_digits(&mut self) -> Option<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    fn eof(&mut self) -> bool {
        self.skip_ws();
        self.peek().is_none()
    }

    // ---- top level -----------------------------------------------------

    fn parse_schema(&mut self) -> Result<AstSchema, SchemaError> {
        let mut types: IndexMap<String, AstType> = IndexMap::new();
        let mut last_type_name = String::new();
        while !self.eof() {
            let ctor = self.parse_declaration()?;
            self.skip_ws();
            self.expect('=', "'='")?;
            let type_name = self
                .read_ident()
                .ok_or(SchemaError::UnexpectedEof { expected: "type name" })?;
            self.skip_ws();
            self.expect(';', "';'")?;
            types
                .entry(type_name.clone())
                .or_insert_with(|| AstType {
                    name: type_name.clone(),
                    constructors: Vec::new(),
                })
                .constructors
                .push(ctor);
            last_type_name = type_name;
        }
        if types.is_empty() {
            return Err(SchemaError::Empty);
        }
        Ok(AstSchema {
            types: types.into_values().collect(),
            last_type_name,
        })
    }

    fn parse_declaration(&mut self) -> Result<AstConstructor, SchemaError> {
        self.skip_ws();
        let name = self
            .read_ident()
            .ok_or(SchemaError::UnexpectedEof { expected: "constructor name" })?;
        let tag = self.parse_tag_opt()?;

        let mut params = Vec::new();
        let mut fields = Vec::new();
        let mut constraints = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                Some('{') => {
                    if fields.is_empty() {
                        params.push(self.parse_param()?);
                    } else {
                        constraints.push(self.parse_constraint()?);
                    }
                }
                Some('=') | None => break,
                _ => fields.push(self.parse_field()?),
            }
        }

        Ok(AstConstructor {
            name,
            tag,
            params,
            fields,
            constraints,
        })
    }

    fn parse_tag_opt(&mut self) -> Result<Option<AstTag>, SchemaError> {
        match self.peek() {
            Some('$') => {
                self.pos += 1;
                if self.eat('_') {
                    return Ok(Some(AstTag { bit_len: 0, value: 0 }));
                }
                let start = self.pos;
                while matches!(self.peek(), Some('0') | Some('1')) {
                    self.pos += 1;
                }
                let bits: String = self.chars[start..self.pos].iter().collect();
                if bits.is_empty() {
                    return self.err("binary tag digits");
                }
                if bits.len() > 64 {
                    return Err(SchemaError::TagWidthOutOfRange(bits.len() as u32));
                }
                let value = u64::from_str_radix(&bits, 2).unwrap_or(0);
                Ok(Some(AstTag {
                    bit_len: bits.len() as u8,
                    value,
                }))
            }
            Some('#') => {
                self.pos += 1;
                if self.eat('_') {
                    return Ok(Some(AstTag { bit_len: 0, value: 0 }));
                }
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                    self.pos += 1;
                }
                let hex: String = self.chars[start..self.pos].iter().collect();
                if hex.is_empty() {
                    return self.err("hex tag digits");
                }
                let bit_len = hex.len() as u32 * 4;
                if bit_len > 64 {
                    return Err(SchemaError::TagWidthOutOfRange(bit_len));
                }
                let value = u64::from_str_radix(&hex, 16).unwrap_or(0);
                Ok(Some(AstTag {
                    bit_len: bit_len as u8,
                    value,
                }))
            }
            _ => Ok(None),
        }
    }

    fn parse_param(&mut self) -> Result<AstParameter, SchemaError> {
        self.expect('{', "'{'")?;
        self.skip_ws();
        let name = self
            .read_ident()
            .ok_or(SchemaError::UnexpectedEof { expected: "parameter name" })?;
        self.expect(':', "':'")?;
        self.skip_ws();
        // Parameter type: '#' (natural number) or a type identifier (polymorphic Type var).
        if self.peek() == Some('#') {
            self.pos += 1;
            let _ = self.read_digits();
        } else {
            let _ = self.read_ident();
        }
        self.expect('}', "'}'")?;
        Ok(AstParameter { name, constant: None })
    }

    fn parse_constraint(&mut self) -> Result<Expr, SchemaError> {
        self.expect('{', "'{'")?;
        let expr = self.parse_expr()?;
        self.expect('}', "'}'")?;
        Ok(expr)
    }

    fn parse_field(&mut self) -> Result<AstField, SchemaError> {
        self.skip_ws();
        let start = self.pos;
        let name = match self.read_ident() {
            Some(ident) => {
                self.skip_ws();
                if self.eat(':') {
                    ident
                } else {
                    self.pos = start;
                    String::new()
                }
            }
            None => String::new(),
        };

        self.skip_ws();
        if self.peek() == Some('^') && self.peek_at(1) == Some('[') {
            self.pos += 2;
            let mut sub_fields = Vec::new();
            loop {
                self.skip_ws();
                if self.eat(']') {
                    break;
                }
                sub_fields.push(self.parse_field()?);
            }
            return Ok(AstField {
                name,
                field_type: AstFieldType::Cell,
                sub_fields,
            });
        }

        let field_type = self.parse_field_type()?;
        Ok(AstField {
            name,
            field_type,
            sub_fields: Vec::new(),
        })
    }

    // ---- field types -----------------------------------------------------

    fn parse_field_type(&mut self) -> Result<AstFieldType, SchemaError> {
        self.skip_ws();
        match self.peek() {
            Some('^') => {
                self.pos += 1;
                let inner = self.parse_field_type()?;
                Ok(AstFieldType::CellInside(Box::new(inner)))
            }
            Some('#') => {
                self.pos += 1;
                if self.peek() == Some('#') {
                    return self.err("'(' before '##'");
                }
                match self.read_digits() {
                    Some(digits) => Ok(AstFieldType::Number {
                        bits: Expr::Lit(digits.parse().unwrap_or(0)),
                        signed: false,
                    }),
                    None => Ok(AstFieldType::Number {
                        bits: Expr::Lit(32),
                        signed: false,
                    }),
                }
            }
            Some('(') => {
                self.pos += 1;
                let ft = self.parse_parenthesized_field_type()?;
                self.expect(')', "')'")?;
                Ok(ft)
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.read_ident().unwrap();
                self.parse_field_type_keyword(&ident, false)
            }
            _ => self.err("field type"),
        }
    }

    fn parse_parenthesized_field_type(&mut self) -> Result<AstFieldType, SchemaError> {
        self.skip_ws();
        if self.peek() == Some('#') && self.peek_at(1) == Some('#') {
            self.pos += 2;
            let bits = self.parse_expr()?;
            return Ok(AstFieldType::Number { bits, signed: false });
        }
        if self.peek() == Some('^') {
            self.pos += 1;
            let inner = self.parse_field_type()?;
            return Ok(AstFieldType::CellInside(Box::new(inner)));
        }
        let ident = self
            .read_ident()
            .ok_or(SchemaError::UnexpectedEof { expected: "field type keyword" })?;
        self.parse_field_type_keyword(&ident, true)
    }

    /// `in_parens` tells the generic `Named` fallback whether to keep
    /// collecting trailing field-type arguments (only meaningful inside an
    /// already-open paren, where the caller consumes the matching `)`).
    fn parse_field_type_keyword(
        &mut self,
        ident: &str,
        in_parens: bool,
    ) -> Result<AstFieldType, SchemaError> {
        self.skip_ws();
        // Conditional field: `cond ? fieldtype`.
        if self.peek() == Some('?') {
            self.pos += 1;
            let item = self.parse_field_type()?;
            return Ok(AstFieldType::Cond {
                condition: Expr::Var(ident.to_string()),
                item: Box::new(item),
            });
        }

        match ident {
            "Bool" => return Ok(AstFieldType::Bool { fixed: None }),
            "Coins" => return Ok(AstFieldType::Coins),
            "Address" => return Ok(AstFieldType::Address),
            "Cell" => return Ok(AstFieldType::Cell),
            "Tuple" => return Ok(AstFieldType::Tuple),
            "bits" => {
                let bits = self.parse_expr()?;
                return Ok(AstFieldType::Bits { bits });
            }
            "HashmapE" | "Hashmap" => {
                let key_bits = self.parse_expr()?;
                let value = self.parse_field_type()?;
                return Ok(AstFieldType::Hashmap {
                    key_bits,
                    value: Box::new(value),
                });
            }
            "VarInteger" | "VarUInteger" => {
                let n = self.parse_expr()?;
                return Ok(AstFieldType::VarInteger {
                    n,
                    signed: ident == "VarInteger",
                });
            }
            "repeat" => {
                let times = self.parse_expr()?;
                let item = self.parse_field_type()?;
                return Ok(AstFieldType::Multiple {
                    times,
                    item: Box::new(item),
                });
            }
            "int" | "uint" => {
                let n = self.parse_expr()?;
                return Ok(AstFieldType::Number {
                    bits: n,
                    signed: ident == "int",
                });
            }
            _ => {}
        }

        if let Some(rest) = ident.strip_prefix("int") {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(AstFieldType::Number {
                    bits: Expr::Lit(rest.parse().unwrap_or(0)),
                    signed: true,
                });
            }
        }
        if let Some(rest) = ident.strip_prefix("uint") {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(AstFieldType::Number {
                    bits: Expr::Lit(rest.parse().unwrap_or(0)),
                    signed: false,
                });
            }
        }

        // Generic named reference, optionally parameterized: `Foo(Bar Baz)`
        // when not already inside an open paren, or `Foo Bar Baz` when we
        // are (so `HashmapAugE n X Y`-style invocations can be expressed).
        let mut arguments = Vec::new();
        self.skip_ws();
        if !in_parens && self.peek() == Some('(') {
            self.pos += 1;
            loop {
                self.skip_ws();
                if self.eat(')') {
                    break;
                }
                arguments.push(self.parse_field_type()?);
            }
        } else if in_parens {
            loop {
                self.skip_ws();
                if self.peek() == Some(')') || self.peek().is_none() {
                    break;
                }
                arguments.push(self.parse_field_type()?);
            }
        }
        Ok(AstFieldType::Named {
            name: ident.to_string(),
            arguments,
        })
    }

    // ---- expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, SchemaError> {
        let lhs = self.parse_sum()?;
        self.skip_ws();
        let op = self.peek_cmp_op();
        if let Some((op, len)) = op {
            self.pos += len;
            let rhs = self.parse_sum()?;
            return Ok(op(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    #[allow(clippy::type_complexity)]
    fn peek_cmp_op(&self) -> Option<(fn(Box<Expr>, Box<Expr>) -> Expr, usize)> {
        let two: String = self.chars[self.pos..(self.pos + 2).min(self.chars.len())]
            .iter()
            .collect();
        match two.as_str() {
            "<=" => return Some((Expr::Le as fn(_, _) -> _, 2)),
            ">=" => return Some((Expr::Ge as fn(_, _) -> _, 2)),
            "<>" => return Some((Expr::Ne as fn(_, _) -> _, 2)),
            _ => {}
        }
        match self.peek() {
            Some('=') => Some((Expr::Eq as fn(_, _) -> _, 1)),
            Some('<') => Some((Expr::Lt as fn(_, _) -> _, 1)),
            Some('>') => Some((Expr::Gt as fn(_, _) -> _, 1)),
            _ => None,
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, SchemaError> {
        let mut lhs = self.parse_factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some('-') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, SchemaError> {
        let mut lhs = self.parse_atom()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    let rhs = self.parse_atom()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some('/') => {
                    self.pos += 1;
                    let rhs = self.parse_atom()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_atom(&mut self) -> Result<Expr, SchemaError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(')', "')'")?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.read_digits().unwrap();
                Ok(Expr::Lit(digits.parse().unwrap_or(0)))
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.read_ident().unwrap();
                Ok(Expr::Var(ident))
            }
            _ => self.err("expression"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_zero_tag_constructors() {
        let schema = parse("a$0 = U; b$1 = U;").unwrap();
        assert_eq!(schema.types.len(), 1);
        let u = &schema.types[0];
        assert_eq!(u.name, "U");
        assert_eq!(u.constructors.len(), 2);
        assert_eq!(u.constructors[0].tag, Some(AstTag { bit_len: 1, value: 0 }));
        assert_eq!(u.constructors[1].tag, Some(AstTag { bit_len: 1, value: 1 }));
    }

    #[test]
    fn dependent_width() {
        let schema = parse("x$_ n:#5 v:(## n) = X;").unwrap();
        let x = &schema.types[0];
        let ctor = &x.constructors[0];
        assert_eq!(ctor.tag, Some(AstTag { bit_len: 0, value: 0 }));
        assert_eq!(ctor.fields[0].name, "n");
        assert_eq!(
            ctor.fields[0].field_type,
            AstFieldType::Number {
                bits: Expr::Lit(5),
                signed: false
            }
        );
        assert_eq!(ctor.fields[1].name, "v");
        assert_eq!(
            ctor.fields[1].field_type,
            AstFieldType::Number {
                bits: Expr::Var("n".into()),
                signed: false
            }
        );
    }

    #[test]
    fn constraint_block() {
        let schema = parse("pair n:#8 m:#8 { n + m = 10 } = Pair;").unwrap();
        let ctor = &schema.types[0].constructors[0];
        assert_eq!(ctor.tag, None);
        assert_eq!(ctor.fields.len(), 2);
        assert_eq!(ctor.constraints.len(), 1);
    }

    #[test]
    fn conditional_field() {
        let schema = parse("msg has:Bool body:has?(^Cell) = Msg;").unwrap();
        let ctor = &schema.types[0].constructors[0];
        assert_eq!(ctor.fields[1].name, "body");
        match &ctor.fields[1].field_type {
            AstFieldType::Cond { condition, item } => {
                assert_eq!(*condition, Expr::Var("has".into()));
                assert_eq!(**item, AstFieldType::CellInside(Box::new(AstFieldType::Cell)));
            }
            other => panic!("expected Cond, got {other:?}"),
        }
    }

    #[test]
    fn bits_field() {
        let schema = parse("lbl text:(bits 24) = L;").unwrap();
        let ctor = &schema.types[0].constructors[0];
        assert_eq!(
            ctor.fields[0].field_type,
            AstFieldType::Bits { bits: Expr::Lit(24) }
        );
    }

    #[test]
    fn hashmap_field() {
        let schema = parse("cfg m:(HashmapE 8 ^Cell) = Cfg;").unwrap();
        let ctor = &schema.types[0].constructors[0];
        match &ctor.fields[0].field_type {
            AstFieldType::Hashmap { key_bits, value } => {
                assert_eq!(*key_bits, Expr::Lit(8));
                assert_eq!(**value, AstFieldType::CellInside(Box::new(AstFieldType::Cell)));
            }
            other => panic!("expected Hashmap, got {other:?}"),
        }
    }

    #[test]
    fn empty_schema_is_error() {
        assert_eq!(parse("   // just a comment\n").unwrap_err(), SchemaError::Empty);
    }

    #[test]
    fn repeat_field() {
        let schema = parse("lst n:#8 items:(repeat n (## 8)) = Lst;").unwrap();
        let ctor = &schema.types[0].constructors[0];
        match &ctor.fields[1].field_type {
            AstFieldType::Multiple { times, item } => {
                assert_eq!(*times, Expr::Var("n".into()));
                assert_eq!(**item, AstFieldType::Number { bits: Expr::Lit(8), signed: false });
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn sub_field_group() {
        let schema = parse("rec extra:^[ a:#8 b:#8 ] = Rec;").unwrap();
        let ctor = &schema.types[0].constructors[0];
        assert_eq!(ctor.fields[0].name, "extra");
        assert_eq!(ctor.fields[0].sub_fields.len(), 2);
    }
}
