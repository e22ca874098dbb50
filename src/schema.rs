//! Immutable in-memory schema model — built once from an [`AstSchema`] and
//! never mutated again (the concurrency claim in spec.md §5 depends on
//! this).

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::{AstConstructor, AstField, AstFieldType, AstSchema, AstTag};
use crate::error::SchemaError;
use crate::expr::Expr;

/// The bit-prefix that disambiguates constructors of one TL-B type.
/// `bit_len == 0` means "no tag bits consumed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub bit_len: u8,
    pub value: u64,
}

impl Tag {
    pub const NONE: Tag = Tag { bit_len: 0, value: 0 };

    fn from_ast(ast: Option<AstTag>) -> Self {
        match ast {
            Some(t) => Tag {
                bit_len: t.bit_len,
                value: t.value,
            },
            None => Tag::NONE,
        }
    }
}

/// A constructor-level variable participating in polymorphism and in
/// dependent-type expressions.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub constant: Option<i64>,
}

/// A named, positionally-ordered component of a constructor. An empty
/// `name` means the field is anonymous. Non-empty `sub_fields` means the
/// field's children live inside a newly referenced cell rather than
/// in-line.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub sub_fields: Vec<Field>,
}

impl Field {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn has_sub_fields(&self) -> bool {
        !self.sub_fields.is_empty()
    }
}

/// Tagged union of field shapes, mirroring spec.md §3.
#[derive(Debug, Clone)]
pub enum FieldType {
    Number { bits: Expr, signed: bool },
    Bool { fixed: Option<bool> },
    Bits { bits: Expr },
    Named { name: String, arguments: Vec<FieldType> },
    Coins,
    Address,
    Cell,
    CellInside(Box<FieldType>),
    Hashmap { key_bits: Expr, value: Box<FieldType> },
    VarInteger { n: Expr, signed: bool },
    Multiple { times: Expr, item: Box<FieldType> },
    Cond { condition: Expr, item: Box<FieldType> },
    Tuple,
}

/// A constructor's type-parameter scope during decode/encode: which of its
/// declared [`Parameter`]s are bound (by position, via
/// [`Constructor::param_index`]) and the concrete [`FieldType`]s the
/// caller supplied for them. Built fresh per constructor attempt from that
/// constructor's own `param_index` plus whatever `args` its caller passed
/// (empty at the root, where nothing bound anything).
#[derive(Clone, Copy)]
pub struct Substitution<'a> {
    pub params: &'a IndexMap<String, usize>,
    pub args: &'a [FieldType],
}

impl<'a> Substitution<'a> {
    pub fn new(params: &'a IndexMap<String, usize>, args: &'a [FieldType]) -> Self {
        Substitution { params, args }
    }

    /// Resolves a type argument through this scope: if `ft` is itself a
    /// bare reference to one of *this* scope's parameters, returns the
    /// caller-bound concrete type instead, so a parameter passed through
    /// unchanged from an outer constructor still reaches the callee bound.
    pub fn resolve_arg(&self, ft: &FieldType) -> FieldType {
        if let FieldType::Named { name, arguments } = ft {
            if arguments.is_empty() {
                if let Some(&idx) = self.params.get(name) {
                    if let Some(bound) = self.args.get(idx) {
                        return bound.clone();
                    }
                }
            }
        }
        ft.clone()
    }
}

/// One alternative of a sum type: a tag, parameters, fields and
/// constraints.
#[derive(Debug, Clone)]
pub struct Constructor {
    pub name: String,
    pub tag: Tag,
    pub params: Vec<Parameter>,
    pub param_index: IndexMap<String, usize>,
    pub fields: Vec<Field>,
    pub constraints: Vec<Expr>,
}

/// A TL-B type: a name and its ordered list of constructors.
#[derive(Debug, Clone)]
pub struct Type {
    pub name: String,
    pub constructors: Vec<Constructor>,
}

impl Type {
    pub fn is_union(&self) -> bool {
        self.constructors.len() > 1
    }

    pub fn constructor_by_name(&self, name: &str) -> Option<&Constructor> {
        self.constructors.iter().find(|c| c.name == name)
    }
}

/// The compiled, read-only schema model: every [`Type`] by name, plus the
/// decoding hint recorded at compile time (spec.md §4.C).
#[derive(Debug, Clone)]
pub struct Model {
    pub types: IndexMap<String, Type>,
    pub last_type_name: String,
}

impl Model {
    pub fn from_ast(ast: &AstSchema) -> Result<Self, SchemaError> {
        let type_names: HashSet<&str> = ast.types.iter().map(|t| t.name.as_str()).collect();

        let mut types = IndexMap::new();
        for ast_type in &ast.types {
            let mut constructors = Vec::with_capacity(ast_type.constructors.len());
            for ast_ctor in &ast_type.constructors {
                constructors.push(convert_constructor(ast_ctor, &type_names)?);
            }
            types.insert(
                ast_type.name.clone(),
                Type {
                    name: ast_type.name.clone(),
                    constructors,
                },
            );
        }

        Ok(Model {
            types,
            last_type_name: ast.last_type_name.clone(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }
}

fn convert_constructor(
    ast: &AstConstructor,
    type_names: &HashSet<&str>,
) -> Result<Constructor, SchemaError> {
    let mut param_index = IndexMap::new();
    let params = ast
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            param_index.insert(p.name.clone(), i);
            Parameter {
                name: p.name.clone(),
                constant: p.constant,
            }
        })
        .collect();

    let known: HashSet<&str> = ast.params.iter().map(|p| p.name.as_str()).collect();
    let mut bound: HashSet<String> = known.iter().map(|s| s.to_string()).collect();

    let mut fields = Vec::with_capacity(ast.fields.len());
    for ast_field in &ast.fields {
        fields.push(convert_field(ast_field, &ast.name, type_names, &bound)?);
        if !ast_field.name.is_empty() {
            bound.insert(ast_field.name.clone());
        }
    }

    Ok(Constructor {
        name: ast.name.clone(),
        tag: Tag::from_ast(ast.tag),
        params,
        param_index,
        fields,
        constraints: ast.constraints.clone(),
    })
}

fn convert_field(
    ast: &AstField,
    ctor_name: &str,
    type_names: &HashSet<&str>,
    bound: &HashSet<String>,
) -> Result<Field, SchemaError> {
    if !ast.sub_fields.is_empty() {
        let mut sub_bound = bound.clone();
        let mut sub_fields = Vec::with_capacity(ast.sub_fields.len());
        for sf in &ast.sub_fields {
            sub_fields.push(convert_field(sf, ctor_name, type_names, &sub_bound)?);
            if !sf.name.is_empty() {
                sub_bound.insert(sf.name.clone());
            }
        }
        return Ok(Field {
            name: ast.name.clone(),
            field_type: FieldType::Cell,
            sub_fields,
        });
    }

    let field_type = convert_field_type(&ast.field_type, ctor_name, &ast.name, type_names, bound)?;
    Ok(Field {
        name: ast.name.clone(),
        field_type,
        sub_fields: Vec::new(),
    })
}

fn convert_field_type(
    ast: &AstFieldType,
    ctor_name: &str,
    field_name: &str,
    type_names: &HashSet<&str>,
    bound: &HashSet<String>,
) -> Result<FieldType, SchemaError> {
    Ok(match ast {
        AstFieldType::Number { bits, signed } => {
            check_expr_vars(bits, ctor_name, field_name, bound)?;
            FieldType::Number {
                bits: bits.clone(),
                signed: *signed,
            }
        }
        AstFieldType::Bool { fixed } => FieldType::Bool { fixed: *fixed },
        AstFieldType::Bits { bits } => {
            check_expr_vars(bits, ctor_name, field_name, bound)?;
            FieldType::Bits { bits: bits.clone() }
        }
        AstFieldType::Named { name, arguments } => {
            if name != "Bool" && !bound.contains(name) && !type_names.contains(name.as_str()) {
                return Err(SchemaError::UnknownType(name.clone()));
            }
            let arguments = arguments
                .iter()
                .map(|a| convert_field_type(a, ctor_name, field_name, type_names, bound))
                .collect::<Result<Vec<_>, _>>()?;
            FieldType::Named {
                name: name.clone(),
                arguments,
            }
        }
        AstFieldType::Coins => FieldType::Coins,
        AstFieldType::Address => FieldType::Address,
        AstFieldType::Cell => FieldType::Cell,
        AstFieldType::CellInside(inner) => FieldType::CellInside(Box::new(convert_field_type(
            inner, ctor_name, field_name, type_names, bound,
        )?)),
        AstFieldType::Hashmap { key_bits, value } => {
            check_expr_vars(key_bits, ctor_name, field_name, bound)?;
            FieldType::Hashmap {
                key_bits: key_bits.clone(),
                value: Box::new(convert_field_type(value, ctor_name, field_name, type_names, bound)?),
            }
        }
        AstFieldType::VarInteger { n, signed } => {
            check_expr_vars(n, ctor_name, field_name, bound)?;
            FieldType::VarInteger {
                n: n.clone(),
                signed: *signed,
            }
        }
        AstFieldType::Multiple { times, item } => {
            check_expr_vars(times, ctor_name, field_name, bound)?;
            FieldType::Multiple {
                times: times.clone(),
                item: Box::new(convert_field_type(item, ctor_name, field_name, type_names, bound)?),
            }
        }
        AstFieldType::Cond { condition, item } => {
            check_expr_vars(condition, ctor_name, field_name, bound)?;
            FieldType::Cond {
                condition: condition.clone(),
                item: Box::new(convert_field_type(item, ctor_name, field_name, type_names, bound)?),
            }
        }
        AstFieldType::Tuple => FieldType::Tuple,
    })
}

/// Invariant 3 (spec.md §3): expressions may only reference variables
/// bound earlier in the same constructor.
fn check_expr_vars(
    expr: &Expr,
    ctor_name: &str,
    field_name: &str,
    bound: &HashSet<String>,
) -> Result<(), SchemaError> {
    match expr {
        Expr::Lit(_) => Ok(()),
        Expr::Var(name) => {
            if bound.contains(name) {
                Ok(())
            } else {
                Err(SchemaError::UnknownVariable {
                    constructor: ctor_name.to_string(),
                    field: field_name.to_string(),
                    var: name.clone(),
                })
            }
        }
        Expr::Add(a, b)
        | Expr::Sub(a, b)
        | Expr::Mul(a, b)
        | Expr::Div(a, b)
        | Expr::Eq(a, b)
        | Expr::Ne(a, b)
        | Expr::Lt(a, b)
        | Expr::Le(a, b)
        | Expr::Gt(a, b)
        | Expr::Ge(a, b) => {
            check_expr_vars(a, ctor_name, field_name, bound)?;
            check_expr_vars(b, ctor_name, field_name, bound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn model(src: &str) -> Model {
        Model::from_ast(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn single_constructor_is_not_a_union() {
        let m = model("x$_ n:#8 = X;");
        assert!(!m.get("X").unwrap().is_union());
    }

    #[test]
    fn multi_constructor_is_a_union() {
        let m = model("a$0 = U; b$1 = U;");
        assert!(m.get("U").unwrap().is_union());
        assert_eq!(m.last_type_name, "U");
    }

    #[test]
    fn unknown_type_reference_is_rejected() {
        let err = Model::from_ast(&parse("x$_ f:NoSuchType = X;").unwrap()).unwrap_err();
        assert_eq!(err, SchemaError::UnknownType("NoSuchType".into()));
    }

    #[test]
    fn forward_reference_is_allowed() {
        let m = model("a f:B = A; b$_ = B;");
        assert!(m.get("A").is_some());
        assert!(m.get("B").is_some());
    }

    #[test]
    fn unbound_variable_in_width_is_rejected() {
        let err = Model::from_ast(&parse("x$_ v:(## n) = X;").unwrap()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownVariable {
                constructor: "x".into(),
                field: "v".into(),
                var: "n".into()
            }
        );
    }

    #[test]
    fn parameter_is_a_bound_named_reference() {
        // `X` used in param braces binds a type-parameter name usable as a
        // field's Named reference before any field declares it.
        let m = model("wrap {X:Type} inner:X = Wrap;");
        let ctor = &m.get("Wrap").unwrap().constructors[0];
        assert_eq!(ctor.param_index.get("X"), Some(&0));
    }
}
