//! Encoder: the inverse of [`crate::decode`]. Builds a cell tree from a
//! [`Value`] tree by walking the same compiled [`Model`] (spec.md §4.F).
//!
//! Anonymous fields contribute their decoded value to `Record::anonymous`
//! in declaration order (spec.md §3), so encoding reads them back from
//! there positionally. A record built by hand without that vector filled
//! in falls back to a zero-valued placeholder of the correct shape.

use std::sync::Arc;

use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::cell::{Cell, CellBuilder};
use crate::decode::RECURSION_LIMIT;
use crate::dict;
use crate::error::DataError;
use crate::expr::Env;
use crate::schema::{Constructor, Field, FieldType, Model, Substitution, Type};
use crate::tuple;
use crate::value::{Record, Value};

pub(crate) struct EncodeCtx<'m> {
    pub model: &'m Model,
}

pub(crate) fn encode_root(ctx: &EncodeCtx, value: &Value) -> Result<Arc<Cell>, DataError> {
    let record = value.as_record().ok_or(DataError::NotTyped)?;
    encode_type(ctx, &record.type_name, record, 0)
}

pub(crate) fn encode_type(
    ctx: &EncodeCtx,
    type_name: &str,
    record: &Record,
    depth: u16,
) -> Result<Arc<Cell>, DataError> {
    let ty = ctx
        .model
        .get(type_name)
        .ok_or_else(|| DataError::UnknownType(type_name.to_string()))?;
    let ctor = resolve_constructor(ty, &record.constructor)?;
    let mut builder = CellBuilder::new();
    encode_constructor_into(ctx, &mut builder, ctor, record, depth, &[])?;
    builder.finish()
}

fn resolve_constructor<'t>(ty: &'t Type, name: &str) -> Result<&'t Constructor, DataError> {
    if let Some(c) = ty.constructor_by_name(name) {
        return Ok(c);
    }
    let stripped = name.trim_start_matches('_');
    ty.constructors
        .iter()
        .find(|c| c.name.trim_start_matches('_') == stripped)
        .ok_or_else(|| DataError::UnknownConstructor {
            type_name: ty.name.clone(),
            constructor: name.to_string(),
        })
}

/// `true` for TL-B's generic type-parameter placeholder spellings: a
/// single uppercase letter, `Any`, `Arg`, or any capitalized word
/// optionally ending in `Type` (spec.md §4.F). A field typed this way
/// names a constructor parameter rather than a concrete schema type, so
/// encoding it dispatches on the supplied value's own type instead.
fn is_generic_placeholder(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    let rest = chars.as_str();
    let rest = rest.strip_suffix("Type").unwrap_or(rest);
    rest.chars().all(|c| c.is_ascii_alphabetic())
}

fn encode_constructor_into(
    ctx: &EncodeCtx,
    builder: &mut CellBuilder,
    ctor: &Constructor,
    record: &Record,
    depth: u16,
    args: &[FieldType],
) -> Result<(), DataError> {
    if ctor.tag.bit_len > 0 {
        builder.write_uint(ctor.tag.bit_len as u32, ctor.tag.value)?;
    }
    let subst = Substitution::new(&ctor.param_index, args);
    let mut env = Env::new();
    let mut anon_idx = 0usize;
    for field in &ctor.fields {
        encode_field(
            ctx,
            builder,
            field,
            &record.fields,
            &record.anonymous,
            &mut anon_idx,
            &mut env,
            depth,
            &subst,
        )?;
    }
    for constraint in &ctor.constraints {
        if !constraint.eval_truthy(&env)? {
            return Err(DataError::ConstraintFailed(ctor.name.clone()));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_field(
    ctx: &EncodeCtx,
    builder: &mut CellBuilder,
    field: &Field,
    fields: &IndexMap<String, Value>,
    anonymous: &[Value],
    anon_idx: &mut usize,
    env: &mut Env,
    depth: u16,
    subst: &Substitution,
) -> Result<(), DataError> {
    if field.has_sub_fields() {
        let group = if field.is_anonymous() {
            let v = anonymous.get(*anon_idx);
            *anon_idx += 1;
            v
        } else {
            fields.get(&field.name)
        };
        let group = match group {
            Some(Value::Record(r)) => Some(r),
            Some(_) => return Err(DataError::BadInput(format!("field `{}` is not a group", field.name))),
            None => None,
        };
        let mut sub_idx = 0usize;
        for sf in &field.sub_fields {
            match group {
                Some(r) => encode_field(ctx, builder, sf, &r.fields, &r.anonymous, &mut sub_idx, env, depth, subst)?,
                None => encode_zero_field(ctx, builder, sf, env, depth, subst)?,
            }
        }
        return Ok(());
    }

    if field.is_anonymous() {
        let value = anonymous.get(*anon_idx);
        *anon_idx += 1;
        return match value {
            Some(value) => encode_field_type(ctx, builder, &field.field_type, value, env, depth, subst),
            None => encode_zero_field_type(ctx, builder, &field.field_type, env, depth, subst),
        };
    }

    let value = fields
        .get(&field.name)
        .ok_or_else(|| DataError::BadInput(format!("missing field `{}`", field.name)))?;
    encode_field_type(ctx, builder, &field.field_type, value, env, depth, subst)?;
    if let Some(n) = crate::decode::value_as_int(value) {
        env.bind(field.name.clone(), n);
    }
    Ok(())
}

fn value_to_bigint(v: &Value) -> Result<BigInt, DataError> {
    match v {
        Value::Int(n) => Ok(BigInt::from(*n)),
        Value::Big(b) => Ok(b.clone()),
        Value::Bool(b) => Ok(BigInt::from(*b as i64)),
        other => Err(DataError::UnsupportedFieldType(format!(
            "expected an integer value, found {other:?}"
        ))),
    }
}

pub(crate) fn encode_field_type(
    ctx: &EncodeCtx,
    builder: &mut CellBuilder,
    ft: &FieldType,
    value: &Value,
    env: &Env,
    depth: u16,
    subst: &Substitution,
) -> Result<(), DataError> {
    match ft {
        FieldType::Number { bits, signed } => {
            let width = bits.eval(env)?;
            if width < 0 {
                return Err(DataError::BadInput(format!("negative bit width {width}")));
            }
            builder.write_bigint(width as u64, &value_to_bigint(value)?, *signed)
        }
        FieldType::Bool { .. } => {
            let b = value.as_bool().ok_or_else(|| {
                DataError::UnsupportedFieldType(format!("expected bool, found {value:?}"))
            })?;
            builder.write_bit(b)
        }
        FieldType::Bits { bits } => {
            let width = bits.eval(env)? as u64;
            match value {
                Value::Bits(v) if v.len() as u64 == width => builder.write_bits(v),
                Value::Bits(v) => Err(DataError::BadInput(format!(
                    "bits field expects {width} bits, value has {}",
                    v.len()
                ))),
                Value::Text(s) => {
                    let packed = crate::cell::unpack_bits(s.as_bytes());
                    if packed.len() as u64 != width {
                        return Err(DataError::BadInput(format!(
                            "bits field expects {width} bits, text `{s}` encodes {}",
                            packed.len()
                        )));
                    }
                    builder.write_bits(&packed)
                }
                other => Err(DataError::UnsupportedFieldType(format!(
                    "expected bits or text, found {other:?}"
                ))),
            }
        }
        FieldType::Named { name, arguments } => {
            if name == "Bool" {
                let b = value.as_bool().ok_or(DataError::NotTyped)?;
                return builder.write_bit(b);
            }
            if let Some(&idx) = subst.params.get(name) {
                // Bare reference to this constructor's own type parameter:
                // substitute the caller's bound argument before encoding.
                let bound = subst.args.get(idx).cloned().ok_or_else(|| {
                    DataError::BadInput(format!("missing type argument for parameter `{name}`"))
                })?;
                return encode_field_type(ctx, builder, &bound, value, env, depth, subst);
            }
            if let Some(ty) = ctx.model.get(name) {
                let record = value.as_record().ok_or(DataError::NotTyped)?;
                let ctor = resolve_constructor(ty, &record.constructor)?;
                let resolved_args: Vec<FieldType> = arguments.iter().map(|a| subst.resolve_arg(a)).collect();
                return encode_constructor_into(ctx, builder, ctor, record, depth + 1, &resolved_args);
            }
            if is_generic_placeholder(name) {
                // No match: the field is silently skipped rather than
                // erroring (spec.md §4.F).
                return match value.as_record().and_then(|r| ctx.model.get(&r.type_name).map(|ty| (ty, r))) {
                    Some((ty, record)) => {
                        let ctor = resolve_constructor(ty, &record.constructor)?;
                        encode_constructor_into(ctx, builder, ctor, record, depth + 1, &[])
                    }
                    None => Ok(()),
                };
            }
            Err(DataError::UnknownType(name.clone()))
        }
        FieldType::Coins => builder.write_var_int(16, &value_to_bigint(value)?, false),
        FieldType::Address => {
            let s = value
                .as_text()
                .ok_or_else(|| DataError::UnsupportedFieldType(format!("expected address text, found {value:?}")))?;
            builder.write_address(s)
        }
        FieldType::Cell => match value {
            Value::Cell(c) => builder.add_ref(Arc::new(c.clone())),
            Value::Text(s) => builder.add_ref(build_text_cell(s)?),
            other => Err(DataError::UnsupportedFieldType(format!(
                "expected cell or text, found {other:?}"
            ))),
        },
        // See the matching decode.rs collapse: `^Cell` is a direct
        // reference, not a reference to a wrapper cell.
        FieldType::CellInside(inner) if matches!(**inner, FieldType::Cell) => {
            encode_field_type(ctx, builder, inner, value, env, depth, subst)
        }
        FieldType::CellInside(inner) => {
            let mut nested = CellBuilder::new();
            encode_field_type(ctx, &mut nested, inner, value, env, depth + 1, subst)?;
            builder.add_ref(nested.finish()?)
        }
        FieldType::Hashmap { key_bits, value: value_type } => {
            let n = key_bits.eval(env)?;
            if n < 0 {
                return Err(DataError::BadInput(format!("negative hashmap key width {n}")));
            }
            let map = match value {
                Value::Dict(m) => m,
                other => {
                    return Err(DataError::UnsupportedFieldType(format!(
                        "expected dictionary, found {other:?}"
                    )))
                }
            };
            dict::encode_hashmap(ctx, builder, n as u32, map, value_type, depth, env, subst)
        }
        FieldType::VarInteger { n, signed } => {
            let bound = n.eval(env)?;
            if bound < 0 {
                return Err(DataError::BadInput(format!("negative VarInteger bound {bound}")));
            }
            builder.write_var_int(bound as u64, &value_to_bigint(value)?, *signed)
        }
        FieldType::Multiple { times, item } => {
            let count = times.eval(env)?;
            if count < 0 {
                return Err(DataError::BadInput(format!("negative repeat count {count}")));
            }
            let items = match value {
                Value::Seq(v) => v,
                other => return Err(DataError::UnsupportedFieldType(format!("expected sequence, found {other:?}"))),
            };
            if items.len() as i64 != count {
                return Err(DataError::BadInput(format!(
                    "repeat count {count} does not match {} supplied values",
                    items.len()
                )));
            }
            for item_value in items {
                encode_field_type(ctx, builder, item, item_value, env, depth, subst)?;
            }
            Ok(())
        }
        FieldType::Cond { condition, item } => {
            if condition.eval_truthy(env)? {
                if matches!(value, Value::Null) {
                    return Err(DataError::BadInput("conditional field is true but value is null".into()));
                }
                encode_field_type(ctx, builder, item, value, env, depth, subst)
            } else {
                Ok(())
            }
        }
        FieldType::Tuple => {
            let items = match value {
                Value::Seq(v) => v.clone(),
                other => return Err(DataError::UnsupportedFieldType(format!("expected tuple, found {other:?}"))),
            };
            builder.add_ref(tuple::encode_tuple(&items)?)
        }
    }
}

fn encode_zero_field(
    ctx: &EncodeCtx,
    builder: &mut CellBuilder,
    field: &Field,
    env: &mut Env,
    depth: u16,
    subst: &Substitution,
) -> Result<(), DataError> {
    if field.has_sub_fields() {
        for sf in &field.sub_fields {
            encode_zero_field(ctx, builder, sf, env, depth, subst)?;
        }
        return Ok(());
    }
    encode_zero_field_type(ctx, builder, &field.field_type, env, depth, subst)
}

fn encode_zero_field_type(
    ctx: &EncodeCtx,
    builder: &mut CellBuilder,
    ft: &FieldType,
    env: &Env,
    depth: u16,
    subst: &Substitution,
) -> Result<(), DataError> {
    if depth >= RECURSION_LIMIT {
        return Err(DataError::RecursionLimit {
            type_name: "<anonymous>".into(),
            limit: RECURSION_LIMIT,
        });
    }
    match ft {
        FieldType::Number { bits, signed } => {
            let width = bits.eval(env)? as u64;
            builder.write_bigint(width, &BigInt::from(0), *signed)
        }
        FieldType::Bool { fixed } => builder.write_bit(fixed.unwrap_or(false)),
        FieldType::Bits { bits } => {
            let width = bits.eval(env)? as u64;
            builder.write_bits(&vec![false; width as usize])
        }
        FieldType::Named { name, arguments } => {
            if name == "Bool" {
                return builder.write_bit(false);
            }
            if let Some(&idx) = subst.params.get(name) {
                let bound = subst.args.get(idx).cloned().ok_or_else(|| {
                    DataError::BadInput(format!("missing type argument for parameter `{name}`"))
                })?;
                return encode_zero_field_type(ctx, builder, &bound, env, depth, subst);
            }
            let ty = match ctx.model.get(name) {
                Some(ty) => ty,
                None if is_generic_placeholder(name) => return Ok(()),
                None => return Err(DataError::UnknownType(name.clone())),
            };
            let ctor = ty.constructors.first().ok_or_else(|| DataError::UnknownConstructor {
                type_name: name.clone(),
                constructor: String::new(),
            })?;
            if ctor.tag.bit_len > 0 {
                builder.write_uint(ctor.tag.bit_len as u32, ctor.tag.value)?;
            }
            let resolved_args: Vec<FieldType> = arguments.iter().map(|a| subst.resolve_arg(a)).collect();
            let nested_subst = Substitution::new(&ctor.param_index, &resolved_args);
            let mut inner_env = Env::new();
            for f in &ctor.fields {
                encode_zero_field(ctx, builder, f, &mut inner_env, depth + 1, &nested_subst)?;
            }
            Ok(())
        }
        FieldType::Coins => builder.write_var_int(16, &BigInt::from(0), false),
        FieldType::Address => builder.write_address("none"),
        FieldType::Cell => builder.add_ref(Cell::leaf(Vec::new(), 0)?),
        FieldType::CellInside(inner) if matches!(**inner, FieldType::Cell) => {
            encode_zero_field_type(ctx, builder, inner, env, depth, subst)
        }
        FieldType::CellInside(inner) => {
            let mut nested = CellBuilder::new();
            encode_zero_field_type(ctx, &mut nested, inner, env, depth + 1, subst)?;
            builder.add_ref(nested.finish()?)
        }
        FieldType::Hashmap { .. } => builder.write_bit(false),
        FieldType::VarInteger { n, signed } => {
            let bound = n.eval(env)? as u64;
            builder.write_var_int(bound, &BigInt::from(0), *signed)
        }
        FieldType::Multiple { times, item } => {
            let count = times.eval(env)?;
            for _ in 0..count.max(0) {
                encode_zero_field_type(ctx, builder, item, env, depth + 1, subst)?;
            }
            Ok(())
        }
        FieldType::Cond { condition, item } => {
            if condition.eval_truthy(env)? {
                encode_zero_field_type(ctx, builder, item, env, depth + 1, subst)
            } else {
                Ok(())
            }
        }
        FieldType::Tuple => builder.add_ref(tuple::encode_tuple(&[])?),
    }
}

fn build_text_cell(s: &str) -> Result<Arc<Cell>, DataError> {
    const CHUNK: usize = 127;
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return Cell::leaf(Vec::new(), 0);
    }
    let chunks: Vec<&[u8]> = bytes.chunks(CHUNK).collect();
    let mut tail: Option<Arc<Cell>> = None;
    for chunk in chunks.iter().rev() {
        let mut b = CellBuilder::new();
        for &byte in *chunk {
            b.write_uint(8, byte as u64)?;
        }
        if let Some(t) = tail.take() {
            b.add_ref(t)?;
        }
        tail = Some(b.finish()?);
    }
    Ok(tail.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellSlice;
    use crate::decode::{decode_root, DecodeCtx};
    use crate::parse::parse;
    use crate::schema::Model;
    use crate::tag_index::TagIndex;

    #[test]
    fn round_trips_tagged_union() {
        let model = Model::from_ast(&parse("a$0 = U; b$1 = U;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let ectx = EncodeCtx { model: &model };
        let dctx = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };

        let record = Record {
            type_name: "U".into(),
            constructor: "b".into(),
            fields: IndexMap::new(),
            anonymous: Vec::new(),
        };
        let cell = encode_type(&ectx, "U", &record, 0).unwrap();
        let mut slice = CellSlice::new(cell);
        let decoded = decode_root(&dctx, &mut slice, true).unwrap();
        assert_eq!(decoded.kind(), Some("b"));
    }

    #[test]
    fn constraint_violation_is_rejected_on_encode() {
        let model = Model::from_ast(&parse("pair n:#8 m:#8 { n + m = 10 } = Pair;").unwrap()).unwrap();
        let ectx = EncodeCtx { model: &model };
        let mut fields = IndexMap::new();
        fields.insert("n".to_string(), Value::Int(3));
        fields.insert("m".to_string(), Value::Int(8));
        let record = Record {
            type_name: "Pair".into(),
            constructor: "pair".into(),
            fields,
            anonymous: Vec::new(),
        };
        let err = encode_type(&ectx, "Pair", &record, 0).unwrap_err();
        assert!(matches!(err, DataError::ConstraintFailed(_)));
    }
}
