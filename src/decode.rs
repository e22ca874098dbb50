//! Recursive-descent decoder: walks a compiled [`Model`] against a
//! [`CellSlice`], attempting constructors in order and rolling back on
//! mismatch (spec.md §4.E).

use indexmap::IndexMap;

use crate::cell::CellSlice;
use crate::dict;
use crate::error::DataError;
use crate::expr::Env;
use crate::schema::{Constructor, Field, FieldType, Model, Substitution, Type};
use crate::tag_index::TagIndex;
use crate::tuple;
use crate::value::{Record, Value};

pub const RECURSION_LIMIT: u16 = 256;

pub(crate) struct DecodeCtx<'m> {
    pub model: &'m Model,
    pub tag_index: &'m TagIndex,
    pub auto_text: bool,
}

/// Root decode entry point. `by_tag` prefers reading a prefix tag against
/// the schema-wide tag index; otherwise (or when no tag matches) it falls
/// back to `model.last_type_name`, then every other type in lexicographic
/// order of name — types with at least one tagged constructor before
/// tag-less types — until one succeeds (spec.md §4.E "root selection").
pub(crate) fn decode_root(ctx: &DecodeCtx, slice: &mut CellSlice, by_tag: bool) -> Result<Value, DataError> {
    if by_tag && !ctx.tag_index.is_empty() {
        if let Some(value) = try_decode_by_tag(ctx, slice, 0)? {
            return Ok(value);
        }
    }

    let checkpoint = slice.position();
    if let Ok(record) = decode_type_by_name(ctx, slice, &ctx.model.last_type_name, 0, None, &[]) {
        return Ok(Value::Record(record));
    }
    slice.restore(checkpoint);

    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    for (name, ty) in &ctx.model.types {
        if name == &ctx.model.last_type_name {
            continue;
        }
        if ty.constructors.iter().any(|c| c.tag.bit_len > 0) {
            tagged.push(name.as_str());
        } else {
            untagged.push(name.as_str());
        }
    }
    tagged.sort_unstable();
    untagged.sort_unstable();

    let mut attempts = 1usize;
    for name in tagged.into_iter().chain(untagged) {
        attempts += 1;
        let checkpoint = slice.position();
        match decode_type_by_name(ctx, slice, name, 0, None, &[]) {
            Ok(record) => return Ok(Value::Record(record)),
            Err(_) => slice.restore(checkpoint),
        }
    }
    Err(DataError::NoRootMatch { attempts })
}

/// Tries every tag width the index knows about, shortest first, without
/// permanently consuming bits until one matches.
fn try_decode_by_tag(ctx: &DecodeCtx, slice: &mut CellSlice, depth: u16) -> Result<Option<Value>, DataError> {
    for bit_len in 1..=ctx.tag_index.max_tag_bits {
        if slice.remaining_bits() < bit_len as usize {
            continue;
        }
        let checkpoint = slice.position();
        let value = slice.read_uint(bit_len as u32, "<tag>")?;
        slice.restore(checkpoint);
        if let Some(entry) = ctx.tag_index.lookup(bit_len, value) {
            let ty = ctx
                .model
                .get(&entry.type_name)
                .ok_or_else(|| DataError::UnknownType(entry.type_name.clone()))?;
            let ctor = &ty.constructors[entry.constructor_index];
            let record = decode_constructor(ctx, slice, &ty.name, ctor, depth, None, &[])?;
            return Ok(Some(Value::Record(record)));
        }
    }
    Ok(None)
}

/// `args` binds this type's own constructor parameters (positionally) when
/// it's being decoded as the resolution of a `Named` field that supplied
/// type arguments, e.g. the `X` in `wrap (Wrap X) = ...` (spec.md §4.F).
pub(crate) fn decode_type_by_name(
    ctx: &DecodeCtx,
    slice: &mut CellSlice,
    type_name: &str,
    depth: u16,
    parent_env: Option<&Env>,
    args: &[FieldType],
) -> Result<Record, DataError> {
    if depth >= RECURSION_LIMIT {
        return Err(DataError::RecursionLimit {
            type_name: type_name.to_string(),
            limit: RECURSION_LIMIT,
        });
    }
    let ty: &Type = ctx
        .model
        .get(type_name)
        .ok_or_else(|| DataError::UnknownType(type_name.to_string()))?;

    let mut attempts = 0usize;
    for ctor in &ty.constructors {
        let checkpoint = slice.position();
        attempts += 1;
        match decode_constructor(ctx, slice, &ty.name, ctor, depth, parent_env, args) {
            Ok(record) => return Ok(record),
            Err(_) => slice.restore(checkpoint),
        }
    }
    Err(DataError::NoMatch {
        type_name: type_name.to_string(),
        attempts,
    })
}

fn decode_constructor(
    ctx: &DecodeCtx,
    slice: &mut CellSlice,
    type_name: &str,
    ctor: &Constructor,
    depth: u16,
    parent_env: Option<&Env>,
    args: &[FieldType],
) -> Result<Record, DataError> {
    if ctor.tag.bit_len > 0 {
        if slice.remaining_bits() < ctor.tag.bit_len as usize {
            return Err(DataError::TagShort {
                bit_len: ctor.tag.bit_len,
            });
        }
        let found = slice.read_uint(ctor.tag.bit_len as u32, "<tag>")?;
        if found != ctor.tag.value {
            return Err(DataError::TagMismatch {
                bit_len: ctor.tag.bit_len,
                expected: ctor.tag.value,
                found,
            });
        }
    }

    let subst = Substitution::new(&ctor.param_index, args);
    let mut env = parent_env.cloned().unwrap_or_default();
    let mut fields = IndexMap::new();
    let mut anonymous = Vec::new();
    for field in &ctor.fields {
        let value = decode_field(ctx, slice, field, &mut env, depth, &subst)?;
        if field.is_anonymous() {
            anonymous.push(value);
        } else {
            if let Some(n) = value_as_int(&value) {
                env.bind(field.name.clone(), n);
            }
            fields.insert(field.name.clone(), value);
        }
    }

    for constraint in &ctor.constraints {
        if !constraint.eval_truthy(&env)? {
            return Err(DataError::ConstraintFailed(ctor.name.clone()));
        }
    }

    Ok(Record {
        type_name: type_name.to_string(),
        constructor: ctor.name.clone(),
        fields,
        anonymous,
    })
}

fn decode_field(
    ctx: &DecodeCtx,
    slice: &mut CellSlice,
    field: &Field,
    env: &mut Env,
    depth: u16,
    subst: &Substitution,
) -> Result<Value, DataError> {
    if field.has_sub_fields() {
        let mut fields = IndexMap::new();
        let mut anonymous = Vec::new();
        for sf in &field.sub_fields {
            let value = decode_field(ctx, slice, sf, env, depth, subst)?;
            if sf.is_anonymous() {
                anonymous.push(value);
            } else {
                if let Some(n) = value_as_int(&value) {
                    env.bind(sf.name.clone(), n);
                }
                fields.insert(sf.name.clone(), value);
            }
        }
        return Ok(Value::Record(Record {
            type_name: String::new(),
            constructor: field.name.clone(),
            fields,
            anonymous,
        }));
    }
    decode_field_type(ctx, slice, &field.field_type, env, depth, subst)
}

pub(crate) fn decode_field_type(
    ctx: &DecodeCtx,
    slice: &mut CellSlice,
    ft: &FieldType,
    env: &Env,
    depth: u16,
    subst: &Substitution,
) -> Result<Value, DataError> {
    Ok(match ft {
        FieldType::Number { bits, signed } => {
            let n = bits.eval(env)?;
            if n < 0 {
                return Err(DataError::BadInput(format!("negative bit width {n}")));
            }
            let n = n as u64;
            if n > 64 {
                Value::Big(slice.read_bigint(n, *signed, "<number>")?)
            } else {
                let raw = slice.read_uint(n as u32, "<number>")?;
                let v = if *signed && n > 0 && n < 64 && (raw & (1 << (n - 1))) != 0 {
                    raw as i64 - (1i64 << n)
                } else {
                    raw as i64
                };
                Value::Int(v)
            }
        }
        FieldType::Bool { fixed } => match fixed {
            Some(b) => Value::Bool(*b),
            None => Value::Bool(slice.read_bool()?),
        },
        FieldType::Bits { bits } => {
            let n = bits.eval(env)? as u64;
            let raw = slice.read_bits_vec(n)?;
            if ctx.auto_text && n > 0 && n % 8 == 0 {
                match String::from_utf8(crate::cell::pack_bits(&raw)) {
                    Ok(text) => Value::Text(text),
                    Err(_) => Value::Bits(raw),
                }
            } else {
                Value::Bits(raw)
            }
        }
        FieldType::Named { name, arguments } => {
            if name == "Bool" {
                Value::Bool(slice.read_bool()?)
            } else if let Some(&idx) = subst.params.get(name) {
                // Bare reference to this constructor's own type parameter:
                // substitute the caller's bound argument before decoding.
                let bound = subst.args.get(idx).cloned().ok_or_else(|| {
                    DataError::BadInput(format!("missing type argument for parameter `{name}`"))
                })?;
                decode_field_type(ctx, slice, &bound, env, depth, subst)?
            } else {
                let resolved_args: Vec<FieldType> =
                    arguments.iter().map(|a| subst.resolve_arg(a)).collect();
                Value::Record(decode_type_by_name(ctx, slice, name, depth + 1, None, &resolved_args)?)
            }
        }
        FieldType::Coins => Value::Big(slice.read_var_int(16, false)?),
        FieldType::Address => Value::Text(slice.read_address()?),
        FieldType::Cell => {
            let r = slice.read_ref()?;
            if ctx.auto_text {
                if let Some(text) = try_decode_snake_text(&r) {
                    Value::Text(text)
                } else {
                    Value::Cell((*r).clone())
                }
            } else {
                Value::Cell((*r).clone())
            }
        }
        // `^Cell` is a direct reference to an opaque cell; collapse rather
        // than wrap it in an extra layer so `cond?(^Cell)` produces exactly
        // one ref, not a ref-to-a-ref.
        FieldType::CellInside(inner) if matches!(**inner, FieldType::Cell) => {
            decode_field_type(ctx, slice, inner, env, depth, subst)?
        }
        FieldType::CellInside(inner) => {
            let r = slice.read_ref()?;
            let mut inner_slice = CellSlice::new(r);
            decode_field_type(ctx, &mut inner_slice, inner, env, depth + 1, subst)?
        }
        FieldType::Hashmap { key_bits, value } => {
            let n = key_bits.eval(env)?;
            if n < 0 {
                return Err(DataError::BadInput(format!("negative hashmap key width {n}")));
            }
            Value::Dict(dict::decode_hashmap(ctx, slice, n as u32, value, depth, env, subst)?)
        }
        FieldType::VarInteger { n, signed } => {
            let bound = n.eval(env)?;
            if bound < 0 {
                return Err(DataError::BadInput(format!("negative VarInteger bound {bound}")));
            }
            Value::Big(slice.read_var_int(bound as u64, *signed)?)
        }
        FieldType::Multiple { times, item } => {
            let count = times.eval(env)?;
            if count < 0 {
                return Err(DataError::BadInput(format!("negative repeat count {count}")));
            }
            let mut seq = Vec::with_capacity(count as usize);
            for _ in 0..count {
                seq.push(decode_field_type(ctx, slice, item, env, depth, subst)?);
            }
            Value::Seq(seq)
        }
        FieldType::Cond { condition, item } => {
            if condition.eval_truthy(env)? {
                decode_field_type(ctx, slice, item, env, depth, subst)?
            } else {
                Value::Null
            }
        }
        FieldType::Tuple => tuple::decode_tuple(slice)?,
    })
}

fn try_decode_snake_text(root: &std::sync::Arc<crate::cell::Cell>) -> Option<String> {
    let mut bytes = Vec::new();
    let mut current = root.clone();
    loop {
        if current.bit_len() % 8 != 0 {
            return None;
        }
        let mut s = CellSlice::new(current.clone());
        for _ in 0..(current.bit_len() / 8) {
            bytes.push(s.read_uint(8, "<text_byte>").ok()? as u8);
        }
        if current.references().is_empty() {
            break;
        }
        current = current.references()[0].clone();
    }
    String::from_utf8(bytes).ok()
}

pub(crate) fn value_as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(*b as i64),
        Value::Big(b) => {
            use num_traits::ToPrimitive;
            b.to_i64()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;
    use crate::parse::parse;
    use crate::schema::Model;

    #[test]
    fn two_zero_tag_constructors_select_by_prefix() {
        let model = Model::from_ast(&parse("a$0 = U; b$1 = U;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let ctx = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let mut b = CellBuilder::new();
        b.write_bit(true).unwrap();
        let cell = b.finish().unwrap();
        let mut slice = CellSlice::new(cell);
        let value = decode_root(&ctx, &mut slice, true).unwrap();
        assert_eq!(value.kind(), Some("b"));
    }

    #[test]
    fn dependent_width_reads_v_sized_by_n() {
        let model = Model::from_ast(&parse("x$_ n:#5 v:(## n) = X;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let c = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let mut b = CellBuilder::new();
        b.write_uint(5, 9).unwrap();
        b.write_uint(9, 300).unwrap();
        let cell = b.finish().unwrap();
        let mut slice = CellSlice::new(cell);
        let value = decode_root(&c, &mut slice, false).unwrap();
        let record = value.as_record().unwrap();
        assert_eq!(record.field("n").unwrap().as_int(), Some(9));
        assert_eq!(record.field("v").unwrap().as_int(), Some(300));
    }

    #[test]
    fn constraint_failure_rejects_constructor() {
        let model = Model::from_ast(&parse("pair n:#8 m:#8 { n + m = 10 } = Pair;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let c = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let mut b = CellBuilder::new();
        b.write_uint(8, 3).unwrap();
        b.write_uint(8, 9).unwrap();
        let cell = b.finish().unwrap();
        let mut slice = CellSlice::new(cell);
        let err = decode_root(&c, &mut slice, false).unwrap_err();
        assert!(matches!(err, DataError::NoMatch { .. }));
    }

    #[test]
    fn conditional_field_is_skipped_when_false() {
        let model = Model::from_ast(&parse("msg has:Bool body:has?(^Cell) = Msg;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let c = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let mut b = CellBuilder::new();
        b.write_bit(false).unwrap();
        let cell = b.finish().unwrap();
        let mut slice = CellSlice::new(cell);
        let value = decode_root(&c, &mut slice, false).unwrap();
        let record = value.as_record().unwrap();
        assert!(matches!(record.field("body").unwrap(), Value::Null));
    }
}
