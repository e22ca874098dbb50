//! `Hashmap` / `HashmapE` dictionary codec (spec.md §4.E), following the
//! short/long/same label scheme common to every TON cell implementation.

use indexmap::IndexMap;

use crate::cell::{bits_to_represent, Cell, CellBuilder, CellSlice};
use crate::decode::{decode_field_type, DecodeCtx};
use crate::encode::{encode_field_type, EncodeCtx};
use crate::error::DataError;
use crate::expr::Env;
use crate::schema::{FieldType, Substitution};
use crate::value::Value;
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_hashmap(
    ctx: &DecodeCtx,
    slice: &mut CellSlice,
    n: u32,
    value_type: &FieldType,
    depth: u16,
    env: &Env,
    subst: &Substitution,
) -> Result<IndexMap<i64, Value>, DataError> {
    let non_empty = slice.read_bool()?;
    let mut out = IndexMap::new();
    if !non_empty {
        return Ok(out);
    }
    let root = slice.read_ref()?;
    let mut root_slice = CellSlice::new(root);
    decode_edge(ctx, &mut root_slice, n, Vec::new(), value_type, depth, env, subst, &mut out)?;
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn decode_edge(
    ctx: &DecodeCtx,
    slice: &mut CellSlice,
    n: u32,
    mut prefix: Vec<bool>,
    value_type: &FieldType,
    depth: u16,
    env: &Env,
    subst: &Substitution,
    out: &mut IndexMap<i64, Value>,
) -> Result<(), DataError> {
    let label = decode_label(slice, n)?;
    if label.len() as u32 > n {
        return Err(DataError::BadInput("dictionary label longer than remaining key bits".into()));
    }
    prefix.extend_from_slice(&label);
    let m = n - label.len() as u32;
    if m == 0 {
        // Per-entry isolation: each value decodes against its own copy of
        // the calling constructor's env, so sibling entries never see each
        // other's bindings, but a value type dependent on an outer-bound
        // field still resolves (spec.md §4.E Hashmap).
        let entry_env = env.fork();
        let value = decode_field_type(ctx, slice, value_type, &entry_env, depth + 1, subst)?;
        out.insert(bits_to_key(&prefix), value);
    } else {
        let left = slice.read_ref()?;
        let right = slice.read_ref()?;
        let mut left_slice = CellSlice::new(left);
        let mut left_prefix = prefix.clone();
        left_prefix.push(false);
        decode_edge(ctx, &mut left_slice, m - 1, left_prefix, value_type, depth + 1, env, subst, out)?;
        let mut right_slice = CellSlice::new(right);
        let mut right_prefix = prefix;
        right_prefix.push(true);
        decode_edge(ctx, &mut right_slice, m - 1, right_prefix, value_type, depth + 1, env, subst, out)?;
    }
    Ok(())
}

fn decode_label(slice: &mut CellSlice, m: u32) -> Result<Vec<bool>, DataError> {
    let kind = slice.read_bool()?;
    if !kind {
        // hml_short$0 len:(Unary ~n) s:(n * Bit)
        let mut len = 0u32;
        while slice.read_bool()? {
            len += 1;
        }
        slice.read_bits_vec(len as u64)
    } else {
        let long = !slice.read_bool()?;
        let len_bits = bits_to_represent(m as u64 + 1);
        if long {
            // hml_long$10 n:(#<= m) s:(n * Bit)
            let n = slice.read_uint(len_bits, "<hml_long_len>")?;
            slice.read_bits_vec(n)
        } else {
            // hml_same$11 v:Bit n:(#<= m)
            let v = slice.read_bool()?;
            let n = slice.read_uint(len_bits, "<hml_same_len>")?;
            Ok(vec![v; n as usize])
        }
    }
}

/// Keys are signed big-integers of the declared width (spec.md §4.E); bits
/// are two's-complement, so a set top bit needs sign-extension above the
/// key's own width rather than being read as unsigned magnitude.
fn bits_to_key(bits: &[bool]) -> i64 {
    let n = bits.len() as u32;
    let raw = bits.iter().fold(0i64, |acc, b| (acc << 1) | (*b as i64));
    if n > 0 && n < 64 && bits[0] {
        raw - (1i64 << n)
    } else {
        raw
    }
}

fn key_to_bits(key: i64, n: u32) -> Vec<bool> {
    (0..n).map(|i| (key >> (n - 1 - i)) & 1 == 1).collect()
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_hashmap(
    ctx: &EncodeCtx,
    builder: &mut CellBuilder,
    n: u32,
    entries: &IndexMap<i64, Value>,
    value_type: &FieldType,
    depth: u16,
    env: &Env,
    subst: &Substitution,
) -> Result<(), DataError> {
    if entries.is_empty() {
        return builder.write_bit(false);
    }
    builder.write_bit(true)?;
    let items: Vec<(Vec<bool>, &Value)> = entries
        .iter()
        .map(|(k, v)| (key_to_bits(*k, n), v))
        .collect();
    let refs: Vec<(Vec<bool>, &Value)> = items;
    let root = encode_edge(ctx, &refs, n, value_type, depth, env, subst)?;
    builder.add_ref(root)
}

#[allow(clippy::too_many_arguments)]
fn encode_edge(
    ctx: &EncodeCtx,
    entries: &[(Vec<bool>, &Value)],
    n: u32,
    value_type: &FieldType,
    depth: u16,
    env: &Env,
    subst: &Substitution,
) -> Result<Arc<Cell>, DataError> {
    let mut b = CellBuilder::new();
    let l = common_prefix_len(entries, n);
    write_label_short(&mut b, &entries[0].0[..l as usize])?;
    let m = n - l;
    if m == 0 {
        // See decode_edge: each entry gets its own fork of the calling
        // constructor's env.
        let entry_env = env.fork();
        encode_field_type(ctx, &mut b, value_type, entries[0].1, &entry_env, depth + 1, subst)?;
    } else {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for (bits, value) in entries {
            let rest = bits[l as usize + 1..].to_vec();
            if bits[l as usize] {
                right.push((rest, *value));
            } else {
                left.push((rest, *value));
            }
        }
        let left_cell = encode_edge(ctx, &left, m - 1, value_type, depth + 1, env, subst)?;
        let right_cell = encode_edge(ctx, &right, m - 1, value_type, depth + 1, env, subst)?;
        b.add_ref(left_cell)?;
        b.add_ref(right_cell)?;
    }
    b.finish()
}

fn common_prefix_len(entries: &[(Vec<bool>, &Value)], cap: u32) -> u32 {
    if entries.len() <= 1 {
        return cap;
    }
    let first = &entries[0].0;
    let mut len = cap as usize;
    for (bits, _) in &entries[1..] {
        let mut shared = 0;
        while shared < len && shared < bits.len() && bits[shared] == first[shared] {
            shared += 1;
        }
        len = len.min(shared);
    }
    len as u32
}

fn write_label_short(b: &mut CellBuilder, label: &[bool]) -> Result<(), DataError> {
    b.write_bit(false)?;
    for _ in 0..label.len() {
        b.write_bit(true)?;
    }
    b.write_bit(false)?;
    b.write_bits(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::schema::Model;
    use crate::tag_index::TagIndex;

    fn no_subst() -> Substitution<'static> {
        static EMPTY: std::sync::OnceLock<IndexMap<String, usize>> = std::sync::OnceLock::new();
        Substitution::new(EMPTY.get_or_init(IndexMap::new), &[])
    }

    #[test]
    fn round_trip_small_dict() {
        let model = Model::from_ast(&parse("cfg m:(HashmapE 8 ^Cell) = Cfg;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let dctx = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let ectx = EncodeCtx { model: &model };

        let mut entries = IndexMap::new();
        entries.insert(1i64, Value::Cell((*Cell::leaf(vec![0xAB], 8).unwrap()).clone()));
        entries.insert(200i64, Value::Cell((*Cell::leaf(vec![0xCD], 8).unwrap()).clone()));

        let value_type = FieldType::CellInside(Box::new(FieldType::Cell));
        let mut b = CellBuilder::new();
        encode_hashmap(&ectx, &mut b, 8, &entries, &value_type, 0, &Env::new(), &no_subst()).unwrap();
        let cell = b.finish().unwrap();

        let mut s = CellSlice::new(cell);
        let decoded = decode_hashmap(&dctx, &mut s, 8, &value_type, 0, &Env::new(), &no_subst()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.contains_key(&1));
        assert!(decoded.contains_key(&200));
    }

    #[test]
    fn empty_dict_round_trips() {
        let model = Model::from_ast(&parse("cfg m:(HashmapE 8 ^Cell) = Cfg;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let dctx = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let ectx = EncodeCtx { model: &model };
        let entries: IndexMap<i64, Value> = IndexMap::new();
        let value_type = FieldType::CellInside(Box::new(FieldType::Cell));
        let mut b = CellBuilder::new();
        encode_hashmap(&ectx, &mut b, 8, &entries, &value_type, 0, &Env::new(), &no_subst()).unwrap();
        let cell = b.finish().unwrap();
        let mut s = CellSlice::new(cell);
        let decoded = decode_hashmap(&dctx, &mut s, 8, &value_type, 0, &Env::new(), &no_subst()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn negative_key_round_trips_as_signed() {
        let model = Model::from_ast(&parse("cfg m:(HashmapE 8 ^Cell) = Cfg;").unwrap()).unwrap();
        let index = TagIndex::build(&model).unwrap();
        let dctx = DecodeCtx {
            model: &model,
            tag_index: &index,
            auto_text: false,
        };
        let ectx = EncodeCtx { model: &model };

        let mut entries = IndexMap::new();
        entries.insert(-5i64, Value::Cell((*Cell::leaf(vec![0xAB], 8).unwrap()).clone()));

        let value_type = FieldType::CellInside(Box::new(FieldType::Cell));
        let mut b = CellBuilder::new();
        encode_hashmap(&ectx, &mut b, 8, &entries, &value_type, 0, &Env::new(), &no_subst()).unwrap();
        let cell = b.finish().unwrap();

        let mut s = CellSlice::new(cell);
        let decoded = decode_hashmap(&dctx, &mut s, 8, &value_type, 0, &Env::new(), &no_subst()).unwrap();
        assert!(decoded.contains_key(&-5));
    }
}
