//! Minimal VM-tuple codec.
//!
//! TVM stack tuples have no single canonical cell encoding; this crate
//! uses one fixed convention for the `Tuple` field type: a single
//! reference cell holding an 8-bit length prefix followed by that many
//! 64-bit integers.

use std::sync::Arc;

use crate::cell::{Cell, CellBuilder, CellSlice};
use crate::error::DataError;
use crate::value::Value;

pub fn decode_tuple(slice: &mut CellSlice) -> Result<Value, DataError> {
    let r = slice.read_ref()?;
    let mut inner = CellSlice::new(r);
    let len = inner.read_uint(8, "<tuple_len>")?;
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(Value::Int(inner.read_uint(64, "<tuple_item>")? as i64));
    }
    Ok(Value::Seq(items))
}

pub fn encode_tuple(items: &[Value]) -> Result<Arc<Cell>, DataError> {
    let mut b = CellBuilder::new();
    b.write_uint(8, items.len() as u64)?;
    for v in items {
        let n = v
            .as_int()
            .ok_or_else(|| DataError::UnsupportedFieldType("tuple item is not an integer".into()))?;
        b.write_uint(64, n as u64)?;
    }
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let items = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let cell = encode_tuple(&items).unwrap();
        let mut b = CellBuilder::new();
        b.add_ref(cell).unwrap();
        let root = b.finish().unwrap();
        let mut s = CellSlice::new(root);
        let decoded = decode_tuple(&mut s).unwrap();
        match decoded {
            Value::Seq(v) => assert_eq!(
                v.iter().map(|x| x.as_int().unwrap()).collect::<Vec<_>>(),
                vec![1, 2, 3]
            ),
            other => panic!("expected Seq, got {other:?}"),
        }
    }
}
