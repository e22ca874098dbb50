//! Public façade (spec.md §4.G): [`compile`] turns TL-B source into a
//! [`Runtime`], which then decodes and encodes data against it.

use std::sync::Arc;

use crate::cell::{Cell, CellSlice};
use crate::decode::{self, DecodeCtx};
use crate::encode::{self, EncodeCtx};
use crate::error::{DataError, SchemaError};
use crate::parse;
use crate::schema::Model;
use crate::tag_index::TagIndex;
use crate::value::{Record, Value};

/// Compiles TL-B source into an immutable, `Send + Sync` [`Runtime`].
/// Parses the source, builds the [`Model`], and indexes every
/// constructor tag — all of the work that only needs to happen once.
pub fn compile(source: &str) -> Result<Runtime, SchemaError> {
    let ast = parse::parse(source)?;
    let model = Model::from_ast(&ast)?;
    let tag_index = TagIndex::build(&model)?;
    Ok(Runtime { model, tag_index })
}

/// Where the bits to decode come from.
pub enum DecodeInput<'a> {
    Base64(&'a str),
    Bytes(&'a [u8]),
    Cell(&'a Cell),
}

impl<'a> DecodeInput<'a> {
    fn into_cell(self) -> Result<Arc<Cell>, DataError> {
        match self {
            DecodeInput::Base64(s) => Cell::from_base64(s),
            DecodeInput::Bytes(b) => Cell::leaf(b.to_vec(), b.len() * 8),
            DecodeInput::Cell(c) => Ok(Arc::new(c.clone())),
        }
    }
}

/// `by_tag` tries the schema-wide tag index first; `auto_text` opts into
/// best-effort UTF-8 detection for bare `Cell` fields. `by_tag` defaults
/// off (spec.md §4.E's entry point is `decode(bytes_or_cell, by_tag: bool
/// = false)`); `auto_text` defaults on.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub by_tag: bool,
    pub auto_text: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            by_tag: false,
            auto_text: true,
        }
    }
}

/// A compiled schema. Cheap to share across threads: nothing about it is
/// mutated after [`compile`] returns.
#[derive(Debug)]
pub struct Runtime {
    model: Model,
    tag_index: TagIndex,
}

impl Runtime {
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Decodes `input` into a [`Value`], selecting the root type either by
    /// matching a constructor tag or by falling back to the schema's last
    /// declared type name.
    pub fn decode(&self, input: DecodeInput, opts: DecodeOptions) -> Result<Value, DataError> {
        let root = input.into_cell()?;
        let mut slice = CellSlice::new(root);
        let ctx = DecodeCtx {
            model: &self.model,
            tag_index: &self.tag_index,
            auto_text: opts.auto_text,
        };
        decode::decode_root(&ctx, &mut slice, opts.by_tag)
    }

    /// Decodes `input` against a specific named type, trying its
    /// constructors in declaration order, ignoring the tag index.
    pub fn decode_by_type(&self, input: DecodeInput, type_name: &str, opts: DecodeOptions) -> Result<Value, DataError> {
        let root = input.into_cell()?;
        let mut slice = CellSlice::new(root);
        let ctx = DecodeCtx {
            model: &self.model,
            tag_index: &self.tag_index,
            auto_text: opts.auto_text,
        };
        decode::decode_type_by_name(&ctx, &mut slice, type_name, 0, None, &[]).map(Value::Record)
    }

    /// Convenience wrapper for decoding a raw, ref-less bit string — handy
    /// for tests and for schemas that never use cell references.
    pub fn decode_bits(&self, bytes: &[u8], bit_len: usize, by_tag: bool) -> Result<Value, DataError> {
        let root = Cell::leaf(bytes.to_vec(), bit_len)?;
        self.decode(
            DecodeInput::Cell(&root),
            DecodeOptions {
                by_tag,
                auto_text: true,
            },
        )
    }

    /// Encodes a decoded [`Value::Record`] back into a cell, using the
    /// record's own `type_name` to pick the schema type.
    pub fn encode(&self, value: &Value) -> Result<Arc<Cell>, DataError> {
        let ctx = EncodeCtx { model: &self.model };
        encode::encode_root(&ctx, value)
    }

    /// Encodes `record` against an explicitly named type, independent of
    /// whatever `record.type_name` says.
    pub fn encode_by_type(&self, type_name: &str, record: &Record) -> Result<Arc<Cell>, DataError> {
        let ctx = EncodeCtx { model: &self.model };
        encode::encode_type(&ctx, type_name, record, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn end_to_end_tag_selection() {
        let rt = compile("a$0 = U; b$1 = U;").unwrap();
        let value = rt.decode_bits(&[0b1000_0000], 1, true).unwrap();
        assert_eq!(value.kind(), Some("b"));
    }

    #[test]
    fn end_to_end_encode_then_decode() {
        let rt = compile("pair n:#8 m:#8 { n + m = 10 } = Pair;").unwrap();
        let mut fields = IndexMap::new();
        fields.insert("n".to_string(), Value::Int(4));
        fields.insert("m".to_string(), Value::Int(6));
        let record = Record {
            type_name: "Pair".into(),
            constructor: "pair".into(),
            fields,
            anonymous: Vec::new(),
        };
        let cell = rt.encode(&Value::Record(record)).unwrap();
        let decoded = rt
            .decode(DecodeInput::Cell(&cell), DecodeOptions::default())
            .unwrap();
        let rec = decoded.as_record().unwrap();
        assert_eq!(rec.field("n").unwrap().as_int(), Some(4));
        assert_eq!(rec.field("m").unwrap().as_int(), Some(6));
    }

    #[test]
    fn empty_schema_fails_to_compile() {
        let err = compile("").unwrap_err();
        assert_eq!(err, SchemaError::Empty);
    }
}
