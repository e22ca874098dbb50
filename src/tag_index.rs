//! Tag lookup table built once over a compiled [`Model`] (spec.md §4.D).
//!
//! Keyed by `(bit_len, value)` so that two constructors with the same
//! numeric value but different tag widths never collide — `0b1` at one
//! bit is a different tag from `0b01` at two bits. Entries own their
//! type name (rather than borrowing from the `Model`) so a [`crate::Runtime`]
//! can hold the model and its tag index side by side without a
//! self-referential lifetime.

use rustc_hash::FxHashMap;

use crate::error::SchemaError;
use crate::schema::Model;

#[derive(Debug, Clone)]
pub struct TagEntry {
    pub type_name: String,
    pub constructor_index: usize,
}

/// Index over every tagged constructor in a [`Model`]. Constructors with
/// `Tag::NONE` (zero tag bits) are not indexed here — they are matched by
/// being the type's sole constructor, handled directly in decoding.
#[derive(Debug)]
pub struct TagIndex {
    by_tag: FxHashMap<(u8, u64), TagEntry>,
    pub max_tag_bits: u8,
}

impl TagIndex {
    pub fn build(model: &Model) -> Result<Self, SchemaError> {
        let mut by_tag: FxHashMap<(u8, u64), TagEntry> = FxHashMap::default();
        let mut max_tag_bits = 0u8;

        for ty in model.types.values() {
            for (idx, ctor) in ty.constructors.iter().enumerate() {
                if ctor.tag.bit_len == 0 {
                    continue;
                }
                let key = (ctor.tag.bit_len, ctor.tag.value);
                if let Some(existing) = by_tag.get(&key) {
                    if existing.type_name != ty.name || existing.constructor_index != idx {
                        return Err(SchemaError::DuplicateTag {
                            type_name: ty.name.clone(),
                            bit_len: ctor.tag.bit_len,
                            value: ctor.tag.value,
                        });
                    }
                } else {
                    by_tag.insert(
                        key,
                        TagEntry {
                            type_name: ty.name.clone(),
                            constructor_index: idx,
                        },
                    );
                }
                max_tag_bits = max_tag_bits.max(ctor.tag.bit_len);
            }
        }

        Ok(TagIndex { by_tag, max_tag_bits })
    }

    pub fn lookup(&self, bit_len: u8, value: u64) -> Option<&TagEntry> {
        self.by_tag.get(&(bit_len, value))
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn index(src: &str) -> Model {
        Model::from_ast(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn distinguishes_tags_by_width_not_just_value() {
        // `a$0` is tag (1, 0); `b$00` is tag (2, 0) — must not collide.
        let model = index("a$0 = U; b$00 = U;");
        let idx = TagIndex::build(&model).unwrap();
        assert!(idx.lookup(1, 0).is_some());
        assert!(idx.lookup(2, 0).is_some());
        assert_eq!(idx.max_tag_bits, 2);
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let model = index("a$0 = U; b$0 = U;");
        let err = TagIndex::build(&model).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateTag {
                type_name: "U".into(),
                bit_len: 1,
                value: 0,
            }
        );
    }

    #[test]
    fn untagged_sole_constructor_is_not_indexed() {
        let model = index("x$_ n:#8 = X;");
        let idx = TagIndex::build(&model).unwrap();
        assert!(idx.is_empty());
    }
}
