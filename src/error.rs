//! Error types for schema compilation and data decode/encode.

/// Raised by [`crate::compile`] when TL-B source cannot be parsed, or does
/// not resolve to at least one well-formed type. Terminal: never caught
/// internally, always surfaces to the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unexpected token {found:?} at position {pos} (expected {expected})")]
    UnexpectedToken {
        pos: usize,
        found: String,
        expected: &'static str,
    },

    #[error("unexpected end of schema source (expected {expected})")]
    UnexpectedEof { expected: &'static str },

    #[error("schema source contains no type definitions")]
    Empty,

    #[error("duplicate constructor tag ({bit_len} bits, value {value:#x}) in type `{type_name}`")]
    DuplicateTag {
        type_name: String,
        bit_len: u8,
        value: u64,
    },

    #[error("tag width {0} out of range 0..=64")]
    TagWidthOutOfRange(u32),

    #[error("field `{field}` in `{constructor}` references unknown variable `{var}`")]
    UnknownVariable {
        constructor: String,
        field: String,
        var: String,
    },

    #[error("unknown type `{0}` referenced from a field")]
    UnknownType(String),

    #[error("division by zero while evaluating expression for `{0}`")]
    DivisionByZero(String),
}

/// Raised while decoding or encoding a specific datum against an already
/// compiled [`crate::Runtime`]. Caught at the per-constructor-attempt
/// boundary during decoding and converted into "this attempt failed";
/// never caught during encoding (encoding has no fallback path).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("input could not be decoded as base64/BoC: {0}")]
    BadInput(String),

    #[error("not enough bits remaining for {bit_len}-bit tag")]
    TagShort { bit_len: u8 },

    #[error("tag mismatch: expected {expected:#x} ({bit_len} bits), found {found:#x}")]
    TagMismatch {
        bit_len: u8,
        expected: u64,
        found: u64,
    },

    #[error("constraint failed in constructor `{0}`")]
    ConstraintFailed(String),

    #[error("not enough data remaining to decode field `{field}` ({needed} needed)")]
    DataShort { field: String, needed: u64 },

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("unknown constructor `{constructor}` of type `{type_name}`")]
    UnknownConstructor {
        type_name: String,
        constructor: String,
    },

    #[error("value has no `kind` discriminator")]
    NotTyped,

    #[error("field type `{0}` is not supported in this position")]
    UnsupportedFieldType(String),

    #[error("failed to load address: {0}")]
    AddressLoadFailed(String),

    #[error("no constructor of type `{type_name}` matched ({attempts} candidate(s) tried)")]
    NoMatch { type_name: String, attempts: usize },

    #[error("schema root selection failed after {attempts} type attempt(s)")]
    NoRootMatch { attempts: usize },

    #[error("recursion depth limit ({limit}) exceeded while decoding/encoding `{type_name}`")]
    RecursionLimit { type_name: String, limit: u16 },

    #[error("expression evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

/// Failure evaluating an arithmetic/relational expression against a
/// variable environment. Always wrapped into [`DataError::Eval`] at the
/// decode/encode boundary; schema-time expression checks use
/// [`SchemaError`] instead.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("division by zero")]
    DivisionByZero,
}
