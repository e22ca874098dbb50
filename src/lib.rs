//! Runtime-interpretable codec for TL-B (Type Language - Binary) schemas.
//!
//! ```
//! use tlb_runtime::compile;
//!
//! let rt = compile("a$0 = U; b$1 = U;").unwrap();
//! let value = rt.decode_bits(&[0b1000_0000], 1, true).unwrap();
//! assert_eq!(value.kind(), Some("b"));
//! ```
//!
//! The pipeline is: TL-B source -> [`ast::AstSchema`] (via [`parse::parse`])
//! -> [`schema::Model`] -> [`tag_index::TagIndex`] -> [`Runtime`], after
//! which [`Runtime::decode`]/[`Runtime::encode`] walk a [`cell::Cell`] tree
//! field by field. See `DESIGN.md` for how each module maps onto the spec.

pub mod ast;
pub mod cell;
mod decode;
mod dict;
pub mod error;
mod encode;
pub mod expr;
pub mod parse;
pub mod schema;
pub mod tag_index;
mod tuple;
pub mod value;

mod runtime;

pub use error::{DataError, EvalError, SchemaError};
pub use runtime::{compile, DecodeInput, DecodeOptions, Runtime};
pub use value::{Record, Value};
