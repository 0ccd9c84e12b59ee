//! # docstore codec
//!
//! Binary document format for docstore.
//!
//! Two encodings share one [`Value`] model:
//!
//! - **Canonical**: map keys sorted by encoded form, shortest integers,
//!   no floats. Used for index descriptors and anything that is hashed.
//! - **Document**: attribute order preserved so system attributes stay in
//!   front, and finite floats are allowed. Used for stored document bodies.
//!
//! Neither encoding admits indefinite lengths or NaN.
//!
//! ## Usage
//!
//! ```
//! use docstore_codec::{from_document_bytes, to_document_bytes, DocumentSlice, Value};
//!
//! let doc = Value::object([("_key", Value::from("k1")), ("n", Value::from(1.5))]);
//! let bytes = to_document_bytes(&doc).unwrap();
//!
//! let slice = DocumentSlice::new(&bytes).unwrap();
//! assert_eq!(slice.get_str("_key").unwrap(), Some("k1"));
//! assert_eq!(from_document_bytes(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod slice;
mod value;

pub use decoder::{from_cbor, from_document_bytes, Decoder};
pub use encoder::{to_canonical_cbor, to_document_bytes, EncodeMode, Encoder};
pub use error::{CodecError, CodecResult};
pub use slice::DocumentSlice;
pub use value::Value;
