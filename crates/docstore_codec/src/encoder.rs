//! CBOR encoder with canonical and document modes.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// How maps and floats are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodeMode {
    /// Sorted map keys, floats rejected. Stable bytes for hashing.
    #[default]
    Canonical,
    /// Map entries in stored order, finite floats allowed.
    Document,
}

/// Encode a value to canonical CBOR bytes.
///
/// Map keys are sorted by their encoded form (length-first, then bytewise)
/// and integers use the shortest possible encoding.
///
/// # Errors
///
/// Returns an error if the value contains a float.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = Encoder::new(EncodeMode::Canonical);
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Encode a document body, keeping attribute order.
///
/// # Errors
///
/// Returns [`CodecError::NotAnObject`] if `value` is not a map and
/// [`CodecError::NaNForbidden`] if it contains NaN.
pub fn to_document_bytes(value: &Value) -> CodecResult<Vec<u8>> {
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    let mut encoder = Encoder::with_capacity(EncodeMode::Document, 64);
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A CBOR encoder.
pub struct Encoder {
    buffer: Vec<u8>,
    mode: EncodeMode,
}

impl Encoder {
    /// Create a new encoder.
    pub fn new(mode: EncodeMode) -> Self {
        Self {
            buffer: Vec::new(),
            mode,
        }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(mode: EncodeMode, capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            mode,
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Float(f) => self.encode_float(*f)?,
            Value::Bytes(b) => {
                self.encode_head(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
            }
            Value::Text(s) => {
                self.encode_head(3, s.len() as u64);
                self.buffer.extend_from_slice(s.as_bytes());
            }
            Value::Array(arr) => {
                self.encode_head(4, arr.len() as u64);
                for item in arr {
                    self.encode(item)?;
                }
            }
            Value::Map(pairs) => match self.mode {
                EncodeMode::Canonical => self.encode_sorted_map(pairs)?,
                EncodeMode::Document => {
                    self.encode_head(5, pairs.len() as u64);
                    for (key, value) in pairs {
                        self.encode(key)?;
                        self.encode(value)?;
                    }
                }
            },
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_head(0, n as u64);
        } else {
            // -1 is written as 0, -2 as 1, ...
            self.encode_head(1, (-(n + 1)) as u64);
        }
    }

    fn encode_float(&mut self, f: f64) -> CodecResult<()> {
        if self.mode == EncodeMode::Canonical {
            return Err(CodecError::FloatForbidden);
        }
        if f.is_nan() {
            return Err(CodecError::NaNForbidden);
        }
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&f.to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_head(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_sorted_map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut encoded: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let mut key_encoder = Encoder::new(EncodeMode::Canonical);
            key_encoder.encode(key)?;
            encoded.push((key_encoder.into_bytes(), value));
        }

        encoded.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.encode_head(5, pairs.len() as u64);
        for (key_bytes, value) in encoded {
            self.buffer.extend_from_slice(&key_bytes);
            self.encode(value)?;
        }
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(EncodeMode::Canonical)
    }
}
