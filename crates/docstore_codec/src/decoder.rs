//! CBOR decoder with canonical and document modes.

use crate::encoder::EncodeMode;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Decode a value from canonical CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid canonical CBOR, contain
/// forbidden constructs (floats, indefinite lengths) or trailing bytes.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = Decoder::new(bytes, EncodeMode::Canonical);
    let value = decoder.decode()?;
    decoder.finish()?;
    Ok(value)
}

/// Decode a document body written by [`crate::to_document_bytes`].
///
/// # Errors
///
/// Fails on malformed input, trailing bytes, or a non-object top level.
pub fn from_document_bytes(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = Decoder::new(bytes, EncodeMode::Document);
    let value = decoder.decode()?;
    decoder.finish()?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    Ok(value)
}

/// Maximum allowed element count for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum nesting depth accepted from input.
const MAX_DEPTH: usize = 128;

/// A CBOR decoder over a borrowed buffer.
///
/// In canonical mode map keys must be strictly sorted and floats are
/// rejected. Document mode accepts any key order and finite floats.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    mode: EncodeMode,
    depth: usize,
}

impl<'a> Decoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8], mode: EncodeMode) -> Self {
        Self {
            data,
            pos: 0,
            mode,
            depth: 0,
        }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let (major_type, info) = self.read_initial()?;

        match major_type {
            0 => {
                let n = self.decode_unsigned(info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.decode_unsigned(info)?;
                let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?;
                Ok(Value::Integer(-n - 1))
            }
            2 => {
                let bytes = self.read_sized(info)?;
                Ok(Value::Bytes(bytes.to_vec()))
            }
            3 => {
                let bytes = self.read_sized(info)?;
                let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_string()))
            }
            4 => self.nested(|this| this.decode_array(info)),
            5 => self.nested(|this| this.decode_map(info)),
            6 => Err(CodecError::unsupported_type("tagged value")),
            7 => self.decode_simple(info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Skip the next value without materializing it.
    pub fn skip(&mut self) -> CodecResult<()> {
        let (major_type, info) = self.read_initial()?;
        match major_type {
            0 | 1 => self.decode_unsigned(info).map(|_| ()),
            2 | 3 => self.read_sized(info).map(|_| ()),
            4 => {
                let len = self.read_count(info)?;
                self.nested(|this| (0..len).try_for_each(|_| this.skip()))
            }
            5 => {
                let len = self.read_count(info)?;
                self.nested(|this| {
                    (0..len).try_for_each(|_| {
                        this.skip()?;
                        this.skip()
                    })
                })
            }
            7 => self.decode_simple(info).map(|_| ()),
            _ => Err(CodecError::unsupported_type("tagged value")),
        }
    }

    /// Read a map header and return its entry count.
    pub fn read_map_header(&mut self) -> CodecResult<usize> {
        let (major_type, info) = self.read_initial()?;
        if major_type != 5 {
            return Err(CodecError::NotAnObject);
        }
        self.read_count(info)
    }

    /// Read a text string without copying.
    pub fn read_text(&mut self) -> CodecResult<&'a str> {
        let (major_type, info) = self.read_initial()?;
        if major_type != 3 {
            return Err(CodecError::invalid_structure("expected text string"));
        }
        let bytes = self.read_sized(info)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Fails if any input is left unread.
    pub fn finish(&self) -> CodecResult<()> {
        let remaining = self.data.len().saturating_sub(self.pos);
        if remaining > 0 {
            return Err(CodecError::TrailingBytes { remaining });
        }
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::invalid_structure("nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn read_initial(&mut self) -> CodecResult<(u8, u8)> {
        let byte = self.read_byte()?;
        Ok((byte >> 5, byte & 0x1f))
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_sized(&mut self, info: u8) -> CodecResult<&'a [u8]> {
        let len = self.decode_unsigned(info)?;
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_BYTES_LENGTH,
            });
        }
        self.read_bytes(len as usize)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_count(&mut self, info: u8) -> CodecResult<usize> {
        let len = self.decode_unsigned(info)?;
        if len > MAX_CONTAINER_ELEMENTS {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_CONTAINER_ELEMENTS,
            });
        }
        Ok(len as usize)
    }

    fn decode_unsigned(&mut self, info: u8) -> CodecResult<u64> {
        let non_canonical =
            || CodecError::invalid_structure("non-canonical: value could be encoded in fewer bytes");
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    return Err(non_canonical());
                }
                Ok(u64::from(byte))
            }
            25 => {
                let bytes = self.read_bytes(2)?;
                let value = u16::from_be_bytes([bytes[0], bytes[1]]);
                if u8::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(value))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if u16::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(value))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let value = u64::from_be_bytes(raw);
                if u32::try_from(value).is_ok() {
                    return Err(non_canonical());
                }
                Ok(value)
            }
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => Err(CodecError::invalid_structure("reserved additional info")),
        }
    }

    fn decode_array(&mut self, info: u8) -> CodecResult<Value> {
        let len = self.read_count(info)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, info: u8) -> CodecResult<Value> {
        let data = self.data;
        let len = self.read_count(info)?;
        let mut pairs = Vec::with_capacity(len.min(1024));
        let mut prev_key: Option<&'a [u8]> = None;

        for _ in 0..len {
            let key_start = self.pos;
            let key = self.decode()?;
            let key_bytes = &data[key_start..self.pos];

            if self.mode == EncodeMode::Canonical {
                if let Some(prev) = prev_key {
                    let ordering = prev
                        .len()
                        .cmp(&key_bytes.len())
                        .then_with(|| prev.cmp(key_bytes));
                    if ordering != std::cmp::Ordering::Less {
                        return Err(CodecError::invalid_structure(
                            "non-canonical: map keys not in sorted order",
                        ));
                    }
                }
                prev_key = Some(key_bytes);
            }

            let value = self.decode()?;
            pairs.push((key, value));
        }

        Ok(Value::Map(pairs))
    }

    fn decode_simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 | 23 => Ok(Value::Null),
            25..=27 if self.mode == EncodeMode::Canonical => Err(CodecError::FloatForbidden),
            26 => {
                let bytes = self.read_bytes(4)?;
                let f = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Self::finite(f64::from(f))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Self::finite(f64::from_be_bytes(raw))
            }
            25 => Err(CodecError::unsupported_type("half-precision float")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!("simple value {info}"))),
        }
    }

    fn finite(f: f64) -> CodecResult<Value> {
        if f.is_nan() {
            return Err(CodecError::NaNForbidden);
        }
        Ok(Value::Float(f))
    }
}
