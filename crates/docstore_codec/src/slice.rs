//! Attribute access on encoded documents.

use crate::decoder::Decoder;
use crate::encoder::EncodeMode;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// A borrowed view of an encoded document.
///
/// Top-level attributes are located by scanning entry headers and skipping
/// values, so reading `_key` or `_rev` does not decode the whole body.
#[derive(Debug, Clone, Copy)]
pub struct DocumentSlice<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl<'a> DocumentSlice<'a> {
    /// Wraps `bytes`, checking that they start with an object header.
    pub fn new(bytes: &'a [u8]) -> CodecResult<Self> {
        let mut decoder = Decoder::new(bytes, EncodeMode::Document);
        let len = decoder.read_map_header()?;
        Ok(Self { bytes, len })
    }

    /// Number of top-level attributes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the document has no attributes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Encoded bytes of the value stored under `key`.
    pub fn raw(&self, key: &str) -> CodecResult<Option<&'a [u8]>> {
        let mut decoder = Decoder::new(self.bytes, EncodeMode::Document);
        decoder.read_map_header()?;
        for _ in 0..self.len {
            let name = decoder.read_text()?;
            let start = decoder.position();
            decoder.skip()?;
            if name == key {
                return Ok(Some(&self.bytes[start..decoder.position()]));
            }
        }
        Ok(None)
    }

    /// Decoded value of `key`, if present.
    pub fn get(&self, key: &str) -> CodecResult<Option<Value>> {
        match self.raw(key)? {
            Some(raw) => {
                let mut decoder = Decoder::new(raw, EncodeMode::Document);
                decoder.decode().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Text value of `key` without copying.
    ///
    /// Returns `Ok(None)` if the key is missing or not a string.
    pub fn get_str(&self, key: &str) -> CodecResult<Option<&'a str>> {
        match self.raw(key)? {
            Some(raw) if raw.first().is_some_and(|b| b >> 5 == 3) => {
                let mut decoder = Decoder::new(raw, EncodeMode::Document);
                decoder.read_text().map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Top-level attribute names in stored order.
    pub fn keys(&self) -> CodecResult<Vec<&'a str>> {
        let mut decoder = Decoder::new(self.bytes, EncodeMode::Document);
        decoder.read_map_header()?;
        let mut keys = Vec::with_capacity(self.len);
        for _ in 0..self.len {
            keys.push(decoder.read_text()?);
            decoder.skip()?;
        }
        Ok(keys)
    }

    /// Decodes the full document.
    pub fn to_value(&self) -> CodecResult<Value> {
        crate::decoder::from_document_bytes(self.bytes)
    }
}

impl<'a> TryFrom<&'a [u8]> for DocumentSlice<'a> {
    type Error = CodecError;

    fn try_from(bytes: &'a [u8]) -> Result<Self, Self::Error> {
        Self::new(bytes)
    }
}
