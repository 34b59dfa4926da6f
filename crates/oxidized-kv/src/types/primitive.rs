//! Primitive byte-string codecs.

use bytes::Bytes;

use super::{scalar_value_type, Bulk};
use crate::error::{DecodeError, EncodeError};

/// Opaque bytes, stored as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteString;

impl Bulk for ByteString {
    type Value = Bytes;

    fn name(&self) -> &'static str {
        "bytestring"
    }

    fn encode(&self, value: &Bytes) -> Result<Bytes, EncodeError> {
        Ok(value.clone())
    }

    fn decode(&self, bulk: &[u8]) -> Result<Bytes, DecodeError> {
        Ok(Bytes::copy_from_slice(bulk))
    }
}

/// Unicode text stored as UTF-8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Text;

impl Bulk for Text {
    type Value = String;

    fn name(&self) -> &'static str {
        "text"
    }

    fn encode(&self, value: &String) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, bulk: &[u8]) -> Result<String, DecodeError> {
        std::str::from_utf8(bulk)
            .map(str::to_owned)
            .map_err(|e| DecodeError::malformed(self.name(), bulk, e.to_string()))
    }
}

/// Signed integers as decimal text.
///
/// Decimal rather than binary so that the store's native increment commands
/// work on the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Integer;

impl Bulk for Integer {
    type Value = i64;

    fn name(&self) -> &'static str {
        "integer"
    }

    fn encode(&self, value: &i64) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(value.to_string()))
    }

    fn decode(&self, bulk: &[u8]) -> Result<i64, DecodeError> {
        let text = std::str::from_utf8(bulk)
            .map_err(|_| DecodeError::malformed(self.name(), bulk, "not ASCII digits"))?;
        let value = text
            .parse::<i64>()
            .map_err(|e| DecodeError::malformed(self.name(), bulk, e.to_string()))?;
        // Canonical form only: no plus sign, no leading zeros, no `-0`.
        if value.to_string() != text {
            return Err(DecodeError::malformed(self.name(), bulk, "non-canonical integer"));
        }
        Ok(value)
    }
}

/// Booleans as the sentinel pair `1` / `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Boolean;

impl Bulk for Boolean {
    type Value = bool;

    fn name(&self) -> &'static str {
        "boolean"
    }

    fn encode(&self, value: &bool) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from_static(if *value { b"1" } else { b"0" }))
    }

    fn decode(&self, bulk: &[u8]) -> Result<bool, DecodeError> {
        match bulk {
            b"1" => Ok(true),
            b"0" => Ok(false),
            _ => Err(DecodeError::malformed(self.name(), bulk, "expected 1 or 0")),
        }
    }
}

/// 64-bit floats as shortest round-trip decimal text.
///
/// NaN has no stable equality and is rejected; infinities are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Float;

impl Bulk for Float {
    type Value = f64;

    fn name(&self) -> &'static str {
        "float"
    }

    fn encode(&self, value: &f64) -> Result<Bytes, EncodeError> {
        if value.is_nan() {
            return Err(EncodeError::new(self.name(), value, "NaN is not storable"));
        }
        Ok(Bytes::from(value.to_string()))
    }

    fn decode(&self, bulk: &[u8]) -> Result<f64, DecodeError> {
        let text = std::str::from_utf8(bulk)
            .map_err(|_| DecodeError::malformed(self.name(), bulk, "not a decimal number"))?;
        let value = text
            .parse::<f64>()
            .map_err(|e| DecodeError::malformed(self.name(), bulk, e.to_string()))?;
        if value.is_nan() {
            return Err(DecodeError::malformed(self.name(), bulk, "NaN is not storable"));
        }
        Ok(value)
    }
}

scalar_value_type!(ByteString, Text, Integer, Boolean, Float);
