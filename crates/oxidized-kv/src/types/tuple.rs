//! Fixed-arity composite codec.
//!
//! Each field is encoded by its own sub-codec and then written as terminated
//! bytes:
//!
//! - `0x00` → `0x01 0x01`
//! - `0x01` → `0x01 0x02`
//! - all other bytes unchanged
//! - terminated with `0x00`
//!
//! The escaping makes the concatenation injective, so two tuples that differ
//! in any field never share a bulk, whatever bytes the fields contain.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Bulk, Shape, ValueType};
use crate::error::{DecodeError, EncodeError};
use crate::scalar::Scalar;
use crate::session::Session;

const TERMINATOR_BYTE: u8 = 0x00;
const ESCAPE_BYTE: u8 = 0x01;

/// Write `data` escaped and terminated into `buf`.
fn write_field(data: &[u8], buf: &mut BytesMut) {
    for &byte in data {
        match byte {
            TERMINATOR_BYTE => {
                buf.put_u8(ESCAPE_BYTE);
                buf.put_u8(0x01);
            }
            ESCAPE_BYTE => {
                buf.put_u8(ESCAPE_BYTE);
                buf.put_u8(0x02);
            }
            _ => buf.put_u8(byte),
        }
    }
    buf.put_u8(TERMINATOR_BYTE);
}

/// Read one terminated field from the front of `input`, advancing past it.
fn read_field(codec: &'static str, whole: &[u8], input: &mut &[u8]) -> Result<Bytes, DecodeError> {
    let mut field = BytesMut::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            TERMINATOR_BYTE => {
                *input = &input[i + 1..];
                return Ok(field.freeze());
            }
            ESCAPE_BYTE => {
                let next = input
                    .get(i + 1)
                    .ok_or_else(|| DecodeError::malformed(codec, whole, "truncated escape sequence"))?;
                match next {
                    0x01 => field.put_u8(TERMINATOR_BYTE),
                    0x02 => field.put_u8(ESCAPE_BYTE),
                    other => {
                        return Err(DecodeError::malformed(
                            codec,
                            whole,
                            format!("invalid escape sequence: 0x01 0x{other:02x}"),
                        ))
                    }
                }
                i += 2;
            }
            byte => {
                field.put_u8(byte);
                i += 1;
            }
        }
    }
    Err(DecodeError::malformed(codec, whole, "missing field terminator"))
}

/// A Rust tuple of [`Bulk`] codecs usable as the fields of a [`Tuple`].
pub trait TupleFields: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Tuple of the field codecs' values.
    type Value: std::fmt::Debug + Send + 'static;

    const ARITY: usize;

    fn encode_fields(&self, value: &Self::Value, buf: &mut BytesMut) -> Result<(), EncodeError>;

    fn decode_fields(&self, whole: &[u8], input: &mut &[u8]) -> Result<Self::Value, DecodeError>;
}

macro_rules! tuple_fields {
    ($arity:expr; $($codec:ident : $idx:tt),+) => {
        impl<$($codec: Bulk),+> TupleFields for ($($codec,)+) {
            type Value = ($($codec::Value,)+);

            const ARITY: usize = $arity;

            fn encode_fields(&self, value: &Self::Value, buf: &mut BytesMut) -> Result<(), EncodeError> {
                $(
                    let field = self.$idx.encode(&value.$idx)?;
                    write_field(&field, buf);
                )+
                Ok(())
            }

            fn decode_fields(&self, whole: &[u8], input: &mut &[u8]) -> Result<Self::Value, DecodeError> {
                Ok(($(
                    {
                        let field = read_field("tuple", whole, input)?;
                        self.$idx.decode(&field)?
                    },
                )+))
            }
        }
    };
}

tuple_fields!(2; A: 0, B: 1);
tuple_fields!(3; A: 0, B: 1, C: 2);
tuple_fields!(4; A: 0, B: 1, C: 2, D: 3);

/// Composite codec over a tuple of sub-codecs.
///
/// ```ignore
/// let point = Tuple::new((Text, Integer));
/// let bulk = point.encode(&("x".to_string(), 3))?;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tuple<F> {
    fields: F,
}

impl<F: TupleFields> Tuple<F> {
    pub fn new(fields: F) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &F {
        &self.fields
    }

    pub fn arity(&self) -> usize {
        F::ARITY
    }
}

impl<F: TupleFields> Bulk for Tuple<F> {
    type Value = F::Value;

    fn name(&self) -> &'static str {
        "tuple"
    }

    fn encode(&self, value: &F::Value) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::new();
        self.fields.encode_fields(value, &mut buf)?;
        Ok(buf.freeze())
    }

    fn decode(&self, bulk: &[u8]) -> Result<F::Value, DecodeError> {
        let mut input = bulk;
        let value = self.fields.decode_fields(bulk, &mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::malformed(
                self.name(),
                bulk,
                format!("{} trailing byte(s) after {} fields", input.len(), F::ARITY),
            ));
        }
        Ok(value)
    }
}

impl<F: TupleFields> ValueType for Tuple<F> {
    type Proxy = Scalar<Self>;

    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn bind(self, session: Session, key: String) -> Self::Proxy {
        Scalar::new(session, key, self)
    }
}
