//! Type descriptors
//!
//! Everything the store holds is a *bulk* (an opaque byte string) or one of
//! four native collections of bulks. Descriptors bridge application values
//! and those representations:
//!
//! - [`Bulk`] codecs turn one value into one bulk and back.
//! - [`ValueType`] says which native shape a key declared with a descriptor
//!   has, and which proxy handles it. Every `Bulk` codec is a scalar
//!   `ValueType`; [`HashType`], [`ListType`], [`SetType`] and
//!   [`SortedSetType`] are the collection-shaped ones.
//!
//! Descriptors are immutable and have no persisted form: every reader and
//! writer of a key must supply the same one.

mod collection;
mod json;
mod primitive;
mod temporal;
mod tuple;

use std::fmt;

use bytes::Bytes;

use crate::error::{DecodeError, EncodeError};
use crate::session::Session;

pub use collection::{HashType, ListType, SetType, SortedSetType};
pub use json::Json;
pub use primitive::{Boolean, ByteString, Float, Integer, Text};
pub use temporal::{Date, DateTime, TzDateTime};
pub use tuple::{Tuple, TupleFields};

/// Native storage shape of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Hash,
    List,
    Set,
    SortedSet,
}

impl Shape {
    /// Parse the store's `TYPE` reply; `none` means the key is absent.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Shape::Scalar),
            "hash" => Some(Shape::Hash),
            "list" => Some(Shape::List),
            "set" => Some(Shape::Set),
            "zset" => Some(Shape::SortedSet),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Shape::Scalar => "string",
            Shape::Hash => "hash",
            Shape::List => "list",
            Shape::Set => "set",
            Shape::SortedSet => "zset",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A codec between one application value and one bulk.
///
/// Laws:
/// - `decode(&encode(v)?) == v` for every `v` the codec accepts.
/// - `encode` and `decode` are pure.
pub trait Bulk: Clone + fmt::Debug + Send + Sync + 'static {
    /// The application-side value.
    type Value: fmt::Debug + Send + 'static;

    /// Short codec name used in error messages.
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Self::Value) -> Result<Bytes, EncodeError>;

    fn decode(&self, bulk: &[u8]) -> Result<Self::Value, DecodeError>;
}

/// A descriptor that can be bound to a key.
pub trait ValueType: Clone + fmt::Debug + Send + Sync + 'static {
    /// The proxy produced when the descriptor is bound to a key.
    type Proxy;

    /// The native shape keys of this type have.
    fn shape(&self) -> Shape;

    /// Bind to a resolved key of `session`.
    fn bind(self, session: Session, key: String) -> Self::Proxy;
}

/// Scalar `ValueType` impls for non-generic `Bulk` codecs.
macro_rules! scalar_value_type {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::types::ValueType for $ty {
                type Proxy = $crate::scalar::Scalar<Self>;

                fn shape(&self) -> $crate::types::Shape {
                    $crate::types::Shape::Scalar
                }

                fn bind(self, session: $crate::session::Session, key: String) -> Self::Proxy {
                    $crate::scalar::Scalar::new(session, key, self)
                }
            }
        )*
    };
}

pub(crate) use scalar_value_type;
