//! JSON codec for serde types.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Bulk, Shape, ValueType};
use crate::error::{DecodeError, EncodeError};
use crate::scalar::Scalar;
use crate::session::Session;

/// Any serde-serializable value, stored as compact JSON text.
///
/// Round-trips exactly for types whose `Deserialize` inverts `Serialize`
/// (all derived impls; not `f64` NaN, which JSON cannot express).
pub struct Json<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Json<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for Json<T> {}

impl<T> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

impl<T> Bulk for Json<T>
where
    T: Serialize + DeserializeOwned + fmt::Debug + Send + 'static,
{
    type Value = T;

    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &T) -> Result<Bytes, EncodeError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| EncodeError::new(self.name(), value, e.to_string()))
    }

    fn decode(&self, bulk: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(bulk).map_err(|e| DecodeError::malformed(self.name(), bulk, e.to_string()))
    }
}

impl<T> ValueType for Json<T>
where
    T: Serialize + DeserializeOwned + fmt::Debug + Send + 'static,
{
    type Proxy = Scalar<Self>;

    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn bind(self, session: Session, key: String) -> Self::Proxy {
        Scalar::new(session, key, self)
    }
}
