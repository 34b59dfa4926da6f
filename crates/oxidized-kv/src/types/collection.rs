//! Collection-shaped value types.
//!
//! These do not encode anything themselves; they pair a native collection
//! kind with the [`Bulk`] codecs of its elements and resolve to the matching
//! proxy.

use super::{Bulk, Shape, ValueType};
use crate::hash::Hash;
use crate::list::List;
use crate::session::Session;
use crate::set::Set;
use crate::sorted_set::SortedSet;

/// A hash whose fields use `K` and whose values use `V`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashType<K, V> {
    pub key_type: K,
    pub value_type: V,
}

impl<K: Bulk, V: Bulk> HashType<K, V> {
    pub fn new(key_type: K, value_type: V) -> Self {
        Self {
            key_type,
            value_type,
        }
    }
}

impl<K: Bulk, V: Bulk> ValueType for HashType<K, V> {
    type Proxy = Hash<K, V>;

    fn shape(&self) -> Shape {
        Shape::Hash
    }

    fn bind(self, session: Session, key: String) -> Self::Proxy {
        Hash::new(session, key, self.key_type, self.value_type)
    }
}

/// An ordered sequence of `T`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListType<T> {
    pub value_type: T,
}

impl<T: Bulk> ListType<T> {
    pub fn new(value_type: T) -> Self {
        Self { value_type }
    }
}

impl<T: Bulk> ValueType for ListType<T> {
    type Proxy = List<T>;

    fn shape(&self) -> Shape {
        Shape::List
    }

    fn bind(self, session: Session, key: String) -> Self::Proxy {
        List::new(session, key, self.value_type)
    }
}

/// An unordered set of `T`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetType<T> {
    pub value_type: T,
}

impl<T: Bulk> SetType<T> {
    pub fn new(value_type: T) -> Self {
        Self { value_type }
    }
}

impl<T: Bulk> ValueType for SetType<T> {
    type Proxy = Set<T>;

    fn shape(&self) -> Shape {
        Shape::Set
    }

    fn bind(self, session: Session, key: String) -> Self::Proxy {
        Set::new(session, key, self.value_type)
    }
}

/// A score-ordered set of `T`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortedSetType<T> {
    pub value_type: T,
}

impl<T: Bulk> SortedSetType<T> {
    pub fn new(value_type: T) -> Self {
        Self { value_type }
    }
}

impl<T: Bulk> ValueType for SortedSetType<T> {
    type Proxy = SortedSet<T>;

    fn shape(&self) -> Shape {
        Shape::SortedSet
    }

    fn bind(self, session: Session, key: String) -> Self::Proxy {
        SortedSet::new(session, key, self.value_type)
    }
}
